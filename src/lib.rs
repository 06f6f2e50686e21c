//! Offline sync queue for the driver app.
//!
//! Producers enqueue [`QueueItem`]s into a [`QueueHandle`]; a
//! [`SyncProcessor`] drains them through a [`Transport`] whenever the
//! [`ConnectivityTrigger`] sees the network come back.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod model;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod transport;

pub use connectivity::{ConnectivityTrigger, NetworkStatus, Subscription};
pub use error::QueueError;
pub use events::{EventRouter, LocationBatcher, SyncEvent};
pub use model::{EntityType, HttpMethod, Operation, Payload, Priority, QueueItem, SyncStatus};
pub use processor::{LastSync, SyncProcessor, SyncReport, BATCH_SIZE};
pub use queue::{EnqueueOutcome, QueueHandle, QueueStatistics, QueueStore, StatusCounts};
pub use transport::{HttpTransport, Transport};
