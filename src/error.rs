//! Error types surfaced by the queue and processor.
use thiserror::Error;

use crate::model::SyncStatus;

/// Errors raised synchronously by queue operations.
///
/// Transport failures never show up here: the processor absorbs them into
/// item state. These are programming or invariant errors only.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid queue item: {0}")]
    InvalidItem(String),
    #[error("item {id} is being synced; wait for the in-flight attempt to resolve")]
    ConcurrentMutation { id: String },
    #[error("no queue item with id {0}")]
    NotFound(String),
    #[error("item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: SyncStatus,
        to: SyncStatus,
    },
    #[error("queue snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}
