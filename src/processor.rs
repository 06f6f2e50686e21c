//! Drains eligible queue items through a [`Transport`].
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::QueueError;
use crate::model::SyncStatus;
use crate::queue::QueueHandle;
use crate::transport::Transport;

/// Items dispatched per pass unless configured otherwise.
pub const BATCH_SIZE: usize = 10;

/// Outcome counts of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success_count: usize,
    pub failed_count: usize,
}

/// Most recent completed pass, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSync {
    pub finished_at: DateTime<Utc>,
    pub report: SyncReport,
}

pub struct SyncProcessor {
    queue: QueueHandle,
    transport: Arc<dyn Transport>,
    online: watch::Receiver<bool>,
    batch_size: usize,
    // serialises passes so two triggers never interleave status changes
    pass: Mutex<()>,
    last_sync: Mutex<Option<LastSync>>,
}

impl SyncProcessor {
    pub fn new(
        queue: QueueHandle,
        transport: Arc<dyn Transport>,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            transport,
            online,
            batch_size: BATCH_SIZE,
            pass: Mutex::new(()),
            last_sync: Mutex::new(None),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub async fn last_sync(&self) -> Option<LastSync> {
        *self.last_sync.lock().await
    }

    /// Run one pass using the wall clock.
    pub async fn process_pass(&self) -> Result<SyncReport, QueueError> {
        self.run_pass(Utc::now).await
    }

    /// Run one pass with every timestamp pinned to `now`.
    pub async fn process_pass_at(&self, now: DateTime<Utc>) -> Result<SyncReport, QueueError> {
        self.run_pass(move || now).await
    }

    /// Errors only come from queue invariant violations; transport failures
    /// are recorded on the items and counted in the report.
    #[instrument(skip_all)]
    async fn run_pass<C>(&self, clock: C) -> Result<SyncReport, QueueError>
    where
        C: Fn() -> DateTime<Utc> + Send + Sync,
    {
        let _pass = self.pass.lock().await;
        let mut report = SyncReport::default();

        if !self.is_online() {
            debug!("offline; skipping sync pass");
            return Ok(report);
        }

        let batch: Vec<String> = {
            let store = self.queue.lock().await;
            store
                .pending_or_retryable(clock())
                .into_iter()
                .take(self.batch_size)
                .map(|item| item.id().to_string())
                .collect()
        };
        if batch.is_empty() {
            debug!("nothing to sync");
        }

        for id in batch {
            if !self.is_online() {
                info!(remaining_from = %id, "went offline mid-pass; stopping");
                break;
            }

            let item = {
                let mut store = self.queue.lock().await;
                match store.mark_syncing(&id, clock()) {
                    Ok(()) => {}
                    // removed or replaced since the batch was picked
                    Err(err @ (QueueError::NotFound(_) | QueueError::InvalidTransition { .. })) => {
                        debug!(id = %id, %err, "batch item no longer eligible; skipping");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                store
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| QueueError::NotFound(id.clone()))?
            };

            // the queue lock is released while the request is in flight
            let outcome = self.transport.send(&item).await;

            let mut store = self.queue.lock().await;
            match outcome {
                Ok(()) => {
                    store.mark_synced(&id, clock())?;
                    report.success_count += 1;
                    info!(
                        id = %id,
                        entity_type = %item.entity_type(),
                        "queue item synced"
                    );
                }
                Err(err) => {
                    let status = store.mark_failed(&id, &format!("{err:#}"), clock())?;
                    report.failed_count += 1;
                    let retry_count = store.get(&id).map(|i| i.retry_count()).unwrap_or_default();
                    if status == SyncStatus::RequiresSupport {
                        warn!(?err, id = %id, retry_count, "queue item gave up");
                    } else {
                        warn!(?err, id = %id, retry_count, "queue item failed; will retry after backoff");
                    }
                }
            }
        }

        *self.last_sync.lock().await = Some(LastSync {
            finished_at: clock(),
            report,
        });
        info!(
            success = report.success_count,
            failed = report.failed_count,
            "sync pass finished"
        );
        Ok(report)
    }
}
