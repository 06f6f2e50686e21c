//! In-memory queue store and the shared handle passed to producers, the
//! processor and UI readers.
//!
//! The store owns every [`QueueItem`]. Items only change status through
//! `mark_*`, each of which checks the current status before moving on, so a
//! stale caller cannot overwrite a newer transition.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::model::{EntityType, HttpMethod, Operation, Payload, Priority, QueueItem, SyncStatus};
use crate::policy::{can_retry, compare_for_processing, BackoffPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted,
    /// An item with the same id was waiting and has been overwritten.
    Replaced,
    /// The same id already synced; nothing changed.
    AlreadySynced,
}

/// Per-status counters. `failed` includes items that need support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    pub requires_support: usize,
}

impl StatusCounts {
    fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Failed => self.failed += 1,
            SyncStatus::RequiresSupport => {
                self.failed += 1;
                self.requires_support += 1;
            }
            SyncStatus::Syncing => {}
        }
    }
}

/// Projection of the queue contents, rebuilt on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatistics {
    pub total_pending: usize,
    pub total_synced: usize,
    pub total_failed: usize,
    pub total_requires_support: usize,
    pub syncing: usize,
    pub by_entity_type: BTreeMap<EntityType, StatusCounts>,
    pub oldest_pending: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct QueueStore {
    items: HashMap<String, QueueItem>,
    backoff: BackoffPolicy,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(backoff: BackoffPolicy) -> Self {
        Self {
            items: HashMap::new(),
            backoff,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.get(id)
    }

    /// All items in processing order.
    pub fn items(&self) -> Vec<&QueueItem> {
        let mut items: Vec<&QueueItem> = self.items.values().collect();
        items.sort_by(|a, b| compare_for_processing(a, b));
        items
    }

    /// Insert an item, replacing any waiting item with the same id.
    pub fn enqueue(&mut self, item: QueueItem) -> Result<EnqueueOutcome, QueueError> {
        let outcome = match self.items.get(item.id()).map(QueueItem::status) {
            None => EnqueueOutcome::Inserted,
            Some(SyncStatus::Syncing) => {
                return Err(QueueError::ConcurrentMutation {
                    id: item.id().to_string(),
                })
            }
            Some(SyncStatus::Synced) => {
                debug!(id = item.id(), "ignoring enqueue of already synced item");
                return Ok(EnqueueOutcome::AlreadySynced);
            }
            Some(_) => EnqueueOutcome::Replaced,
        };
        debug!(
            id = item.id(),
            entity_type = %item.entity_type(),
            priority = %item.priority(),
            ?outcome,
            "enqueued item"
        );
        self.items.insert(item.id().to_string(), item);
        Ok(outcome)
    }

    pub fn mark_syncing(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let item = self.item_mut(id)?;
        match item.status {
            SyncStatus::Pending => {}
            SyncStatus::Failed if can_retry(item) => {}
            from => return Err(invalid(id, from, SyncStatus::Syncing)),
        }
        item.status = SyncStatus::Syncing;
        item.updated_at = now;
        Ok(())
    }

    pub fn mark_synced(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let item = self.item_mut(id)?;
        if item.status != SyncStatus::Syncing {
            return Err(invalid(id, item.status, SyncStatus::Synced));
        }
        item.status = SyncStatus::Synced;
        item.last_error = None;
        item.updated_at = now;
        Ok(())
    }

    /// Record a failed attempt. Returns the resulting status: `Failed` while
    /// retries remain, `RequiresSupport` once they are used up.
    pub fn mark_failed(
        &mut self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncStatus, QueueError> {
        let item = self.item_mut(id)?;
        if item.status != SyncStatus::Syncing {
            return Err(invalid(id, item.status, SyncStatus::Failed));
        }
        item.last_retry_at = Some(now);
        item.last_error = Some(error.to_string());
        item.updated_at = now;
        if item.retry_count >= item.max_retries() {
            item.status = SyncStatus::RequiresSupport;
            warn!(
                id,
                retry_count = item.retry_count,
                error,
                "retries exhausted; item requires support"
            );
        } else {
            item.retry_count += 1;
            item.status = SyncStatus::Failed;
        }
        Ok(item.status)
    }

    /// Drop every synced item. Never called automatically.
    pub fn evict_synced(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|_, item| item.status() != SyncStatus::Synced);
        let removed = before - self.items.len();
        if removed > 0 {
            info!(removed, "evicted synced items");
        }
        removed
    }

    /// Remove a single item, e.g. after manual support handling.
    pub fn remove(&mut self, id: &str) -> Result<QueueItem, QueueError> {
        match self.items.get(id).map(QueueItem::status) {
            None => Err(QueueError::NotFound(id.to_string())),
            Some(SyncStatus::Syncing) => Err(QueueError::ConcurrentMutation { id: id.to_string() }),
            Some(_) => self
                .items
                .remove(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string())),
        }
    }

    /// Items eligible for a pass, in processing order.
    pub fn pending_or_retryable(&self, now: DateTime<Utc>) -> Vec<&QueueItem> {
        let mut due: Vec<&QueueItem> = self
            .items
            .values()
            .filter(|item| match item.status() {
                SyncStatus::Pending => true,
                SyncStatus::Failed => can_retry(item) && self.backoff.elapsed(item, now),
                _ => false,
            })
            .collect();
        due.sort_by(|a, b| compare_for_processing(a, b));
        due
    }

    pub fn requires_support(&self) -> Vec<&QueueItem> {
        self.items()
            .into_iter()
            .filter(|item| item.status() == SyncStatus::RequiresSupport)
            .collect()
    }

    pub fn statistics(&self) -> QueueStatistics {
        let mut stats = QueueStatistics::default();
        for item in self.items.values() {
            let status = item.status();
            if status == SyncStatus::Syncing {
                stats.syncing += 1;
                continue;
            }
            stats
                .by_entity_type
                .entry(item.entity_type())
                .or_default()
                .record(status);
            match status {
                SyncStatus::Pending => {
                    stats.total_pending += 1;
                    if stats.oldest_pending.map_or(true, |t| item.created_at() < t) {
                        stats.oldest_pending = Some(item.created_at());
                    }
                }
                SyncStatus::Synced => stats.total_synced += 1,
                SyncStatus::Failed => stats.total_failed += 1,
                SyncStatus::RequiresSupport => {
                    stats.total_failed += 1;
                    stats.total_requires_support += 1;
                }
                SyncStatus::Syncing => {}
            }
        }
        stats
    }

    /// Serialize every item, in processing order, for audit or export.
    pub fn export_json(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string_pretty(&self.items())?)
    }

    /// Rebuild a store from [`QueueStore::export_json`] output.
    ///
    /// Items caught mid-sync are put back to `Pending`; the attempt that was
    /// in flight when the snapshot was taken never resolved.
    pub fn from_json(json: &str, backoff: BackoffPolicy) -> Result<Self, QueueError> {
        let items: Vec<QueueItem> = serde_json::from_str(json)?;
        let mut store = Self::with_backoff(backoff);
        for mut item in items {
            if item.status == SyncStatus::Syncing {
                item.status = SyncStatus::Pending;
            }
            store.items.insert(item.id().to_string(), item);
        }
        Ok(store)
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut QueueItem, QueueError> {
        self.items
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}

fn invalid(id: &str, from: SyncStatus, to: SyncStatus) -> QueueError {
    QueueError::InvalidTransition {
        id: id.to_string(),
        from,
        to,
    }
}

/// Cloneable handle to a single [`QueueStore`].
///
/// The lock is never held across a transport call.
#[derive(Debug, Clone, Default)]
pub struct QueueHandle {
    inner: Arc<Mutex<QueueStore>>,
}

impl QueueHandle {
    pub fn new(store: QueueStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Status changes go through the processor; outside the crate the
    /// store is only reachable through the read methods below.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, QueueStore> {
        self.inner.lock().await
    }

    pub async fn enqueue(&self, item: QueueItem) -> Result<EnqueueOutcome, QueueError> {
        self.inner.lock().await.enqueue(item)
    }

    /// Build and enqueue an item in one step. Returns the new item's id.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_new(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Payload,
        endpoint: &str,
        method: HttpMethod,
        priority: Priority,
    ) -> Result<String, QueueError> {
        let item = QueueItem::create(
            entity_type,
            entity_id,
            operation,
            payload,
            endpoint,
            method,
            priority,
        )?;
        let id = item.id().to_string();
        self.enqueue(item).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<QueueItem> {
        self.inner.lock().await.get(id).cloned()
    }

    /// Snapshot of every item in processing order.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.inner
            .lock()
            .await
            .items()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Items not yet synced or handed to support.
    pub async fn outstanding_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .items()
            .iter()
            .filter(|item| !item.status().is_terminal())
            .count()
    }

    pub async fn remove(&self, id: &str) -> Result<QueueItem, QueueError> {
        self.inner.lock().await.remove(id)
    }

    pub async fn statistics(&self) -> QueueStatistics {
        self.inner.lock().await.statistics()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.statistics().total_pending
    }

    pub async fn evict_synced(&self) -> usize {
        self.inner.lock().await.evict_synced()
    }

    pub async fn requires_support(&self) -> Vec<QueueItem> {
        self.inner
            .lock()
            .await
            .requires_support()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn export_json(&self) -> Result<String, QueueError> {
        self.inner.lock().await.export_json()
    }
}
