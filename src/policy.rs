//! Ordering and retry rules for queue items.
//!
//! Everything here is a pure function of its arguments.
use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Priority, QueueItem, SyncStatus};

const BACKOFF_BASE_MS: u64 = 1_000;

/// Lower ranks are processed first.
pub fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

/// Priority first, then oldest `created_at` first.
pub fn compare_for_processing(a: &QueueItem, b: &QueueItem) -> Ordering {
    priority_rank(a.priority())
        .cmp(&priority_rank(b.priority()))
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.id().cmp(b.id()))
}

/// A failed item may be attempted again while it has retries left.
///
/// `max_retries` counts re-attempts after the first send, so an item that has
/// failed exactly `max_retries` times still gets its final retry.
pub fn can_retry(item: &QueueItem) -> bool {
    item.status() == SyncStatus::Failed && item.retry_count() <= item.max_retries()
}

/// Uncapped wait owed by `item` since its last failed attempt.
pub fn backoff_delay(item: &QueueItem) -> Duration {
    BackoffPolicy::default().delay(item.retry_count())
}

/// Uncapped exponential backoff check.
pub fn backoff_elapsed(item: &QueueItem, now: DateTime<Utc>) -> bool {
    BackoffPolicy::default().elapsed(item, now)
}

/// Exponential backoff: base one second, doubling per failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// `None` leaves the delay unbounded.
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    pub fn capped(max_delay: Duration) -> Self {
        Self {
            max_delay: Some(max_delay),
        }
    }

    /// Builds the policy from a seconds value where 0 means "no cap".
    pub fn from_max_seconds(max_backoff_seconds: u64) -> Self {
        if max_backoff_seconds == 0 {
            Self::default()
        } else {
            Self::capped(Duration::from_secs(max_backoff_seconds))
        }
    }

    /// Wait required after the `retry_count`-th failure: `2^retry_count` seconds.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let ms = 2_u64
            .checked_pow(retry_count)
            .and_then(|factor| factor.checked_mul(BACKOFF_BASE_MS))
            .unwrap_or(u64::MAX);
        let delay = Duration::from_millis(ms);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// True when the item never failed or its backoff window has passed.
    pub fn elapsed(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        let Some(last) = item.last_retry_at() else {
            return true;
        };
        match (now - last).to_std() {
            Ok(since) => since >= self.delay(item.retry_count()),
            // clock went backwards
            Err(_) => false,
        }
    }
}
