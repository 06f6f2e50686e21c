//! Network status observable and the trigger that runs the processor when
//! connectivity returns.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::processor::SyncProcessor;

/// Default quiet period after reconnecting.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Platform-fed online/offline flag.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a new state; repeated identical states do not notify.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Call `callback` on every change until the returned subscription is
    /// dropped. Must be called from within a tokio runtime.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                callback(online);
            }
        });
        Subscription { handle }
    }
}

/// Live `on_change` registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Settled {
    Online,
    Offline,
    Closed,
}

/// Runs the processor once connectivity has been stable for the settle
/// delay, and periodically while online when a poll interval is set.
pub struct ConnectivityTrigger {
    processor: Arc<SyncProcessor>,
    status: watch::Receiver<bool>,
    settle_delay: Duration,
    poll_interval: Option<Duration>,
}

impl ConnectivityTrigger {
    pub fn new(processor: Arc<SyncProcessor>, status: watch::Receiver<bool>) -> Self {
        Self {
            processor,
            status,
            settle_delay: SETTLE_DELAY,
            poll_interval: None,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Returns when the network status sender is dropped.
    pub async fn run(mut self) {
        let mut ticker = self.poll_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut reconnected = *self.status.borrow_and_update();

        loop {
            if reconnected {
                reconnected = false;
                match self.settle().await {
                    Settled::Online => self.run_pass("reconnected").await,
                    Settled::Offline => debug!("connection dropped while settling"),
                    Settled::Closed => break,
                }
                continue;
            }

            tokio::select! {
                changed = self.status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *self.status.borrow_and_update() {
                        info!("network is back; waiting for it to settle");
                        reconnected = true;
                    } else {
                        info!("network lost; sync paused");
                    }
                }
                _ = next_tick(&mut ticker) => {
                    if *self.status.borrow() {
                        self.run_pass("poll").await;
                    }
                }
            }
        }
        info!("network status closed; trigger stopped");
    }

    async fn settle(&mut self) -> Settled {
        loop {
            tokio::select! {
                _ = sleep(self.settle_delay) => {
                    return if *self.status.borrow() { Settled::Online } else { Settled::Offline };
                }
                changed = self.status.changed() => {
                    if changed.is_err() {
                        return Settled::Closed;
                    }
                    if !*self.status.borrow_and_update() {
                        return Settled::Offline;
                    }
                    // still online: restart the quiet period
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_pass(&self, reason: &'static str) {
        match self.processor.process_pass().await {
            Ok(report) => debug!(?report, "triggered sync pass done"),
            Err(err) => error!(?err, "sync pass aborted"),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
