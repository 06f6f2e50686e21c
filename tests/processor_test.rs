use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use courier_sync::model::{PaymentPayload, TripPayload};
use courier_sync::{
    EntityType, HttpMethod, NetworkStatus, Operation, Payload, Priority, QueueHandle, QueueItem,
    QueueStore, SyncProcessor, SyncReport, SyncStatus, Transport,
};

#[derive(Clone, Default)]
struct RecordingTransport {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, item: &QueueItem) -> Result<()> {
        self.calls.lock().await.push(item.entity_id().to_string());
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or(Ok(()))
    }
}

/// Drops the network after the first send.
struct FlakyLink {
    network: NetworkStatus,
    calls: Arc<Mutex<usize>>,
}

#[async_trait::async_trait]
impl Transport for FlakyLink {
    async fn send(&self, _item: &QueueItem) -> Result<()> {
        *self.calls.lock().await += 1;
        self.network.set_online(false);
        Ok(())
    }
}

/// Removes another queued item while its own send is in flight.
struct RemovingTransport {
    queue: QueueHandle,
    victim: Mutex<Option<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Transport for RemovingTransport {
    async fn send(&self, item: &QueueItem) -> Result<()> {
        self.calls.lock().await.push(item.entity_id().to_string());
        if let Some(id) = self.victim.lock().await.take() {
            self.queue.remove(&id).await?;
        }
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 18, 0, 0).unwrap()
}

fn payment(entity_id: &str, priority: Priority, created: DateTime<Utc>) -> QueueItem {
    QueueItem::create_at(
        EntityType::Payment,
        entity_id,
        Operation::Create,
        Payload::Payment(PaymentPayload {
            amount_minor: 990,
            currency: "USD".into(),
            method: "cash".into(),
            reference: None,
        }),
        "/payments",
        HttpMethod::Post,
        priority,
        created,
    )
    .unwrap()
}

fn trip(entity_id: &str, priority: Priority, created: DateTime<Utc>) -> QueueItem {
    QueueItem::create_at(
        EntityType::Trip,
        entity_id,
        Operation::Update,
        Payload::Trip(TripPayload {
            status: "ENDED".into(),
            started_at: None,
            ended_at: Some(created),
            distance_km: Some(3.2),
        }),
        &format!("/trips/{entity_id}"),
        HttpMethod::Put,
        priority,
        created,
    )
    .unwrap()
}

fn processor(
    queue: &QueueHandle,
    transport: Arc<dyn Transport>,
    network: &NetworkStatus,
) -> SyncProcessor {
    SyncProcessor::new(queue.clone(), transport, network.subscribe())
}

#[tokio::test]
async fn offline_pass_changes_nothing() {
    let queue = QueueHandle::new(QueueStore::new());
    let item = payment("p-1", Priority::Critical, t0());
    let id = item.id().to_string();
    queue.enqueue(item).await.unwrap();

    let network = NetworkStatus::new(false);
    let transport = RecordingTransport::default();
    let processor = processor(&queue, Arc::new(transport.clone()), &network);

    let report = processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(report, SyncReport::default());
    assert!(transport.calls().await.is_empty());
    assert_eq!(queue.get(&id).await.unwrap().status(), SyncStatus::Pending);
    assert!(processor.last_sync().await.is_none());
}

#[tokio::test]
async fn pass_dispatches_bounded_batch_in_priority_order() {
    let queue = QueueHandle::new(QueueStore::new());
    for n in 0..12 {
        queue
            .enqueue(trip(&format!("low-{n:02}"), Priority::Low, t0() + Duration::seconds(n)))
            .await
            .unwrap();
    }
    queue
        .enqueue(trip("med", Priority::Medium, t0()))
        .await
        .unwrap();
    queue
        .enqueue(payment("crit", Priority::Critical, t0() + Duration::minutes(10)))
        .await
        .unwrap();

    let network = NetworkStatus::new(true);
    let transport = RecordingTransport::default();
    let processor = processor(&queue, Arc::new(transport.clone()), &network).with_batch_size(5);

    let now = t0() + Duration::hours(1);
    let report = processor.process_pass_at(now).await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            success_count: 5,
            failed_count: 0
        }
    );
    assert_eq!(
        transport.calls().await,
        vec!["crit", "med", "low-00", "low-01", "low-02"]
    );

    let stats = queue.statistics().await;
    assert_eq!(stats.total_synced, 5);
    assert_eq!(stats.total_pending, 9);
    assert_eq!(stats.syncing, 0);
    assert_eq!(
        processor.last_sync().await.map(|last| last.report),
        Some(report)
    );
}

#[tokio::test]
async fn failure_is_recorded_on_the_item() {
    let queue = QueueHandle::new(QueueStore::new());
    let item = trip("t-9", Priority::High, t0());
    let id = item.id().to_string();
    queue.enqueue(item).await.unwrap();

    let network = NetworkStatus::new(true);
    let transport =
        RecordingTransport::with_responses(vec![Err(anyhow!("backend error 503: unavailable"))]);
    let processor = processor(&queue, Arc::new(transport), &network);

    let report = processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(report.failed_count, 1);

    let item = queue.get(&id).await.unwrap();
    assert_eq!(item.status(), SyncStatus::Failed);
    assert_eq!(item.retry_count(), 1);
    assert_eq!(item.last_retry_at(), Some(t0()));
    assert_eq!(item.last_error(), Some("backend error 503: unavailable"));
    assert_eq!(queue.statistics().await.total_failed, 1);
}

#[tokio::test]
async fn item_without_retries_needs_support_after_one_failure() {
    let queue = QueueHandle::new(QueueStore::new());
    let item = payment("p-0", Priority::Critical, t0()).with_max_retries(0);
    let id = item.id().to_string();
    queue.enqueue(item).await.unwrap();

    let network = NetworkStatus::new(true);
    let transport = RecordingTransport::with_responses(vec![Err(anyhow!("card declined"))]);
    let processor = processor(&queue, Arc::new(transport.clone()), &network);

    processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(
        queue.get(&id).await.unwrap().status(),
        SyncStatus::RequiresSupport
    );

    let report = processor
        .process_pass_at(t0() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(transport.calls().await.len(), 1);
    assert_eq!(queue.requires_support().await.len(), 1);
}

#[tokio::test]
async fn critical_item_recovers_after_two_failures() {
    let queue = QueueHandle::new(QueueStore::new());
    let item = payment("p-42", Priority::Critical, t0()).with_max_retries(2);
    let id = item.id().to_string();
    queue.enqueue(item).await.unwrap();

    let network = NetworkStatus::new(true);
    let transport = RecordingTransport::with_responses(vec![
        Err(anyhow!("timeout")),
        Err(anyhow!("timeout")),
        Ok(()),
    ]);
    let processor = processor(&queue, Arc::new(transport.clone()), &network);

    let first = processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(first.failed_count, 1);

    // still inside the 2s window
    let early = processor
        .process_pass_at(t0() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(early, SyncReport::default());

    let second = processor
        .process_pass_at(t0() + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(second.failed_count, 1);

    // second failure doubles the wait to 4s
    let third = processor
        .process_pass_at(t0() + Duration::seconds(6))
        .await
        .unwrap();
    assert_eq!(third.success_count, 1);

    let item = queue.get(&id).await.unwrap();
    assert_eq!(item.status(), SyncStatus::Synced);
    assert_eq!(item.retry_count(), 2);
    assert_eq!(item.last_error(), None);
    assert_eq!(transport.calls().await.len(), 3);
}

#[tokio::test]
async fn pass_stops_when_network_drops() {
    let queue = QueueHandle::new(QueueStore::new());
    for n in 0..3 {
        queue
            .enqueue(trip(&format!("t-{n}"), Priority::Medium, t0() + Duration::seconds(n)))
            .await
            .unwrap();
    }

    let network = NetworkStatus::new(true);
    let calls = Arc::new(Mutex::new(0));
    let link = FlakyLink {
        network: network.clone(),
        calls: calls.clone(),
    };
    let processor = processor(&queue, Arc::new(link), &network);

    let report = processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(report.success_count, 1);
    assert_eq!(*calls.lock().await, 1);

    let stats = queue.statistics().await;
    assert_eq!(stats.total_synced, 1);
    assert_eq!(stats.total_pending, 2);
    assert_eq!(stats.syncing, 0);
}

#[tokio::test]
async fn concurrent_passes_do_not_double_send() {
    let queue = QueueHandle::new(QueueStore::new());
    for n in 0..4 {
        queue
            .enqueue(trip(&format!("t-{n}"), Priority::Medium, t0() + Duration::seconds(n)))
            .await
            .unwrap();
    }

    let network = NetworkStatus::new(true);
    let transport = RecordingTransport::default();
    let processor = Arc::new(processor(&queue, Arc::new(transport.clone()), &network));

    let (a, b) = tokio::join!(
        processor.process_pass_at(t0()),
        processor.process_pass_at(t0())
    );
    let total = a.unwrap().success_count + b.unwrap().success_count;
    assert_eq!(total, 4);
    assert_eq!(transport.calls().await.len(), 4);
}

#[tokio::test]
async fn item_removed_mid_pass_is_skipped() {
    let queue = QueueHandle::new(QueueStore::new());
    let mut ids = Vec::new();
    for (n, name) in ["a", "b", "c"].into_iter().enumerate() {
        let item = trip(name, Priority::Medium, t0() + Duration::seconds(n as i64));
        ids.push(item.id().to_string());
        queue.enqueue(item).await.unwrap();
    }

    let network = NetworkStatus::new(true);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let transport = RemovingTransport {
        queue: queue.clone(),
        victim: Mutex::new(Some(ids[1].clone())),
        calls: calls.clone(),
    };
    let processor = processor(&queue, Arc::new(transport), &network);

    let report = processor.process_pass_at(t0()).await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            success_count: 2,
            failed_count: 0
        }
    );
    assert_eq!(*calls.lock().await, vec!["a", "c"]);
    assert!(queue.get(&ids[1]).await.is_none());
    assert_eq!(queue.get(&ids[2]).await.unwrap().status(), SyncStatus::Synced);
    assert_eq!(
        processor.last_sync().await.map(|last| last.report),
        Some(report)
    );
}
