//! Domain events raised by the app and the queue items they turn into.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Retries;
use crate::error::QueueError;
use crate::model::{
    DeliveryPayload, EntityType, HttpMethod, LocationPayload, LocationPoint, Operation, Payload,
    PaymentPayload, Priority, ProofOfDeliveryPayload, QueueItem, TripPayload,
};
use crate::queue::{EnqueueOutcome, QueueHandle};

/// GPS fixes buffered before a location upload is queued.
pub const LOCATION_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    LocationCaptured {
        driver_id: String,
        #[serde(default)]
        trip_id: Option<String>,
        point: LocationPoint,
    },
    #[serde(rename_all = "camelCase")]
    DeliveryCompleted {
        delivery_id: String,
        delivery: DeliveryPayload,
        #[serde(default)]
        proof: Option<ProofOfDeliveryPayload>,
    },
    /// Proof captured after the delivery itself was already reported.
    #[serde(rename_all = "camelCase")]
    ProofCaptured { proof: ProofOfDeliveryPayload },
    #[serde(rename_all = "camelCase")]
    PaymentProcessed {
        payment_id: String,
        payment: PaymentPayload,
    },
    #[serde(rename_all = "camelCase")]
    TripUpdated { trip_id: String, trip: TripPayload },
}

/// Turns events into queue items, batching location fixes.
#[derive(Debug)]
pub struct EventRouter {
    retries: Retries,
    locations: LocationBatcher,
}

impl EventRouter {
    pub fn new(retries: Retries) -> Self {
        Self {
            retries,
            locations: LocationBatcher::new(LOCATION_BATCH_SIZE),
        }
    }

    pub fn with_location_batch_size(mut self, batch_size: usize) -> Self {
        self.locations = LocationBatcher::new(batch_size);
        self
    }

    /// Items produced by `event`. Location events usually produce nothing
    /// until their batch fills.
    pub fn route(
        &mut self,
        event: SyncEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        let items = match event {
            SyncEvent::LocationCaptured {
                driver_id,
                trip_id,
                point,
            } => self.locations.push(&driver_id, trip_id, point, now)?,
            SyncEvent::DeliveryCompleted {
                delivery_id,
                delivery,
                proof,
            } => {
                let mut items = vec![QueueItem::create_at(
                    EntityType::Delivery,
                    &delivery_id,
                    Operation::Update,
                    Payload::Delivery(delivery),
                    &format!("/deliveries/{delivery_id}/complete"),
                    HttpMethod::Post,
                    Priority::High,
                    now,
                )?];
                if let Some(proof) = proof {
                    items.push(proof_item(&delivery_id, proof, now)?);
                }
                items
            }
            SyncEvent::ProofCaptured { proof } => {
                let delivery_id = proof.delivery_id.clone();
                vec![proof_item(&delivery_id, proof, now)?]
            }
            SyncEvent::PaymentProcessed {
                payment_id,
                payment,
            } => vec![QueueItem::create_at(
                EntityType::Payment,
                &payment_id,
                Operation::Create,
                Payload::Payment(payment),
                "/payments",
                HttpMethod::Post,
                Priority::Critical,
                now,
            )?],
            SyncEvent::TripUpdated { trip_id, trip } => vec![QueueItem::create_at(
                EntityType::Trip,
                &trip_id,
                Operation::Update,
                Payload::Trip(trip),
                &format!("/trips/{trip_id}"),
                HttpMethod::Put,
                Priority::Medium,
                now,
            )?],
        };
        Ok(self.apply_retry_limits(items))
    }

    /// Queue whatever location fixes are still buffered.
    pub fn flush_locations(&mut self, now: DateTime<Utc>) -> Result<Vec<QueueItem>, QueueError> {
        let items = self.locations.flush(now)?.into_iter().collect();
        Ok(self.apply_retry_limits(items))
    }

    /// Route `event` and enqueue the result. Returns how many items were
    /// queued; re-sends of already synced items are not counted.
    pub async fn submit(&mut self, queue: &QueueHandle, event: SyncEvent) -> Result<usize, QueueError> {
        let items = self.route(event, Utc::now())?;
        enqueue_all(queue, items).await
    }

    pub async fn submit_flush(&mut self, queue: &QueueHandle) -> Result<usize, QueueError> {
        let items = self.flush_locations(Utc::now())?;
        enqueue_all(queue, items).await
    }

    fn apply_retry_limits(&self, items: Vec<QueueItem>) -> Vec<QueueItem> {
        items
            .into_iter()
            .map(|item| {
                let max_retries = self.retries.max_retries_for(item.entity_type());
                item.with_max_retries(max_retries)
            })
            .collect()
    }
}

fn proof_item(
    delivery_id: &str,
    proof: ProofOfDeliveryPayload,
    now: DateTime<Utc>,
) -> Result<QueueItem, QueueError> {
    QueueItem::create_at(
        EntityType::Pod,
        delivery_id,
        Operation::Create,
        Payload::Pod(proof),
        &format!("/deliveries/{delivery_id}/proof"),
        HttpMethod::Post,
        Priority::High,
        now,
    )
}

/// Enqueue `items`, counting those that were inserted or replaced.
async fn enqueue_all(queue: &QueueHandle, items: Vec<QueueItem>) -> Result<usize, QueueError> {
    let mut queued = 0;
    for item in items {
        match queue.enqueue(item).await? {
            EnqueueOutcome::Inserted | EnqueueOutcome::Replaced => queued += 1,
            EnqueueOutcome::AlreadySynced => {}
        }
    }
    Ok(queued)
}

/// Buffers fixes for one driver/trip and emits them as a single item.
#[derive(Debug)]
pub struct LocationBatcher {
    batch_size: usize,
    owner: Option<(String, Option<String>)>,
    points: Vec<LocationPoint>,
    last_flush: Option<DateTime<Utc>>,
}

impl LocationBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            owner: None,
            points: Vec::new(),
            last_flush: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Buffer a fix. A different driver or trip flushes the previous batch
    /// first; a full batch is flushed immediately.
    pub fn push(
        &mut self,
        driver_id: &str,
        trip_id: Option<String>,
        point: LocationPoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        if driver_id.trim().is_empty() {
            return Err(QueueError::InvalidItem("driver id must be non-empty".into()));
        }
        let mut out = Vec::new();
        let same_owner = self
            .owner
            .as_ref()
            .map_or(true, |(d, t)| d == driver_id && *t == trip_id);
        if !same_owner {
            out.extend(self.flush(now)?);
        }
        if self.owner.is_none() {
            self.owner = Some((driver_id.to_string(), trip_id));
        }
        self.points.push(point);
        if self.points.len() >= self.batch_size {
            out.extend(self.flush(now)?);
        }
        Ok(out)
    }

    /// Emit the buffered fixes as one item. On error the buffer is left as is.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Result<Option<QueueItem>, QueueError> {
        if self.points.is_empty() {
            return Ok(None);
        }
        let Some((driver_id, trip_id)) = self.owner.as_ref() else {
            return Ok(None);
        };
        // ids embed the creation millisecond; keep them unique per driver
        let created = match self.last_flush {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };

        let item = QueueItem::create_at(
            EntityType::Location,
            driver_id,
            Operation::Create,
            Payload::Location(LocationPayload {
                trip_id: trip_id.clone(),
                points: self.points.clone(),
            }),
            &format!("/drivers/{driver_id}/locations"),
            HttpMethod::Post,
            Priority::Low,
            created,
        )?;
        debug!(driver_id = %driver_id, points = self.points.len(), "flushing location batch");

        self.points.clear();
        self.owner = None;
        self.last_flush = Some(created);
        Ok(Some(item))
    }
}
