use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Delivery,
    Pod,
    Location,
    Trip,
    Payment,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Delivery,
        EntityType::Pod,
        EntityType::Location,
        EntityType::Trip,
        EntityType::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Delivery => "DELIVERY",
            EntityType::Pod => "POD",
            EntityType::Location => "LOCATION",
            EntityType::Trip => "TRIP",
            EntityType::Payment => "PAYMENT",
        }
    }

    /// Retry ceiling used when nothing else is configured.
    pub fn default_max_retries(&self) -> u32 {
        match self {
            EntityType::Location => 5,
            _ => 3,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queue item.
///
/// `Synced` and `RequiresSupport` are terminal. `Syncing` only exists while
/// a transport call is in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    RequiresSupport,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::RequiresSupport => "REQUIRES_SUPPORT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::RequiresSupport)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(QueueError::InvalidItem(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

/// Delivery status change reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub status: String,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Proof of delivery: signature and photos captured at the door.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofOfDeliveryPayload {
    pub delivery_id: String,
    #[serde(default)]
    pub signature_url: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// One or more GPS fixes uploaded together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    #[serde(default)]
    pub trip_id: Option<String>,
    pub points: Vec<LocationPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripPayload {
    pub status: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

/// Amounts are in minor currency units (cents).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub amount_minor: i64,
    pub currency: String,
    pub method: String,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Body of a queue item, one variant per entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entityType", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Delivery(DeliveryPayload),
    Pod(ProofOfDeliveryPayload),
    Location(LocationPayload),
    Trip(TripPayload),
    Payment(PaymentPayload),
}

impl Payload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Payload::Delivery(_) => EntityType::Delivery,
            Payload::Pod(_) => EntityType::Pod,
            Payload::Location(_) => EntityType::Location,
            Payload::Trip(_) => EntityType::Trip,
            Payload::Payment(_) => EntityType::Payment,
        }
    }

    /// JSON body sent to the backend, without the entity tag.
    pub fn to_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Payload::Delivery(p) => serde_json::to_value(p),
            Payload::Pod(p) => serde_json::to_value(p),
            Payload::Location(p) => serde_json::to_value(p),
            Payload::Trip(p) => serde_json::to_value(p),
            Payload::Payment(p) => serde_json::to_value(p),
        }
    }
}

/// A unit of pending work.
///
/// Identity, addressing and priority are fixed once the item is built; the
/// retry bookkeeping and status are only changed by the queue store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    id: String,
    entity_type: EntityType,
    entity_id: String,
    operation: Operation,
    priority: Priority,
    pub(crate) status: SyncStatus,
    payload: Payload,
    endpoint: String,
    method: HttpMethod,
    pub(crate) retry_count: u32,
    max_retries: u32,
    pub(crate) last_retry_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
    created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Build a pending item stamped with the current time.
    pub fn create(
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Payload,
        endpoint: &str,
        method: HttpMethod,
        priority: Priority,
    ) -> Result<Self, QueueError> {
        Self::create_at(
            entity_type,
            entity_id,
            operation,
            payload,
            endpoint,
            method,
            priority,
            Utc::now(),
        )
    }

    /// Same as [`QueueItem::create`] with an explicit creation time.
    #[allow(clippy::too_many_arguments)]
    pub fn create_at(
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Payload,
        endpoint: &str,
        method: HttpMethod,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(QueueError::InvalidItem("entity id must be non-empty".into()));
        }
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(QueueError::InvalidItem("endpoint must be non-empty".into()));
        }
        if payload.entity_type() != entity_type {
            return Err(QueueError::InvalidItem(format!(
                "payload is for {} but item is {}",
                payload.entity_type(),
                entity_type
            )));
        }

        Ok(Self {
            id: format!("{}_{}_{}", entity_type, entity_id, now.timestamp_millis()),
            entity_type,
            entity_id: entity_id.to_string(),
            operation,
            priority,
            status: SyncStatus::Pending,
            payload,
            endpoint: endpoint.to_string(),
            method,
            retry_count: 0,
            max_retries: entity_type.default_max_retries(),
            last_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Override the retry ceiling. Only meaningful before the item is enqueued.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_retry_at(&self) -> Option<DateTime<Utc>> {
        self.last_retry_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
