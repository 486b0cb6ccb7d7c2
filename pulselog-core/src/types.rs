//! Core domain types for pulselog
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One discrete user/application occurrence ([`EventRecord`]) |
//! | **Session** | A window of activity sharing one session id (see [`SessionTracker`](crate::session::SessionTracker)) |
//! | **Watermark** | Highest event id confirmed delivered by the collector |
//! | **Flush cycle** | One snapshot → deliver → acknowledge pass |
//!
//! Records are immutable once appended. The only ways a record leaves the
//! buffer are acknowledgement after confirmed delivery or an overflow clear.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DeliveryError;

// ============================================
// Events
// ============================================

/// Category of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    UnknownType,
    Click,
    Swipe,
    Process,
    Load,
    Close,
    Visit,
    ChangeFocus,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UnknownType => "UNKNOWN_TYPE",
            EventType::Click => "CLICK",
            EventType::Swipe => "SWIPE",
            EventType::Process => "PROCESS",
            EventType::Load => "LOAD",
            EventType::Close => "CLOSE",
            EventType::Visit => "VISIT",
            EventType::ChangeFocus => "CHANGE_FOCUS",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "unknown" | "unknown_type" => Ok(EventType::UnknownType),
            "click" => Ok(EventType::Click),
            "swipe" => Ok(EventType::Swipe),
            "process" => Ok(EventType::Process),
            "load" => Ok(EventType::Load),
            "close" => Ok(EventType::Close),
            "visit" => Ok(EventType::Visit),
            "change_focus" => Ok(EventType::ChangeFocus),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Business context captured at record time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentContext {
    #[serde(rename = "checkout_id")]
    pub checkout_token: Option<String>,
    pub merchant_name: Option<String>,
    pub amount: Option<String>,
}

/// An event before the buffer has assigned it an id
///
/// Producers build drafts; [`EventBuffer::append`](crate::buffer::EventBuffer::append)
/// turns them into [`EventRecord`]s inside its critical section.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub session_id: String,
    pub event_type: EventType,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    pub where_: Option<String>,
    pub action_details: Option<String>,
    pub extra: Option<String>,
    pub page_details: Option<String>,
    pub payment: PaymentContext,
}

impl EventDraft {
    /// Draft stamped with the current wall-clock time and empty payloads
    pub fn new(session_id: impl Into<String>, event_type: EventType, where_: &str) -> Self {
        Self {
            session_id: session_id.into(),
            event_type,
            timestamp: Utc::now().timestamp(),
            where_: Some(where_.to_string()),
            action_details: None,
            extra: None,
            page_details: None,
            payment: PaymentContext::default(),
        }
    }

    pub(crate) fn into_record(self, id: u64) -> EventRecord {
        EventRecord {
            id,
            session_id: self.session_id,
            event_type: self.event_type,
            timestamp: self.timestamp,
            where_: self.where_,
            action_details: self.action_details,
            extra: self.extra,
            page_details: self.page_details,
            payment: self.payment,
        }
    }
}

/// One recorded occurrence, immutable after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Strictly increasing for the lifetime of the buffer that assigned it
    pub id: u64,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    #[serde(rename = "where")]
    pub where_: Option<String>,
    /// Opaque JSON string
    pub action_details: Option<String>,
    /// Opaque JSON string
    pub extra: Option<String>,
    /// Opaque JSON string
    pub page_details: Option<String>,
    pub payment: PaymentContext,
}

// ============================================
// Delivery
// ============================================

/// Wire shape of one event posted to the collector
///
/// Built from an [`EventRecord`] plus cross-cutting fields owned by
/// collaborators (source tag and device id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub id: u64,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The session id travels as the collector's trace id
    pub trace_id: String,
    pub timestamp: i64,
    pub device_id: String,
    #[serde(rename = "where")]
    pub where_: Option<String>,
    pub action_details: Option<String>,
    pub extra: Option<String>,
    pub page_details: Option<String>,
    #[serde(rename = "payment_flow_details")]
    pub payment: PaymentContext,
    /// Content hash the collector can use to drop redelivered duplicates (32-char hex)
    pub event_hash: String,
}

impl EnrichedEvent {
    pub fn from_record(record: &EventRecord, source: &str, device_id: &str) -> Self {
        EnrichedEvent {
            id: record.id,
            source: source.to_string(),
            event_type: record.event_type,
            trace_id: record.session_id.clone(),
            timestamp: record.timestamp,
            device_id: device_id.to_string(),
            where_: record.where_.clone(),
            action_details: record.action_details.clone(),
            extra: record.extra.clone(),
            page_details: record.page_details.clone(),
            payment: record.payment.clone(),
            event_hash: compute_event_hash(record, device_id),
        }
    }
}

/// SHA-256 over the identity of a record on one device, truncated to 16 bytes.
///
/// Ids restart with the process, so the device id and session id are mixed in
/// to keep hashes from colliding across runs.
fn compute_event_hash(record: &EventRecord, device_id: &str) -> String {
    let hash_input = format!(
        "{}:{}:{}:{}:{}",
        device_id,
        record.session_id,
        record.id,
        record.event_type.as_str(),
        record.timestamp
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    hex::encode(&result[..16])
}

/// Request body for the batch-write endpoint
#[derive(Debug, Serialize)]
pub struct EventBatchRequest<'a> {
    pub events: &'a [EnrichedEvent],
}

// ============================================
// Sync results
// ============================================

/// Result of one [`SyncCoordinator::flush_once`](crate::sync::SyncCoordinator::flush_once) call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The whole batch was delivered and acknowledged
    Success { count: usize },
    /// Delivery failed or was cancelled; the watermark did not move
    Failure { error: DeliveryError, count: usize },
    /// Nothing was pending
    NoOp,
    /// Another flush was already in flight; this trigger was dropped
    Coalesced,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

/// Latest sync state, published for UI/host observation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    InProgress { count: usize },
    Success { count: usize },
    Failure { message: String, count: usize },
}
