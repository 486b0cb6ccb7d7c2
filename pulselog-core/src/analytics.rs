//! Process-wide entry point for recording events
//!
//! [`Analytics`] is an explicitly constructed service. Hosts create one per
//! process and hand `Arc<Analytics>` to producers; nothing is reached through
//! global state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pulselog_core::{Analytics, Config, EventPayload};
//! use pulselog_core::delivery::HttpDeliveryClient;
//! use pulselog_core::device::FileDeviceId;
//! use pulselog_core::sync::SyncCoordinator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> pulselog_core::Result<()> {
//! let config = Config::load()?;
//! let analytics = Arc::new(Analytics::from_config(&config));
//! let device = Arc::new(FileDeviceId::default_location());
//! let client = Arc::new(HttpDeliveryClient::new(&config.collector, device.clone())?);
//! let sync = Arc::new(SyncCoordinator::from_config(
//!     &config.sync,
//!     analytics.buffer().clone(),
//!     client,
//!     device,
//! ));
//!
//! let cancel = CancellationToken::new();
//! analytics.init(&cancel);
//! analytics.enable_auto_sync(sync, cancel.clone());
//!
//! analytics.click("payment_methods", Some("pay_button"));
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::EventBuffer;
use crate::config::Config;
use crate::session::SessionTracker;
use crate::sync::SyncCoordinator;
use crate::trigger::{FlushRequest, FlushTrigger};
use crate::types::{EventDraft, EventType, PaymentContext};

/// Key added to every event's `extra` payload
pub const AUTO_LOGIN_KEY: &str = "isAutoLoginEnable";

/// Optional payloads attached to a recorded event
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    /// Short action label, sent as `{"what": ...}` in the action details
    pub what: Option<String>,
    pub extra: Map<String, Value>,
    pub page: Map<String, Value>,
}

impl EventPayload {
    pub fn what(what: impl Into<String>) -> Self {
        Self {
            what: Some(what.into()),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_page(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.page.insert(key.into(), value.into());
        self
    }
}

#[derive(Default)]
struct RecordContext {
    payment: PaymentContext,
    auto_login_enabled: bool,
}

/// Records events into the buffer and raises debounced flush requests
pub struct Analytics {
    buffer: Arc<EventBuffer>,
    sessions: SessionTracker,
    trigger: FlushTrigger,
    context: Mutex<RecordContext>,
    debouncer: Mutex<Option<JoinHandle<()>>>,
}

impl Analytics {
    pub fn new(buffer: Arc<EventBuffer>, sessions: SessionTracker, trigger: FlushTrigger) -> Self {
        Self {
            buffer,
            sessions,
            trigger,
            context: Mutex::new(RecordContext::default()),
            debouncer: Mutex::new(None),
        }
    }

    /// Wire a fresh buffer, session tracker and trigger from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(EventBuffer::new(
                config.buffer.capacity,
                config.buffer.flush_threshold,
            )),
            SessionTracker::new(config.session.timeout()),
            FlushTrigger::new(config.sync.debounce()),
        )
    }

    /// Start the flush debouncer. Calling it again while it runs is a no-op.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn init(&self, cancel: &CancellationToken) {
        let mut debouncer = self.debouncer.lock().unwrap_or_else(PoisonError::into_inner);
        if debouncer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *debouncer = Some(self.trigger.spawn_debouncer(cancel.child_token()));
        tracing::info!(
            capacity = self.buffer.capacity(),
            threshold = self.buffer.threshold(),
            debounce_ms = self.trigger.window().as_millis() as u64,
            "Analytics initialized"
        );
    }

    /// Reset session state. Pending events are kept for a final flush.
    pub fn shutdown(&self) {
        self.sessions.reset();
        tracing::info!(pending = self.buffer.len(), "Analytics session reset");
    }

    /// Record one event. Never blocks beyond the buffer's critical section.
    pub fn record(&self, event_type: EventType, where_: &str, payload: EventPayload) {
        let (payment, auto_login) = {
            let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
            (context.payment.clone(), context.auto_login_enabled)
        };

        let mut extra = payload.extra;
        extra.insert(AUTO_LOGIN_KEY.to_string(), Value::Bool(auto_login));

        let mut draft = EventDraft::new(self.sessions.current_session_id(), event_type, where_);
        draft.action_details = payload
            .what
            .map(|what| serde_json::json!({ "what": what }).to_string());
        draft.extra = Some(Value::Object(extra).to_string());
        draft.page_details = Some(Value::Object(payload.page).to_string());
        draft.payment = payment;

        let appended = self.buffer.append(draft);
        tracing::trace!(id = appended.id, event_type = %event_type, where_, "Recorded event");

        if let Some(signal) = appended.signal {
            tracing::debug!(pending = signal.pending, "Flush threshold reached");
            self.trigger.signal();
        }
    }

    pub fn click(&self, where_: &str, what: Option<&str>) {
        let payload = what.map(EventPayload::what).unwrap_or_default();
        self.record(EventType::Click, where_, payload);
    }

    pub fn swipe(&self, where_: &str) {
        self.record(EventType::Swipe, where_, EventPayload::default());
    }

    pub fn close(&self, where_: &str) {
        self.record(EventType::Close, where_, EventPayload::default());
    }

    pub fn load(&self, where_: &str) {
        self.record(EventType::Load, where_, EventPayload::default());
    }

    pub fn visit(&self, where_: &str) {
        self.record(EventType::Visit, where_, EventPayload::default());
    }

    pub fn process(&self, where_: &str, what: &str) {
        self.record(EventType::Process, where_, EventPayload::what(what));
    }

    pub fn change_focus(&self, where_: &str) {
        self.record(EventType::ChangeFocus, where_, EventPayload::default());
    }

    // Business context, captured into each event at record time

    pub fn set_checkout_token(&self, token: impl Into<String>) {
        self.with_context(|c| c.payment.checkout_token = Some(token.into()));
    }

    pub fn set_merchant_name(&self, name: impl Into<String>) {
        self.with_context(|c| c.payment.merchant_name = Some(name.into()));
    }

    pub fn set_amount(&self, amount: impl Into<String>) {
        self.with_context(|c| c.payment.amount = Some(amount.into()));
    }

    pub fn set_auto_login_enabled(&self, enabled: bool) {
        self.with_context(|c| c.auto_login_enabled = enabled);
    }

    fn with_context(&self, f: impl FnOnce(&mut RecordContext)) {
        f(&mut self.context.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn current_session_id(&self) -> String {
        self.sessions.current_session_id()
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    /// Debounced flush requests, for a host-owned scheduler
    pub fn flush_requests(&self) -> broadcast::Receiver<FlushRequest> {
        self.trigger.subscribe()
    }

    /// Shared handle to the buffer, for building a [`SyncCoordinator`]
    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Flush through `sync` on every debounced request until `cancel` fires
    pub fn enable_auto_sync(
        &self,
        sync: Arc<SyncCoordinator>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut requests = self.flush_requests();
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = requests.recv() => request,
                };
                match request {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let outcome = sync.flush_once(&cancel).await;
                        tracing::debug!(?outcome, "Auto sync flush finished");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Auto sync stopped");
        })
    }
}
