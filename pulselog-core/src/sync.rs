//! Flush cycle: snapshot pending events, deliver with retry, acknowledge
//!
//! The watermark only moves after the collector confirmed the whole batch,
//! which gives at-least-once delivery. A failed, exhausted or cancelled
//! flush leaves the buffer untouched so the same events go out next cycle.
//!
//! At most one flush runs at a time. A flush requested while another is in
//! flight is dropped ([`SyncOutcome::Coalesced`]); anything it would have
//! carried is still buffered for the next cycle.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::buffer::EventBuffer;
use crate::config::SyncConfig;
use crate::delivery::DeliveryClient;
use crate::device::DeviceIdProvider;
use crate::error::DeliveryError;
use crate::types::{EnrichedEvent, SyncOutcome, SyncStatus};

/// Bounded retry with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Attempt `n` (1-based) is followed by a wait of `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt that follows `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_delay(),
        }
    }
}

/// Running totals across flushes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Flush cycles that found events to send
    pub flushes: usize,
    /// Events acknowledged by the collector
    pub events_sent: usize,
    /// Individual send attempts
    pub api_calls: usize,
    /// Flush cycles that ended without acknowledgement (cancellation excluded)
    pub api_failures: usize,
    /// Flush requests dropped because another flush was in flight
    pub coalesced: usize,
}

/// Owns the flush cycle for one [`EventBuffer`]
pub struct SyncCoordinator {
    buffer: Arc<EventBuffer>,
    client: Arc<dyn DeliveryClient>,
    device: Arc<dyn DeviceIdProvider>,
    source: String,
    retry: RetryPolicy,
    in_flight: tokio::sync::Mutex<()>,
    stats: Mutex<SyncStats>,
    status: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        buffer: Arc<EventBuffer>,
        client: Arc<dyn DeliveryClient>,
        device: Arc<dyn DeviceIdProvider>,
        source: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            buffer,
            client,
            device,
            source: source.into(),
            retry,
            in_flight: tokio::sync::Mutex::new(()),
            stats: Mutex::new(SyncStats::default()),
            status,
        }
    }

    /// Build a coordinator using the retry and source settings from config
    pub fn from_config(
        config: &SyncConfig,
        buffer: Arc<EventBuffer>,
        client: Arc<dyn DeliveryClient>,
        device: Arc<dyn DeviceIdProvider>,
    ) -> Self {
        Self::new(buffer, client, device, config.source.clone(), config.into())
    }

    /// Run one flush cycle
    ///
    /// Never returns an error: every failure is reported through the outcome.
    /// Dropping the returned future, or cancelling `cancel`, aborts the cycle
    /// without touching the watermark and releases the single-flight lock.
    pub async fn flush_once(&self, cancel: &CancellationToken) -> SyncOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Flush already in flight; coalescing");
            self.update_stats(|s| s.coalesced += 1);
            return SyncOutcome::Coalesced;
        };

        let snapshot = self.buffer.pending_snapshot();
        let Some(last_id) = snapshot.last().map(|r| r.id) else {
            return SyncOutcome::NoOp;
        };
        let count = snapshot.len();

        let device_id = self.device.device_id();
        let batch: Vec<EnrichedEvent> = snapshot
            .iter()
            .map(|record| EnrichedEvent::from_record(record, &self.source, &device_id))
            .collect();
        drop(snapshot);

        self.update_stats(|s| s.flushes += 1);
        self.status.send_replace(SyncStatus::InProgress { count });

        match self.deliver_with_retry(&batch, cancel).await {
            Ok(()) => {
                self.buffer.acknowledge(last_id);
                self.update_stats(|s| s.events_sent += count);
                self.status.send_replace(SyncStatus::Success { count });
                tracing::debug!(count, watermark = last_id, "Delivered events");
                SyncOutcome::Success { count }
            }
            Err(error) => {
                if error.is_cancelled() {
                    tracing::debug!(count, "Flush cancelled; events stay pending");
                } else {
                    self.update_stats(|s| s.api_failures += 1);
                    tracing::warn!(count, error = %error, "Failed to deliver events");
                }
                self.status.send_replace(SyncStatus::Failure {
                    message: error.to_string(),
                    count,
                });
                SyncOutcome::Failure { error, count }
            }
        }
    }

    async fn deliver_with_retry(
        &self,
        batch: &[EnrichedEvent],
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let mut attempt = 1;
        loop {
            self.update_stats(|s| s.api_calls += 1);

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                result = self.client.send_batch(batch) => result,
            };

            let error = match result {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => e,
            };

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient delivery failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Current publishing statistics
    pub fn stats(&self) -> SyncStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observe sync progress; new subscribers see the latest status immediately
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDeviceId;
    use crate::types::{EventDraft, EventType};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays scripted results, then succeeds
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<(), DeliveryError>>>,
        batches: Mutex<Vec<Vec<u64>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                batches: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeliveryClient for ScriptedClient {
        async fn send_batch(&self, events: &[EnrichedEvent]) -> Result<(), DeliveryError> {
            self.batches
                .lock()
                .unwrap()
                .push(events.iter().map(|e| e.id).collect());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn transient() -> Result<(), DeliveryError> {
        Err(DeliveryError::Transient("503".into()))
    }

    fn coordinator(buffer: Arc<EventBuffer>, client: Arc<ScriptedClient>) -> SyncCoordinator {
        SyncCoordinator::new(
            buffer,
            client,
            Arc::new(StaticDeviceId("device-1".into())),
            "RUST_SDK",
            RetryPolicy::default(),
        )
    }

    fn filled(n: usize) -> Arc<EventBuffer> {
        let buffer = Arc::new(EventBuffer::new(120, 40));
        for _ in 0..n {
            buffer.append(EventDraft::new("s", EventType::Load, "home"));
        }
        buffer
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_empty_buffer_is_noop() {
        let client = ScriptedClient::new(vec![]);
        let sync = coordinator(filled(0), client.clone());

        assert_eq!(sync.flush_once(&CancellationToken::new()).await, SyncOutcome::NoOp);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_acknowledges_batch() {
        let buffer = filled(45);
        let client = ScriptedClient::new(vec![]);
        let sync = coordinator(buffer.clone(), client.clone());

        let outcome = sync.flush_once(&CancellationToken::new()).await;

        assert_eq!(outcome, SyncOutcome::Success { count: 45 });
        assert_eq!(buffer.watermark(), Some(45));
        assert!(buffer.is_empty());
        assert_eq!(client.batches.lock().unwrap()[0], (1..=45).collect::<Vec<u64>>());
        assert_eq!(*sync.subscribe_status().borrow(), SyncStatus::Success { count: 45 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let buffer = filled(3);
        let client = ScriptedClient::new(vec![transient(), transient()]);
        let sync = coordinator(buffer.clone(), client.clone());

        let outcome = sync.flush_once(&CancellationToken::new()).await;

        assert_eq!(outcome, SyncOutcome::Success { count: 3 });
        assert_eq!(client.calls(), 3);
        assert_eq!(sync.stats().api_calls, 3);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_state_untouched() {
        let buffer = filled(5);
        let client = ScriptedClient::new(vec![transient(), transient(), transient()]);
        let sync = coordinator(buffer.clone(), client.clone());

        let outcome = sync.flush_once(&CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            SyncOutcome::Failure {
                error: DeliveryError::Transient(_),
                count: 5
            }
        ));
        assert_eq!(client.calls(), 3);
        assert_eq!(buffer.watermark(), None);
        assert_eq!(buffer.len(), 5);
        assert_eq!(sync.stats().api_failures, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let buffer = filled(2);
        let client = ScriptedClient::new(vec![Err(DeliveryError::Rejected {
            status: 422,
            message: "invalid".into(),
        })]);
        let sync = coordinator(buffer.clone(), client.clone());

        let outcome = sync.flush_once(&CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            SyncOutcome::Failure {
                error: DeliveryError::Rejected { status: 422, .. },
                count: 2
            }
        ));
        assert_eq!(client.calls(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let buffer = filled(4);
        let client = ScriptedClient::new(vec![transient(), transient(), transient()]);
        let sync = coordinator(buffer.clone(), client.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let outcome = sync.flush_once(&cancel).await;

        assert_eq!(
            outcome,
            SyncOutcome::Failure {
                error: DeliveryError::Cancelled,
                count: 4
            }
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(buffer.watermark(), None);
        assert_eq!(buffer.len(), 4);
        assert_eq!(sync.stats().api_failures, 0);

        // The single-flight lock was released
        let outcome = sync.flush_once(&CancellationToken::new()).await;
        assert_eq!(outcome, SyncOutcome::Success { count: 4 });
    }

    /// Never answers
    struct StalledClient;

    #[async_trait]
    impl DeliveryClient for StalledClient {
        async fn send_batch(&self, _events: &[EnrichedEvent]) -> Result<(), DeliveryError> {
            std::future::pending::<Result<(), DeliveryError>>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_send_in_flight() {
        let buffer = filled(3);
        let sync = SyncCoordinator::new(
            buffer.clone(),
            Arc::new(StalledClient),
            Arc::new(StaticDeviceId("device-1".into())),
            "RUST_SDK",
            RetryPolicy::default(),
        );
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let outcome = sync.flush_once(&cancel).await;

        assert_eq!(
            outcome,
            SyncOutcome::Failure {
                error: DeliveryError::Cancelled,
                count: 3
            }
        );
        assert_eq!(buffer.watermark(), None);
        assert_eq!(buffer.len(), 3);
        assert_eq!(sync.stats().api_calls, 1);
        assert_eq!(sync.stats().api_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_flush_releases_lock() {
        let buffer = filled(3);
        let sync = SyncCoordinator::new(
            buffer.clone(),
            Arc::new(StalledClient),
            Arc::new(StaticDeviceId("device-1".into())),
            "RUST_SDK",
            RetryPolicy::default(),
        );
        let cancel = CancellationToken::new();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(100), sync.flush_once(&cancel)).await;
        assert!(timed_out.is_err());
        assert_eq!(buffer.len(), 3);

        // The abandoned flush must not hold the single-flight lock
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let outcome = sync.flush_once(&cancel).await;

        assert_ne!(outcome, SyncOutcome::Coalesced);
        assert_eq!(sync.stats().coalesced, 0);
        assert_eq!(sync.stats().api_calls, 2);
        assert_eq!(buffer.watermark(), None);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = SyncConfig {
            max_attempts: 0,
            retry_delay_ms: 250,
            ..Default::default()
        };
        let sync = SyncCoordinator::from_config(
            &config,
            filled(0),
            ScriptedClient::new(vec![]),
            Arc::new(StaticDeviceId("device-1".into())),
        );

        assert_eq!(
            sync.retry_policy(),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(250),
            }
        );
    }
}
