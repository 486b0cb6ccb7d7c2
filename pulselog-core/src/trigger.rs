//! Debounced flush triggering
//!
//! Buffer threshold crossings are funnelled into a single-slot signal: while a
//! signal is pending and unconsumed, further signals collapse into it. A
//! debouncer task consumes the slot and emits one [`FlushRequest`] only after
//! the debounce window has passed with no new signal (trailing edge).
//!
//! ```text
//! append ─► signal() ─► [slot: 0|1] ─► debouncer ─(quiet for window)─► broadcast<FlushRequest>
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Emitted by the debouncer once per burst of flush signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRequest {
    /// Signals collapsed into this request
    pub signals: u64,
}

/// Rate-limits buffer flush signals into debounced [`FlushRequest`]s
#[derive(Clone)]
pub struct FlushTrigger {
    slot: Arc<Notify>,
    window: Duration,
    requests: broadcast::Sender<FlushRequest>,
}

impl FlushTrigger {
    pub fn new(window: Duration) -> Self {
        let (requests, _) = broadcast::channel(16);
        Self {
            slot: Arc::new(Notify::new()),
            window,
            requests,
        }
    }

    /// Raise a flush signal. Never blocks; at most one signal stays pending.
    pub fn signal(&self) {
        self.slot.notify_one();
    }

    /// Subscribe to debounced flush requests
    pub fn subscribe(&self) -> broadcast::Receiver<FlushRequest> {
        self.requests.subscribe()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Spawn the debouncer loop on the current tokio runtime
    ///
    /// The loop exits when `cancel` fires; a burst still inside its window at
    /// that point is dropped.
    pub fn spawn_debouncer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let trigger = self.clone();
        tokio::spawn(async move { trigger.run_debouncer(cancel).await })
    }

    async fn run_debouncer(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.slot.notified() => {}
            }

            let mut signals = 1u64;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.slot.notified() => signals += 1,
                    _ = tokio::time::sleep(self.window) => break,
                }
            }

            tracing::debug!(signals, "Flush requested after debounce window");
            // No subscribers is fine: the host may only flush on its own cadence
            let _ = self.requests.send(FlushRequest { signals });
        }

        tracing::debug!("Flush debouncer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn drain(rx: &mut broadcast::Receiver<FlushRequest>) -> Vec<FlushRequest> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(req) => out.push(req),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_request() {
        let trigger = FlushTrigger::new(Duration::from_millis(1000));
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let handle = trigger.spawn_debouncer(cancel.clone());

        // 5 signals within 200ms
        for _ in 0..5 {
            trigger.signal();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(drain(&mut rx), vec![FlushRequest { signals: 5 }]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_fires_only_after_quiet_window() {
        let trigger = FlushTrigger::new(Duration::from_millis(1000));
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let handle = trigger.spawn_debouncer(cancel.clone());

        trigger.signal();
        tokio::time::sleep(Duration::from_millis(600)).await;
        trigger.signal();
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The second signal restarted the window
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(drain(&mut rx).len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_produce_separate_requests() {
        let trigger = FlushTrigger::new(Duration::from_millis(1000));
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let handle = trigger.spawn_debouncer(cancel.clone());

        trigger.signal();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        trigger.signal();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(drain(&mut rx).len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_before_debouncer_starts_is_kept() {
        let trigger = FlushTrigger::new(Duration::from_millis(100));
        let mut rx = trigger.subscribe();

        trigger.signal();
        trigger.signal();

        let cancel = CancellationToken::new();
        let handle = trigger.spawn_debouncer(cancel.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(drain(&mut rx), vec![FlushRequest { signals: 1 }]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_debouncer() {
        let trigger = FlushTrigger::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let handle = trigger.spawn_debouncer(cancel.clone());

        trigger.signal();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("debouncer should stop on cancel")
            .unwrap();
    }
}
