//! Session id assignment with timeout-based renewal

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

struct ActiveSession {
    id: String,
    started_at: DateTime<Utc>,
}

/// Hands out the current session id, minting a fresh one once the
/// previous session is older than the timeout.
///
/// Check-and-renew happens under one lock, so callers racing across an
/// expiry all observe the same new id.
pub struct SessionTracker {
    timeout: Duration,
    state: Mutex<Option<ActiveSession>>,
}

impl SessionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(None),
        }
    }

    /// Current session id, renewed if expired
    pub fn current_session_id(&self) -> String {
        self.current_session_id_at(Utc::now())
    }

    /// Same as [`current_session_id`](Self::current_session_id) with an explicit clock reading
    pub fn current_session_id_at(&self, now: DateTime<Utc>) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match state.as_ref() {
            Some(session) if now - session.started_at <= self.timeout => session.id.clone(),
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::debug!(session_id = %id, "Started new analytics session");
                *state = Some(ActiveSession {
                    id: id.clone(),
                    started_at: now,
                });
                id
            }
        }
    }

    /// Forget the active session; the next access mints a new id
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
