//! Recording verification callbacks.

use jwt_authn::{AuthCallbacks, DecodedJwt, Status};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// One delivered verification outcome.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { jwt: DecodedJwt, header: String },
    Error(Status),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Failure status, `None` on success.
    pub fn status(&self) -> Option<Status> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Error(status) => Some(*status),
        }
    }

    /// Header the token was read from, `None` on failure.
    pub fn header(&self) -> Option<&str> {
        match self {
            Outcome::Success { header, .. } => Some(header),
            Outcome::Error(_) => None,
        }
    }
}

/// Records outcomes from any number of verifications, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct CallbackRecorder {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
    notify: Arc<Notify>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh callbacks that report into this recorder.
    pub fn callbacks(&self) -> Box<dyn AuthCallbacks> {
        Box::new(RecordingCallbacks {
            outcomes: Arc::clone(&self.outcomes),
            notify: Arc::clone(&self.notify),
        })
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    /// Wait until at least `expected` outcomes have been delivered.
    ///
    /// Panics after five seconds.
    pub async fn wait_for(&self, expected: usize) -> Vec<Outcome> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let notified = self.notify.notified();
            if self.count() >= expected {
                return self.outcomes();
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!(
                    "expected {expected} outcomes, got {}: {:?}",
                    self.count(),
                    self.outcomes()
                );
            }
        }
    }
}

struct RecordingCallbacks {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
    notify: Arc<Notify>,
}

impl RecordingCallbacks {
    fn record(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push(outcome);
        self.notify.notify_waiters();
    }
}

impl AuthCallbacks for RecordingCallbacks {
    fn on_success(self: Box<Self>, jwt: DecodedJwt, header: &str) {
        self.record(Outcome::Success {
            jwt,
            header: header.to_string(),
        });
    }

    fn on_error(self: Box<Self>, status: Status) {
        self.record(Outcome::Error(status));
    }
}
