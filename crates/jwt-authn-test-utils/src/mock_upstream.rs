//! Mock JWKS upstream for exercising the fetch path without a network.

use crate::crypto_fixtures::EXAMPLE_UPSTREAM;
use async_trait::async_trait;
use jwt_authn::fetcher::{HttpClient, HttpResponse, KeyFetcher, StaticResolver, Upstream};
use jwt_authn::FetchError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Base URL the example upstream resolves to in tests.
pub const MOCK_UPSTREAM_URL: &str = "http://127.0.0.1:1";

/// One request the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub upstream: String,
    pub path: String,
    pub authority: String,
}

#[derive(Debug, Clone)]
enum Mode {
    Respond(HttpResponse),
    Fail(FetchError),
    Hold,
}

/// [`HttpClient`] with scripted behavior.
///
/// - `responding` answers every request immediately
/// - `failing` returns a transport error
/// - `holding` parks every request until [`release_next`](Self::release_next)
///
/// Requests dropped before they finish are counted as cancelled.
#[derive(Debug)]
pub struct MockHttpClient {
    mode: Mode,
    requests: Mutex<Vec<RecordedRequest>>,
    held: Mutex<VecDeque<oneshot::Sender<HttpResponse>>>,
    cancelled: Arc<AtomicUsize>,
}

impl MockHttpClient {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(VecDeque::new()),
            cancelled: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn responding(status: u16, body: impl Into<String>) -> Arc<Self> {
        Self::with_mode(Mode::Respond(HttpResponse {
            status,
            body: body.into(),
        }))
    }

    pub fn failing(error: FetchError) -> Arc<Self> {
        Self::with_mode(Mode::Fail(error))
    }

    pub fn holding() -> Arc<Self> {
        Self::with_mode(Mode::Hold)
    }

    /// Number of requests started.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests dropped before completing.
    pub fn cancel_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Complete the oldest held request with `status` and `body`.
    ///
    /// Returns false if no live request was held.
    pub fn release_next(&self, status: u16, body: impl Into<String>) -> bool {
        let response = HttpResponse {
            status,
            body: body.into(),
        };
        let mut held = self.held.lock().unwrap();
        while let Some(sender) = held.pop_front() {
            match sender.send(response.clone()) {
                Ok(()) => return true,
                Err(_) => continue,
            }
        }
        false
    }

    /// Wait until at least `expected` requests have started.
    ///
    /// Panics after five seconds.
    pub async fn wait_for_calls(&self, expected: usize) {
        self.wait_until(|| self.call_count() >= expected, "requests").await;
    }

    /// Wait until at least `expected` requests have been cancelled.
    ///
    /// Panics after five seconds.
    pub async fn wait_for_cancels(&self, expected: usize) {
        self.wait_until(|| self.cancel_count() >= expected, "cancellations")
            .await;
    }

    async fn wait_until(&self, done: impl Fn() -> bool, what: &str) {
        let wait = async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!(
                "timed out waiting for {what}: {} calls, {} cancelled",
                self.call_count(),
                self.cancel_count()
            );
        }
    }
}

struct CancelGuard {
    counter: Arc<AtomicUsize>,
    finished: AtomicBool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(
        &self,
        upstream: &Upstream,
        path: &str,
        authority: &str,
    ) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            upstream: upstream.name.clone(),
            path: path.to_string(),
            authority: authority.to_string(),
        });
        let guard = CancelGuard {
            counter: Arc::clone(&self.cancelled),
            finished: AtomicBool::new(false),
        };

        let result = match &self.mode {
            Mode::Respond(response) => Ok(response.clone()),
            Mode::Fail(error) => Err(error.clone()),
            Mode::Hold => {
                let (tx, rx) = oneshot::channel();
                self.held.lock().unwrap().push_back(tx);
                rx.await
                    .map_err(|_| FetchError::Transport("mock released".to_string()))
            }
        };
        guard.finished.store(true, Ordering::SeqCst);
        result
    }
}

/// A fetcher that resolves the example upstream to `client`.
pub fn test_fetcher(client: Arc<MockHttpClient>) -> KeyFetcher {
    let resolver = StaticResolver::new(HashMap::from([(
        EXAMPLE_UPSTREAM.to_string(),
        MOCK_UPSTREAM_URL.to_string(),
    )]));
    KeyFetcher::new(Arc::new(resolver), client)
}
