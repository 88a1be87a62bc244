//! Per-issuer key cache with single-flight fetching.
//!
//! Each issuer with a remote key source has one [`CacheEntry`] holding the
//! last fetched key set, its expiry, and at most one in-flight fetch. A
//! request that finds no fresh key set either starts the fetch or attaches
//! to the one already running; when the fetch settles every attached
//! continuation is invoked once, in attach order.
//!
//! # Concurrency
//!
//! - All entry mutation happens under one mutex
//! - The mutex is never held while a continuation runs
//! - Fetches run as tasks on the runtime captured at construction, raced
//!   against a cancellation token
//! - Each fetch carries a generation number; a completion whose generation
//!   no longer matches the entry is discarded
//! - A fetch task that panics, or is dropped by its runtime before settling,
//!   resumes its waiters with `FAILED_FETCH_PUBKEY` and clears the
//!   in-flight marker

use crate::errors::{ConfigError, Status};
use crate::fetcher::KeyFetcher;
use crate::jwks::KeySet;
use crate::observability::metrics::{self, CacheResult, FetchOutcome};
use crate::rules::{KeySource, VerificationRule};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Receives the outcome of a key acquisition.
pub type Continuation = Box<dyn FnOnce(Result<Arc<KeySet>, Status>) + Send>;

/// Result of [`KeyCache::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// The continuation already ran.
    Completed,
    /// The continuation is queued on an in-flight fetch.
    Pending(WaiterHandle),
}

/// Identifies one queued continuation, for [`KeyCache::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterHandle {
    issuer: String,
    generation: u64,
    id: u64,
}

struct InFlightFetch {
    generation: u64,
    waiters: VecDeque<(u64, Continuation)>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CacheEntry {
    keys: Option<Arc<KeySet>>,
    /// `None` with keys present means the keys never expire.
    expires_at: Option<Instant>,
    in_flight: Option<InFlightFetch>,
}

impl CacheEntry {
    fn fresh_keys(&self, now: Instant) -> Option<&Arc<KeySet>> {
        let keys = self.keys.as_ref()?;
        match self.expires_at {
            Some(at) if at <= now => None,
            _ => Some(keys),
        }
    }
}

/// Shared key cache for all issuers of one rule store.
pub struct KeyCache {
    fetcher: KeyFetcher,
    runtime: Handle,
    entries: Mutex<HashMap<String, CacheEntry>>,
    next_generation: AtomicU64,
    next_waiter: AtomicU64,
}

impl KeyCache {
    /// Create a cache that spawns fetches on `runtime`.
    pub fn new(fetcher: KeyFetcher, runtime: Handle) -> Self {
        Self {
            fetcher,
            runtime,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            next_waiter: AtomicU64::new(1),
        }
    }

    /// Create a cache on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::RuntimeUnavailable` outside a tokio runtime.
    pub fn on_current_runtime(fetcher: KeyFetcher) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;
        Ok(Self::new(fetcher, runtime))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the key set for `rule`, invoking `continuation` with it.
    ///
    /// Inline sources and fresh cached key sets complete on the calling
    /// stack, as does a fetch that fails to start. Otherwise the
    /// continuation is queued on the issuer's in-flight fetch, which is
    /// started if none is running.
    pub fn acquire(
        self: &Arc<Self>,
        rule: &VerificationRule,
        continuation: Continuation,
    ) -> Acquire {
        let remote = match rule.key_source() {
            KeySource::Inline(keys) => {
                metrics::record_key_cache(CacheResult::Inline);
                continuation(Ok(Arc::clone(keys)));
                return Acquire::Completed;
            }
            KeySource::Remote(remote) => remote,
        };
        let issuer = rule.issuer();

        let mut entries = self.lock();
        let entry = entries.entry(issuer.to_string()).or_default();

        if let Some(keys) = entry.fresh_keys(Instant::now()) {
            let keys = Arc::clone(keys);
            drop(entries);
            tracing::debug!(target: "jwt_authn.cache", issuer = %issuer, "Key cache hit");
            metrics::record_key_cache(CacheResult::Hit);
            continuation(Ok(keys));
            return Acquire::Completed;
        }

        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);

        if let Some(in_flight) = entry.in_flight.as_mut() {
            in_flight.waiters.push_back((id, continuation));
            tracing::debug!(
                target: "jwt_authn.cache",
                issuer = %issuer,
                generation = in_flight.generation,
                waiters = in_flight.waiters.len(),
                "Attached to in-flight key fetch"
            );
            metrics::record_key_cache(CacheResult::Attach);
            return Acquire::Pending(WaiterHandle {
                issuer: issuer.to_string(),
                generation: in_flight.generation,
                id,
            });
        }

        metrics::record_key_cache(CacheResult::Miss);
        let fetch = match self.fetcher.start(remote) {
            Ok(fetch) => fetch,
            Err(status) => {
                drop(entries);
                continuation(Err(status));
                return Acquire::Completed;
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        entry.in_flight = Some(InFlightFetch {
            generation,
            waiters: VecDeque::from([(id, continuation)]),
            cancel: cancel.clone(),
        });
        drop(entries);

        tracing::debug!(
            target: "jwt_authn.cache",
            issuer = %issuer,
            generation,
            "Key cache miss, fetching"
        );

        // Built outside the task so an unpolled, dropped task still settles
        let settle = SettleOnDrop {
            cache: Arc::clone(self),
            issuer: issuer.to_string(),
            generation,
            ttl: remote.cache_ttl,
            settled: false,
        };
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(target: "jwt_authn.cache", issuer = %settle.issuer, generation, "Key fetch cancelled");
                    metrics::record_jwks_fetch(FetchOutcome::Cancelled, None);
                    settle.disarm();
                }
                result = AssertUnwindSafe(fetch).catch_unwind() => match result {
                    Ok(result) => settle.settle(result),
                    Err(_) => {
                        tracing::warn!(target: "jwt_authn.cache", issuer = %settle.issuer, generation, "Key fetch panicked");
                        metrics::record_jwks_fetch(FetchOutcome::Aborted, None);
                        settle.settle(Err(Status::FailedFetchPubkey));
                    }
                },
            }
        });

        Acquire::Pending(WaiterHandle {
            issuer: issuer.to_string(),
            generation,
            id,
        })
    }

    fn complete(
        &self,
        issuer: &str,
        generation: u64,
        ttl: Option<Duration>,
        result: Result<KeySet, Status>,
    ) {
        let result = result.map(Arc::new);

        let waiters = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(issuer) else {
                return;
            };
            let current = entry
                .in_flight
                .as_ref()
                .is_some_and(|f| f.generation == generation);
            if !current {
                tracing::debug!(target: "jwt_authn.cache", issuer = %issuer, generation, "Discarding stale key fetch completion");
                return;
            }
            let Some(in_flight) = entry.in_flight.take() else {
                return;
            };

            if let Ok(keys) = &result {
                entry.keys = Some(Arc::clone(keys));
                entry.expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
                tracing::info!(
                    target: "jwt_authn.cache",
                    issuer = %issuer,
                    key_count = keys.len(),
                    ttl_seconds = ttl.map(|t| t.as_secs()),
                    "Key cache refreshed"
                );
            }
            in_flight.waiters
        };

        tracing::debug!(
            target: "jwt_authn.cache",
            issuer = %issuer,
            generation,
            waiters = waiters.len(),
            ok = result.is_ok(),
            "Resuming key fetch waiters"
        );
        for (_, continuation) in waiters {
            continuation(result.clone());
        }
    }

    /// Remove a queued continuation without invoking it.
    ///
    /// When the last waiter of a fetch detaches, the fetch is cancelled.
    /// Returns `false` if the continuation is no longer queued.
    pub fn detach(&self, handle: &WaiterHandle) -> bool {
        let removed = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(&handle.issuer) else {
                return false;
            };
            let Some(in_flight) = entry.in_flight.as_mut() else {
                return false;
            };
            if in_flight.generation != handle.generation {
                return false;
            }
            let Some(position) = in_flight.waiters.iter().position(|(id, _)| *id == handle.id)
            else {
                return false;
            };
            let removed = in_flight.waiters.remove(position);

            if in_flight.waiters.is_empty() {
                in_flight.cancel.cancel();
                entry.in_flight = None;
                tracing::debug!(
                    target: "jwt_authn.cache",
                    issuer = %handle.issuer,
                    generation = handle.generation,
                    "Last waiter detached, cancelling key fetch"
                );
            }
            removed
        };
        // Dropped outside the lock; it owns caller callbacks
        drop(removed);
        true
    }

    /// Whether a fetch is in flight for `issuer`.
    pub fn is_fetching(&self, issuer: &str) -> bool {
        self.lock()
            .get(issuer)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    /// Number of continuations queued on `issuer`'s in-flight fetch.
    pub fn waiter_count(&self, issuer: &str) -> usize {
        self.lock()
            .get(issuer)
            .and_then(|entry| entry.in_flight.as_ref())
            .map_or(0, |in_flight| in_flight.waiters.len())
    }
}

/// Completion duty of one spawned fetch.
///
/// Dropped without settling, it resumes the fetch's waiters with
/// `FAILED_FETCH_PUBKEY`.
struct SettleOnDrop {
    cache: Arc<KeyCache>,
    issuer: String,
    generation: u64,
    ttl: Option<Duration>,
    settled: bool,
}

impl SettleOnDrop {
    fn settle(mut self, result: Result<KeySet, Status>) {
        self.settled = true;
        self.cache.complete(&self.issuer, self.generation, self.ttl, result);
    }

    /// The fetch was cancelled; its waiters are already gone.
    fn disarm(mut self) {
        self.settled = true;
    }
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(
            target: "jwt_authn.cache",
            issuer = %self.issuer,
            generation = self.generation,
            "Key fetch task ended without settling"
        );
        metrics::record_jwks_fetch(FetchOutcome::Aborted, None);
        self.cache.complete(
            &self.issuer,
            self.generation,
            self.ttl,
            Err(Status::FailedFetchPubkey),
        );
    }
}
