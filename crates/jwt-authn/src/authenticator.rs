//! Per-request verification orchestration.
//!
//! An [`Authenticator`] runs one verification at a time:
//!
//! 1. Scan the store's credential locations for a token (`JWT_MISSED`)
//! 2. Decode it (`JWT_BAD_FORMAT`)
//! 3. Look up its issuer (`JWT_UNKNOWN_ISSUER`)
//! 4. Acquire the issuer's keys, possibly waiting on a fetch
//!    (`FAILED_FETCH_PUBKEY`, `JWK_PARSE_ERROR`)
//! 5. Verify the signature (`JWT_INVALID_SIGNATURE`), then `exp`
//!    (`JWT_EXPIRED`) and `aud` (`AUDIENCE_NOT_ALLOWED`)
//!
//! Exactly one of [`AuthCallbacks::on_success`] or [`AuthCallbacks::on_error`]
//! fires per [`Authenticator::verify`], either before `verify` returns or
//! from the fetch task, unless the verification is destroyed first.
//!
//! [`JwtAuthn`] owns the current rule store and key cache and hands out
//! authenticators bound to them.

use crate::cache::{Acquire, Continuation, KeyCache, WaiterHandle};
use crate::config::RuleConfig;
use crate::errors::{ConfigError, Status};
use crate::fetcher::KeyFetcher;
use crate::headers::{CredentialLocation, HeaderView};
use crate::jwks::KeySet;
use crate::jwt::{self, DecodedJwt};
use crate::observability::metrics;
use crate::rules::{RuleStore, StoreOptions, VerificationRule};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Outcome receiver for one verification.
pub trait AuthCallbacks: Send {
    /// The token verified. `header` is the lower-cased name of the header
    /// it was read from.
    fn on_success(self: Box<Self>, jwt: DecodedJwt, header: &str);

    fn on_error(self: Box<Self>, status: Status);
}

/// A verified token and where it came from.
#[derive(Debug, Clone)]
pub struct Verified {
    pub jwt: DecodedJwt,
    /// Lower-cased header name.
    pub header: String,
}

/// Immutable rule store plus the key cache serving it.
struct Generation {
    store: RuleStore,
    cache: Arc<KeyCache>,
}

/// Entry point: the current rules and key cache.
///
/// Reconfiguration swaps both at once; authenticators created before a swap
/// keep using the generation they were created with.
pub struct JwtAuthn {
    fetcher: KeyFetcher,
    runtime: Handle,
    current: RwLock<Arc<Generation>>,
}

impl JwtAuthn {
    /// Build from rules, spawning fetches on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::RuntimeUnavailable` outside a tokio runtime, or
    /// any error from building the rule store.
    pub fn new(
        rules: &[RuleConfig],
        options: StoreOptions,
        fetcher: KeyFetcher,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;
        Self::with_runtime(rules, options, fetcher, runtime)
    }

    /// Build from rules, spawning fetches on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns any error from building the rule store.
    pub fn with_runtime(
        rules: &[RuleConfig],
        options: StoreOptions,
        fetcher: KeyFetcher,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        let generation = Self::build(rules, options, &fetcher, &runtime)?;
        Ok(Self {
            fetcher,
            runtime,
            current: RwLock::new(generation),
        })
    }

    fn build(
        rules: &[RuleConfig],
        options: StoreOptions,
        fetcher: &KeyFetcher,
        runtime: &Handle,
    ) -> Result<Arc<Generation>, ConfigError> {
        Ok(Arc::new(Generation {
            store: RuleStore::new(rules, options)?,
            cache: Arc::new(KeyCache::new(fetcher.clone(), runtime.clone())),
        }))
    }

    fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// An authenticator bound to the current generation.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.current())
    }

    /// Replace the rule store and key cache.
    ///
    /// On error the current generation is left in place.
    ///
    /// # Errors
    ///
    /// Returns any error from building the rule store.
    pub fn reconfigure(
        &self,
        rules: &[RuleConfig],
        options: StoreOptions,
    ) -> Result<(), ConfigError> {
        let generation = Self::build(rules, options, &self.fetcher, &self.runtime)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = generation;
        tracing::info!(target: "jwt_authn.authenticator", rule_count = rules.len(), "Rules reconfigured");
        Ok(())
    }

    /// Credential locations of the current generation.
    pub fn credential_locations(&self) -> Vec<CredentialLocation> {
        self.current().store.credential_locations().to_vec()
    }

    /// Key cache of the current generation.
    pub fn key_cache(&self) -> Arc<KeyCache> {
        Arc::clone(&self.current().cache)
    }
}

/// State of a verification waiting on keys.
struct PendingVerification {
    callbacks: Box<dyn AuthCallbacks>,
    jwt: DecodedJwt,
    header: String,
    rule: Arc<VerificationRule>,
    options: StoreOptions,
}

impl PendingVerification {
    fn resume(self, keys: Result<Arc<KeySet>, Status>) {
        let checked = keys.and_then(|keys| {
            jwt::verify_signature(&self.jwt, &keys, self.options.default_algorithm)?;
            jwt::validate_claims(&self.jwt, &self.rule, self.options.empty_audiences)
        });
        match checked {
            Ok(()) => succeed(self.callbacks, self.jwt, &self.header),
            Err(status) => fail(self.callbacks, status),
        }
    }
}

type Slot = Arc<Mutex<Option<PendingVerification>>>;

fn take(slot: &Slot) -> Option<PendingVerification> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn succeed(callbacks: Box<dyn AuthCallbacks>, jwt: DecodedJwt, header: &str) {
    tracing::debug!(
        target: "jwt_authn.authenticator",
        issuer = ?jwt.issuer(),
        header = %header,
        "Jwt verified"
    );
    metrics::record_verification(Ok(()));
    callbacks.on_success(jwt, header);
}

fn fail(callbacks: Box<dyn AuthCallbacks>, status: Status) {
    tracing::debug!(target: "jwt_authn.authenticator", status = status.as_str(), "Jwt rejected");
    metrics::record_verification(Err(status));
    callbacks.on_error(status);
}

/// Verifies one request at a time.
///
/// Dropping an authenticator destroys its in-flight verification.
pub struct Authenticator {
    generation: Arc<Generation>,
    slot: Option<Slot>,
    waiter: Option<WaiterHandle>,
}

impl Authenticator {
    fn new(generation: Arc<Generation>) -> Self {
        Self {
            generation,
            slot: None,
            waiter: None,
        }
    }

    /// Verify the credential carried by `headers`.
    ///
    /// Everything needed from `headers` is copied out before this returns.
    /// A verification still in flight on this authenticator is destroyed
    /// first.
    pub fn verify<H: HeaderView + ?Sized>(
        &mut self,
        headers: &H,
        callbacks: Box<dyn AuthCallbacks>,
    ) {
        self.destroy();

        let store = &self.generation.store;
        let Some((token, header)) = store
            .credential_locations()
            .iter()
            .find_map(|location| location.extract(headers).map(|token| (token, &location.header)))
        else {
            return fail(callbacks, Status::JwtMissed);
        };

        let jwt = match jwt::decode(token) {
            Ok(jwt) => jwt,
            Err(status) => return fail(callbacks, status),
        };

        let Some(rule) = jwt.issuer().and_then(|issuer| store.lookup(issuer)) else {
            tracing::debug!(target: "jwt_authn.authenticator", issuer = ?jwt.issuer(), "Issuer not configured");
            return fail(callbacks, Status::JwtUnknownIssuer);
        };
        let rule = Arc::clone(rule);

        let slot: Slot = Arc::new(Mutex::new(Some(PendingVerification {
            callbacks,
            jwt,
            header: header.clone(),
            rule: Arc::clone(&rule),
            options: *store.options(),
        })));

        let resume_slot = Arc::clone(&slot);
        let continuation: Continuation = Box::new(move |keys| {
            if let Some(pending) = take(&resume_slot) {
                pending.resume(keys);
            }
        });

        self.slot = Some(slot);
        if let Acquire::Pending(handle) = self.generation.cache.acquire(&rule, continuation) {
            self.waiter = Some(handle);
        }
    }

    /// Future form of [`verify`](Self::verify).
    ///
    /// Dropping the returned future destroys the verification.
    pub async fn verify_async<H: HeaderView + ?Sized>(
        &mut self,
        headers: &H,
    ) -> Result<Verified, Status> {
        let (tx, rx) = oneshot::channel();
        self.verify(headers, Box::new(OneshotCallbacks(tx)));

        let guard = DestroyOnDrop(self);
        let outcome = rx.await;
        drop(guard);
        // Every undestroyed verification reports through the sender, including
        // one whose fetch task panicked or was dropped
        outcome.unwrap_or(Err(Status::FailedFetchPubkey))
    }

    /// Whether a verification is waiting on a key fetch.
    pub fn is_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Abandon the in-flight verification without invoking any callback.
    ///
    /// Idempotent. If this was the last request waiting on a key fetch the
    /// fetch is cancelled.
    pub fn destroy(&mut self) {
        let waiter = self.waiter.take();
        let Some(slot) = self.slot.take() else {
            return;
        };
        let Some(pending) = take(&slot) else {
            return;
        };
        if let Some(handle) = waiter {
            self.generation.cache.detach(&handle);
        }
        tracing::debug!(
            target: "jwt_authn.authenticator",
            issuer = %pending.rule.issuer(),
            "Verification destroyed before completion"
        );
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct DestroyOnDrop<'a>(&'a mut Authenticator);

impl Drop for DestroyOnDrop<'_> {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

struct OneshotCallbacks(oneshot::Sender<Result<Verified, Status>>);

impl AuthCallbacks for OneshotCallbacks {
    fn on_success(self: Box<Self>, jwt: DecodedJwt, header: &str) {
        let _ = self.0.send(Ok(Verified {
            jwt,
            header: header.to_string(),
        }));
    }

    fn on_error(self: Box<Self>, status: Status) {
        let _ = self.0.send(Err(status));
    }
}
