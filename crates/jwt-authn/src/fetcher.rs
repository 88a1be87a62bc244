//! Remote JWKS retrieval.
//!
//! [`KeyFetcher`] turns a [`RemoteJwks`] source into a future yielding a
//! [`KeySet`]. Networking is delegated to two host capabilities:
//! - [`UpstreamResolver`] maps the configured upstream target name to a
//!   reachable service
//! - [`HttpClient`] performs the GET against that service
//!
//! [`StaticResolver`] and [`ReqwestHttpClient`] are the in-tree
//! implementations used by the binary.
//!
//! Cancelling a fetch is done by dropping its future, which drops the
//! in-progress HTTP request with it.

use crate::errors::{FetchError, Status};
use crate::jwks::KeySet;
use crate::observability::metrics::{self, FetchOutcome};
use crate::rules::RemoteJwks;
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, HOST};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// A resolved upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Target name it was resolved from.
    pub name: String,
    /// Scheme, host, and optional port, e.g. `https://10.0.0.7:8443`.
    pub base_url: String,
}

/// Resolves upstream target names to reachable services.
pub trait UpstreamResolver: Send + Sync {
    fn resolve(&self, target: &str) -> Option<Upstream>;
}

/// Resolver backed by a fixed name to base URL map.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    upstreams: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(upstreams: HashMap<String, String>) -> Self {
        Self { upstreams }
    }
}

impl UpstreamResolver for StaticResolver {
    fn resolve(&self, target: &str) -> Option<Upstream> {
        self.upstreams.get(target).map(|base_url| Upstream {
            name: target.to_string(),
            base_url: base_url.clone(),
        })
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Asynchronous HTTP GET over a resolved upstream.
///
/// Implementations must stop work when the returned future is dropped.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `path` from `upstream`, presenting `authority` as the request host.
    async fn get(
        &self,
        upstream: &Upstream,
        path: &str,
        authority: &str,
    ) -> Result<HttpResponse, FetchError>;
}

/// [`HttpClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "jwt_authn.fetcher", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        upstream: &Upstream,
        path: &str,
        authority: &str,
    ) -> Result<HttpResponse, FetchError> {
        let url = format!("{}{}", upstream.base_url.trim_end_matches('/'), path);
        let mut request = self.client.get(&url);
        if let Ok(host) = HeaderValue::from_str(authority) {
            if !authority.is_empty() {
                request = request.header(HOST, host);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })?;

        Ok(HttpResponse { status, body })
    }
}

/// Future yielding a fetched key set.
pub type FetchFuture = BoxFuture<'static, Result<KeySet, Status>>;

/// Fetches key sets from remote JWKS endpoints.
#[derive(Clone)]
pub struct KeyFetcher {
    resolver: Arc<dyn UpstreamResolver>,
    client: Arc<dyn HttpClient>,
}

impl KeyFetcher {
    pub fn new(resolver: Arc<dyn UpstreamResolver>, client: Arc<dyn HttpClient>) -> Self {
        Self { resolver, client }
    }

    /// Begin fetching `source`.
    ///
    /// Upstream resolution happens synchronously; nothing is sent if it fails.
    ///
    /// # Errors
    ///
    /// Returns `Status::FailedFetchPubkey` if the upstream target does not
    /// resolve. The returned future yields `Status::FailedFetchPubkey` for
    /// transport errors and non-2xx responses, and `Status::JwkParseError`
    /// for an unusable body.
    #[instrument(skip_all, fields(upstream = %source.upstream_target))]
    pub fn start(&self, source: &RemoteJwks) -> Result<FetchFuture, Status> {
        let Some(upstream) = self.resolver.resolve(&source.upstream_target) else {
            tracing::warn!(
                target: "jwt_authn.fetcher",
                upstream = %source.upstream_target,
                "Upstream target did not resolve"
            );
            metrics::record_jwks_fetch(FetchOutcome::Unresolved, None);
            return Err(Status::FailedFetchPubkey);
        };

        let client = Arc::clone(&self.client);
        let path = source.path.clone();
        let authority = source.authority.clone();

        Ok(Box::pin(async move {
            tracing::debug!(
                target: "jwt_authn.fetcher",
                upstream = %upstream.name,
                path = %path,
                "Fetching JWKS"
            );
            let started = Instant::now();
            let (outcome, result) = match client.get(&upstream, &path, &authority).await {
                Err(e) => {
                    tracing::warn!(target: "jwt_authn.fetcher", upstream = %upstream.name, error = %e, "Failed to fetch JWKS");
                    (FetchOutcome::Transport, Err(Status::FailedFetchPubkey))
                }
                Ok(response) if !response.is_success() => {
                    tracing::warn!(
                        target: "jwt_authn.fetcher",
                        upstream = %upstream.name,
                        status = response.status,
                        "JWKS endpoint returned error"
                    );
                    (FetchOutcome::HttpStatus, Err(Status::FailedFetchPubkey))
                }
                Ok(response) => match KeySet::from_jwks(&response.body) {
                    Ok(keys) => (FetchOutcome::Success, Ok(keys)),
                    Err(status) => {
                        tracing::warn!(target: "jwt_authn.fetcher", upstream = %upstream.name, "Failed to parse JWKS response");
                        (FetchOutcome::Parse, Err(status))
                    }
                },
            };
            metrics::record_jwks_fetch(outcome, Some(started.elapsed()));
            result
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const JWKS: &str = r#"{"keys": [{"kty": "OKP", "crv": "Ed25519", "kid": "k", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}]}"#;

    struct FixedClient {
        response: Result<HttpResponse, FetchError>,
        requests: Mutex<Vec<(String, String, String)>>,
    }

    impl FixedClient {
        fn new(response: Result<HttpResponse, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for FixedClient {
        async fn get(
            &self,
            upstream: &Upstream,
            path: &str,
            authority: &str,
        ) -> Result<HttpResponse, FetchError> {
            self.requests.lock().unwrap().push((
                upstream.name.clone(),
                path.to_string(),
                authority.to_string(),
            ));
            self.response.clone()
        }
    }

    fn source() -> RemoteJwks {
        RemoteJwks {
            uri: "https://pubkey_server/pubkey_path".to_string(),
            authority: "pubkey_server".to_string(),
            path: "/pubkey_path".to_string(),
            upstream_target: "pubkey_cluster".to_string(),
            cache_ttl: None,
        }
    }

    fn fetcher(client: Arc<FixedClient>) -> KeyFetcher {
        let resolver = StaticResolver::new(HashMap::from([(
            "pubkey_cluster".to_string(),
            "http://127.0.0.1:1".to_string(),
        )]));
        KeyFetcher::new(Arc::new(resolver), client)
    }

    #[test]
    fn test_static_resolver() {
        let resolver = StaticResolver::new(HashMap::from([(
            "keys".to_string(),
            "https://keys.example.com".to_string(),
        )]));
        assert_eq!(
            resolver.resolve("keys"),
            Some(Upstream {
                name: "keys".to_string(),
                base_url: "https://keys.example.com".to_string(),
            })
        );
        assert!(resolver.resolve("other").is_none());
    }

    #[tokio::test]
    async fn test_fetch_success_sends_path_and_authority() {
        let client = FixedClient::new(Ok(HttpResponse {
            status: 200,
            body: JWKS.to_string(),
        }));
        let keys = fetcher(Arc::clone(&client)).start(&source()).unwrap().await.unwrap();

        assert_eq!(keys.len(), 1);
        let requests = client.requests.lock().unwrap();
        assert_eq!(
            *requests,
            vec![(
                "pubkey_cluster".to_string(),
                "/pubkey_path".to_string(),
                "pubkey_server".to_string()
            )]
        );
    }

    #[test]
    fn test_unresolved_upstream_fails_without_request() {
        let client = FixedClient::new(Ok(HttpResponse {
            status: 200,
            body: JWKS.to_string(),
        }));
        let mut remote = source();
        remote.upstream_target = "missing_cluster".to_string();

        let result = fetcher(Arc::clone(&client)).start(&remote);

        assert_eq!(result.err(), Some(Status::FailedFetchPubkey));
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_failure() {
        for status in [301, 401, 404, 503] {
            let client = FixedClient::new(Ok(HttpResponse {
                status,
                body: JWKS.to_string(),
            }));
            let result = fetcher(client).start(&source()).unwrap().await;
            assert_eq!(result.unwrap_err(), Status::FailedFetchPubkey, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_fetch_failure() {
        let client = FixedClient::new(Err(FetchError::Timeout));
        let result = fetcher(client).start(&source()).unwrap().await;
        assert_eq!(result.unwrap_err(), Status::FailedFetchPubkey);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_parse_error() {
        let client = FixedClient::new(Ok(HttpResponse {
            status: 200,
            body: "invalid publik key".to_string(),
        }));
        let result = fetcher(client).start(&source()).unwrap().await;
        assert_eq!(result.unwrap_err(), Status::JwkParseError);
    }
}
