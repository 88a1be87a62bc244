//! JWKS retrieval over real HTTP against a mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use jwt_authn::config::{parse_rules, Config};
use jwt_authn::fetcher::{HttpClient, KeyFetcher, ReqwestHttpClient, StaticResolver, Upstream};
use jwt_authn::{FetchError, JwtAuthn, Status};
use jwt_authn_test_utils::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream(server: &MockServer) -> Upstream {
    Upstream {
        name: EXAMPLE_UPSTREAM.to_string(),
        base_url: server.uri(),
    }
}

#[tokio::test]
async fn test_get_sends_path_query_and_authority() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pubkey_path"))
        .and(query_param("version", "2"))
        .and(header("host", "pubkey_server"))
        .respond_with(ResponseTemplate::new(200).set_body_string(example_jwks()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ReqwestHttpClient::new(Duration::from_secs(5));
    let response = client
        .get(&upstream(&server), "/pubkey_path?version=2", "pubkey_server")
        .await?;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, example_jwks());
    Ok(())
}

#[tokio::test]
async fn test_get_reports_non_success_status() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ReqwestHttpClient::new(Duration::from_secs(5));
    let response = client.get(&upstream(&server), "/keys", "pubkey_server").await?;

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    Ok(())
}

#[tokio::test]
async fn test_get_times_out() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(example_jwks())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = ReqwestHttpClient::new(Duration::from_millis(100));
    let result = client.get(&upstream(&server), "/keys", "pubkey_server").await;

    assert!(matches!(result, Err(FetchError::Timeout)), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn test_get_reports_connection_failure() {
    let unreachable = Upstream {
        name: EXAMPLE_UPSTREAM.to_string(),
        base_url: "http://127.0.0.1:1".to_string(),
    };
    let client = ReqwestHttpClient::new(Duration::from_secs(1));
    let result = client.get(&unreachable, "/keys", "pubkey_server").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_end_to_end_from_configuration() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pubkey_path"))
        .respond_with(ResponseTemplate::new(200).set_body_string(example_jwks()))
        .expect(1)
        .mount(&server)
        .await;

    let rules = parse_rules(&format!(
        r#"[{{
            "issuer": "{EXAMPLE_ISSUER}",
            "audiences": ["example_service", "http://example_service1"],
            "remote_jwks": {{
                "uri": "{EXAMPLE_JWKS_URI}",
                "upstream_target": "{EXAMPLE_UPSTREAM}",
                "cache_duration_seconds": 600
            }}
        }}]"#
    ))?;

    let vars = HashMap::from([
        ("JWT_RULES_PATH".to_string(), "/unused/rules.json".to_string()),
        (
            "JWT_UPSTREAMS".to_string(),
            format!("{EXAMPLE_UPSTREAM}={}", server.uri()),
        ),
        ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "5".to_string()),
    ]);
    let config = Config::from_vars(&vars)?;

    let fetcher = KeyFetcher::new(
        Arc::new(StaticResolver::new(config.upstreams.clone())),
        Arc::new(ReqwestHttpClient::new(config.fetch_timeout)),
    );
    let authn = JwtAuthn::new(&rules, config.store_options(), fetcher)?;

    let headers = vec![("authorization", format!("Bearer {GOOD_TOKEN}"))];
    let verified = authn.authenticator().verify_async(&headers).await;
    assert_eq!(verified.map(|v| v.header), Ok("authorization".to_string()));

    let expired = vec![("authorization", format!("Bearer {EXPIRED_TOKEN}"))];
    let result = authn.authenticator().verify_async(&expired).await;
    assert_eq!(result.map(|_| ()), Err(Status::JwtExpired));
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_server_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = KeyFetcher::new(
        Arc::new(StaticResolver::new(HashMap::from([(
            EXAMPLE_UPSTREAM.to_string(),
            server.uri(),
        )]))),
        Arc::new(ReqwestHttpClient::new(Duration::from_secs(5))),
    );
    let authn = JwtAuthn::new(
        &[TestRuleBuilder::new().build()],
        Default::default(),
        fetcher,
    )?;

    let headers = vec![("authorization", format!("Bearer {GOOD_TOKEN}"))];
    let result = authn.authenticator().verify_async(&headers).await;
    assert_eq!(result.map(|_| ()), Err(Status::FailedFetchPubkey));
    Ok(())
}
