//! jwt-authn
//!
//! Verifies one bearer token against the configured rules and prints the
//! outcome as a JSON line. Exits non-zero if verification fails.

use jwt_authn::config::{load_rules, Config};
use jwt_authn::fetcher::{KeyFetcher, ReqwestHttpClient, StaticResolver};
use jwt_authn::JwtAuthn;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let token = std::env::args()
        .nth(1)
        .ok_or("usage: jwt-authn <token>")?;

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let rules = load_rules(&config.rules_path).map_err(|e| {
        error!(path = %config.rules_path.display(), "Failed to load rules: {}", e);
        e
    })?;
    info!(rule_count = rules.len(), "Configuration loaded successfully");

    let fetcher = KeyFetcher::new(
        Arc::new(StaticResolver::new(config.upstreams.clone())),
        Arc::new(ReqwestHttpClient::new(config.fetch_timeout)),
    );
    let authn = JwtAuthn::new(&rules, config.store_options(), fetcher)?;

    // Present the token at the first location the rules read from
    let location = authn
        .credential_locations()
        .into_iter()
        .next()
        .ok_or("no credential location configured")?;
    let headers = vec![(
        location.header.clone(),
        format!("{}{}", location.value_prefix, token),
    )];

    let mut authenticator = authn.authenticator();
    match authenticator.verify_async(&headers).await {
        Ok(verified) => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "OK",
                    "header": verified.header,
                    "issuer": verified.jwt.issuer(),
                    "claims": verified.jwt.claims(),
                })
            );
            Ok(())
        }
        Err(status) => {
            println!(
                "{}",
                serde_json::json!({
                    "status": status.as_str(),
                    "message": status.to_string(),
                })
            );
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jwt_authn=info".into());

    // Logs go to stderr so stdout carries only the outcome line
    if std::env::var("JWT_AUTHN_LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
