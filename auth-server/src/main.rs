//! # Auth Server
//!
//! Verifies zero-knowledge authorization responses and credential fetch
//! requests for a relying party.
//!
//! ## Usage
//!
//! ```bash
//! # Keys in ./circuits, state contract on a local node
//! AUTH_STATE_CONTRACT=0x... cargo run -p auth-server
//!
//! # Offline: skip on-chain state checks
//! AUTH_CHECK_STATES=false cargo run -p auth-server
//! ```
//!
//! Settings are read from `auth-server.toml` and `AUTH_*` environment variables.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Detailed server status
//! - `POST /api/v1/auth/verify` - Verify an authorization response
//! - `POST /api/v1/auth/extract` - Decode proof metadata without verifying
//! - `POST /api/v1/auth/request/validate` - Check an authorization request
//! - `POST /api/v1/credentials/verify` - Verify a credential fetch request

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use auth_server::config::Config;
use auth_server::routes::create_routes;
use auth_server::services::{load_registry, EthStateRegistry};
use auth_server::state::AppState;
use zk_auth_verifier::{
    Dispatcher, Groth16Verifier, QueryEvaluator, StateResolver, VerifierOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("invalid configuration")?;

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rpc_url = %config.rpc_url,
        state_contract = %config.state_contract,
        check_states = config.check_states,
        "Starting Auth Server"
    );

    // Load verification keys
    let registry = load_registry(&config.circuits_dir, config.issuer_state_source)
        .context("failed to load circuits")?;
    info!(circuits = ?registry.supported(), "Circuit registry ready");

    // State registry client
    let state_registry = EthStateRegistry::new(
        config.rpc_url.clone(),
        config.state_contract_bytes()?,
        config.rpc_timeout(),
    )?;
    let resolver =
        StateResolver::new(Arc::new(state_registry)).with_timeout(config.resolution_timeout());

    let mut evaluator = QueryEvaluator::new(Arc::new(config.schema_table()?));
    if let Some(audience) = &config.audience {
        evaluator = evaluator.with_audience(audience.clone());
    }

    if !config.check_states {
        info!("State checks DISABLED - claimed states are not reconciled with the registry");
    }

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(Groth16Verifier::new()),
        resolver,
        evaluator,
    )
    .with_options(VerifierOptions {
        check_states: config.check_states,
    });

    // Create application state
    let state = AppState::new(dispatcher);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(allowed_origins(&config.cors_origins)?);

    // Build router
    let app = create_routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.socket_addr()?;
    info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `*` allows any origin; anything else is an explicit list.
fn allowed_origins(origins: &[String]) -> anyhow::Result<AllowOrigin> {
    if origins.iter().any(|o| o == "*") {
        return Ok(Any.into());
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin {o:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(AllowOrigin::list(origins))
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
