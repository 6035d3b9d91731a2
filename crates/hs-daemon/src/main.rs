//! hs-daemon entry point.
//!
//! Sets up tracing, loads config, picks the durable store, starts the
//! reconciliation service, wires middleware, and serves HTTP. Route handlers
//! live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use hs_daemon::{routes, state};
use hs_db::PgDurableStore;
use hs_store::memory::MemoryDurableStore;
use hs_store::DurableStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = std::env::var("HS_CONFIG")
        .map(|raw| hs_config::split_config_paths(&raw))
        .unwrap_or_default();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let (cfg, loaded) = hs_config::load_engine_config(&path_refs)?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    let secrets = hs_config::resolve_secrets(&cfg);
    let durable: Arc<dyn DurableStore> = match secrets.database_url.as_deref() {
        Some(url) => {
            let pool = hs_db::connect(url).await?;
            hs_db::migrate(&pool).await?;
            Arc::new(PgDurableStore::new(pool))
        }
        None => {
            warn!(
                var = %secrets.database_url_var,
                "database url not set; durable alerts are kept in memory only"
            );
            Arc::new(MemoryDurableStore::new())
        }
    };

    let shared = Arc::new(state::AppState::new(cfg, loaded.config_hash, durable));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_alert_forwarder(shared.service.clone(), shared.bus.clone());

    // Boot failure is not fatal: the operator can retry via /v1/service/start.
    if let Err(e) = shared.service.start().await {
        error!(error = %e, "reconciliation service failed to start");
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("hs-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    if let Err(e) = shared.service.stop().await {
        warn!(error = %e, "service stop on shutdown failed");
    }
    info!("hs-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("HS_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(tower_http::cors::Any)
}
