//! Xavyo Journey API
//!
//! Runs policy-defined identity journeys for OIDC and SAML2 relying
//! parties, federating to external identity providers along the way.

mod bootstrap;
mod config;
mod logging;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use config::Config;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use xavyo_api_journey::journey_router;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        env = %config.app_env,
        public_base_url = %config.public_base_url,
        "Starting journey API"
    );

    match config.validate_security_config() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!(target: "security", "{}", warning);
            }
        }
        Err(errors) => {
            for error in &errors {
                tracing::error!(target: "security", "{}", error);
            }
            eprintln!(
                "FATAL: {} insecure setting(s) detected in production mode.",
                errors.len()
            );
            std::process::exit(1);
        }
    }

    let state = match bootstrap::build_state(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Bootstrap failed, refusing to start");
            std::process::exit(1);
        }
    };

    let app = journey_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_origins));

    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

/// Build CORS layer from configured origins.
///
/// Discovery documents and JWKS are fetched cross-origin by browser-based
/// relying parties; nothing else needs CORS.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.len() == 1 && origins[0] == "*" {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET])
        .max_age(Duration::from_secs(3600))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
