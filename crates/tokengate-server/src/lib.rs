//! # tokengate-server - Gateway for the customer API
//!
//! An axum service that puts [`tokengate_auth::Authorizer`] in front of a
//! small customer-record API and exposes a Lambda-style authorizer endpoint.
//!
//! - [`config`] - clap/env configuration, validated before start-up
//! - [`logging`] - `tracing-subscriber` bootstrap
//! - [`routes`] - router and handlers
//! - [`store`] - [`CustomerStore`](store::CustomerStore) and its in-memory implementation
//! - [`error`] - handler error to response mapping

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use tokengate_auth::Authorizer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::{ServerArgs, ServerConfig};
pub use routes::{AppState, router};
pub use store::{CustomerStore, InMemoryCustomerStore};

/// Bind and serve until Ctrl-C
///
/// # Errors
///
/// Returns an error if the authorizer cannot be built, the origin is not a
/// valid header value, or the listener cannot bind.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let authorizer = Arc::new(Authorizer::new(config.authorizer)?);
    let store: Arc<dyn CustomerStore> = Arc::new(InMemoryCustomerStore::new());

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.allowed_origin)?)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = router(AppState::new(authorizer, store))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, origin = %config.allowed_origin, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
