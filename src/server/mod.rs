//! HTTP API.
//!
//! All routes live under `/api`. CORS admits exactly one origin and only
//! `GET`/`POST`.

mod handlers;
pub mod payloads;

pub use handlers::{ApiError, ApiState};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use color_eyre::eyre::WrapErr;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::lifecycle::SessionManager;

/// Build the API router.
pub fn router(manager: Arc<SessionManager>, allowed_origin: &str) -> color_eyre::Result<Router> {
    let origin = HeaderValue::from_str(allowed_origin)
        .wrap_err_with(|| format!("invalid CORS origin: {}", allowed_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/session", post(handlers::create_session))
        .route("/session/:session_id/qr", get(handlers::session_qr))
        .route("/session/:session_id/status", get(handlers::session_status))
        .route("/session/:session_id/id", get(handlers::session_unique_id))
        .route(
            "/session/:session_id/pairing-code",
            get(handlers::session_pairing_code),
        )
        .route("/uniqueid/generate", get(handlers::generate_unique_id))
        .route("/uniqueid/:unique_id/exists", get(handlers::unique_id_exists))
        .route("/bot/session/:unique_id", get(handlers::bot_session))
        .route("/events", get(handlers::lifecycle_events));

    Ok(Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { manager }))
}

/// Start the API server on `addr`.
///
/// Returns the server task and the address actually bound, so tests can
/// pass port 0.
pub async fn start_server(
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    allowed_origin: &str,
) -> color_eyre::Result<(JoinHandle<()>, SocketAddr)> {
    let app = router(manager, allowed_origin)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Linker API listening on http://{}", actual_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((handle, actual_addr))
}
