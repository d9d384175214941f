//! Request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::payloads::{
    BotSessionBody, CreateSessionBody, CreatedSessionBody, ErrorBody, ExistsBody,
    PairingCodeBody, QrBody, StatusBody, UniqueIdBody,
};
use crate::error::LinkerError;
use crate::lifecycle::{SessionManager, SessionRequest};

/// Pairing-code values that mean "no code yet".
const PLACEHOLDER_CODES: [&str; 3] = ["", "{}", "null"];

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<SessionManager>,
}

/// An error response: a status code and `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<LinkerError> for ApiError {
    fn from(err: LinkerError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// `POST /api/session`
pub async fn create_session(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedSessionBody>), ApiError> {
    let body: CreateSessionBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?
    };

    let method = body.link_method().map_err(ApiError::bad_request)?;
    let request = SessionRequest {
        unique_id: body.unique_id.clone(),
        method,
        phone_number: body.phone_number(),
    };

    let created = state.manager.create_session(request).await.map_err(|e| {
        warn!("Session creation rejected: {}", e);
        ApiError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedSessionBody {
            session_id: created.session_id,
            unique_id: created.unique_id,
        }),
    ))
}

/// `GET /api/session/:session_id/qr`
pub async fn session_qr(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<QrBody>, ApiError> {
    state
        .manager
        .qr(&session_id)
        .await
        .map(|qr| Json(QrBody { qr }))
        .ok_or_else(|| ApiError::not_found("QR not available"))
}

/// `GET /api/session/:session_id/status`
pub async fn session_status(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Json<StatusBody> {
    let status = state
        .manager
        .status(&session_id)
        .await
        .map(|s| s.as_str())
        .unwrap_or("not_found");
    Json(StatusBody {
        status: status.to_string(),
    })
}

/// `GET /api/session/:session_id/id`
pub async fn session_unique_id(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Json<UniqueIdBody> {
    Json(UniqueIdBody {
        unique_id: state.manager.unique_id(&session_id).await,
    })
}

/// `GET /api/session/:session_id/pairing-code`
pub async fn session_pairing_code(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<PairingCodeBody>, ApiError> {
    state
        .manager
        .pairing_code(&session_id)
        .await
        .filter(|code| !PLACEHOLDER_CODES.contains(&code.trim()))
        .map(|pairing_code| Json(PairingCodeBody { pairing_code }))
        .ok_or_else(|| ApiError::not_found("Pairing code not available"))
}

/// `GET /api/uniqueid/:unique_id/exists`
pub async fn unique_id_exists(
    State(state): State<ApiState>,
    Path(unique_id): Path<String>,
) -> Json<ExistsBody> {
    Json(ExistsBody {
        exists: state.manager.identifier_linked(&unique_id).await,
    })
}

/// `GET /api/uniqueid/generate`
pub async fn generate_unique_id(State(state): State<ApiState>) -> Json<UniqueIdBody> {
    Json(UniqueIdBody {
        unique_id: Some(state.manager.generate_identifier()),
    })
}

/// `GET /api/bot/session/:unique_id`
pub async fn bot_session(
    State(state): State<ApiState>,
    Path(unique_id): Path<String>,
) -> (StatusCode, Json<BotSessionBody>) {
    match state.manager.linked_slot(&unique_id).await {
        Some(path) => (
            StatusCode::OK,
            Json(BotSessionBody {
                exists: true,
                path: Some(path.display().to_string()),
                linked: true,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(BotSessionBody {
                exists: false,
                path: None,
                linked: false,
            }),
        ),
    }
}

/// `GET /api/events`: lifecycle events as server-sent events.
pub async fn lifecycle_events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.manager.subscribe_events();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => warn!("Failed to encode lifecycle event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
