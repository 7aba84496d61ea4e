//! HTTP surface (C6.4) — the operator-facing control plane for starting,
//! stopping, and inspecting instances, mirrored onto axum the way the rest
//! of this codebase's HTTP layers are built.

mod qr;

use crate::config::Config;
use crate::error::GatewayError;
use crate::lifecycle::LifecycleController;
use crate::queue::PendingKind;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
}

pub fn router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session/start/{id}", post(start_session))
        .route("/api/session/stop/{id}", post(stop_session))
        .route("/api/session/reconnect/{id}", post(reconnect_session))
        .route("/api/session/reset/{id}", post(reset_session))
        .route("/api/session/status/{id}", get(session_status))
        .route("/api/session/qr/{id}", get(session_qr))
        .route("/api/instance/{id}/enable", post(enable_instance))
        .route("/api/instance/{id}/disable", post(disable_instance))
        .route("/api/queue/{id}", get(queue_status).delete(clear_queue))
        .route("/api/send-text", post(send_text))
        .route("/api/send-media", post(send_media))
        .layer(TimeoutLayer::new(config.policy.state_check_timeout()))
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::UnknownInstance(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn start_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.controller.start(&id).await;
    StatusCode::ACCEPTED
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let handle = state
        .controller
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayError::UnknownInstance(id.clone()))?;

    let client = {
        let mut session = handle.lock().await;
        session.shutting_down = true;
        session.probes.abort_all();
        session.status = crate::session::SessionStatus::Disconnected;
        session.client_handle.take()
    };
    if let Some(client) = client {
        let _ = crate::adapter::with_timeout(state.controller.policy.destroy_timeout(), async {
            client.destroy().await
        })
        .await;
    }
    Ok(StatusCode::OK)
}

/// `POST /api/session/reset/:id` (§6.4): stop, delete the local auth blob,
/// and start fresh — not a new C7 state, just a composition of the existing
/// stop/start operations (see DESIGN.md's Open Question decision).
async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    if let Some(handle) = state.controller.registry.get(&id).await {
        let client = {
            let mut session = handle.lock().await;
            session.probes.abort_all();
            session.status = crate::session::SessionStatus::Disconnected;
            session.client_handle.take()
        };
        if let Some(client) = client {
            let _ = crate::adapter::with_timeout(state.controller.policy.destroy_timeout(), async {
                client.destroy().await
            })
            .await;
        }
        state.controller.registry.delete(&id).await;
    }

    let _ = state.controller.auth_blobs.delete(&id).await;
    state.controller.start(&id).await;
    Ok(StatusCode::ACCEPTED)
}

async fn reconnect_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    state
        .controller
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayError::UnknownInstance(id.clone()))?;
    state.controller.start(&id).await;
    Ok(StatusCode::ACCEPTED)
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::session::SessionSnapshot>, GatewayError> {
    let handle = state
        .controller
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayError::UnknownInstance(id.clone()))?;
    let snapshot = crate::session::SessionSnapshot::from(&*handle.lock().await);
    Ok(Json(snapshot))
}

async fn session_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let handle = state
        .controller
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayError::UnknownInstance(id.clone()))?;
    let code = handle
        .lock()
        .await
        .qr
        .clone()
        .ok_or_else(|| GatewayError::BadRequest("no QR pending for this instance".into()))?;

    let png = qr::render_png(&code)
        .map_err(|e| GatewayError::BadRequest(format!("failed to render QR: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn enable_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    state
        .controller
        .metadata
        .set_enabled(&id, true)
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn disable_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    state
        .controller
        .metadata
        .set_enabled(&id, false)
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct QueueStatusBody {
    instance_id: String,
    depth: usize,
}

async fn queue_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let depth = state.controller.queue.len(&id).await;
    Json(QueueStatusBody { instance_id: id, depth })
}

async fn clear_queue(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.controller.queue.clear(&id).await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct SendTextBody {
    instance_id: String,
    to: String,
    content: String,
}

async fn send_text(
    State(state): State<AppState>,
    Json(body): Json<SendTextBody>,
) -> impl IntoResponse {
    let (id, position) = state
        .controller
        .queue
        .enqueue(&body.instance_id, PendingKind::Text { to: body.to, content: body.content })
        .await;
    Json(serde_json::json!({ "message_id": id, "queue_position": position }))
}

#[derive(Deserialize)]
struct SendMediaBody {
    instance_id: String,
    to: String,
    media_ref: String,
    caption: Option<String>,
}

async fn send_media(
    State(state): State<AppState>,
    Json(body): Json<SendMediaBody>,
) -> impl IntoResponse {
    let (id, position) = state
        .controller
        .queue
        .enqueue(
            &body.instance_id,
            PendingKind::Media { to: body.to, media_ref: body.media_ref, caption: body.caption },
        )
        .await;
    Json(serde_json::json!({ "message_id": id, "queue_position": position }))
}
