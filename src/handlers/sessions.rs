//! # Session REST API Handlers
//!
//! Inspect and control live bridge sessions.
//!
//! ## Available Endpoints:
//! - `GET /sessions` - List active sessions
//! - `GET /sessions/{id}` - One session
//! - `DELETE /sessions/{id}` - Stop a session (idempotent)
//! - `POST /sessions/{id}/messages` - Inject text into the conversation

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::session::SessionSummary;
use crate::state::AppState;

/// Request body for injecting a message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Client-chosen message id; generated when absent
    pub id: Option<String>,
    pub text: String,
    #[serde(default = "default_true")]
    pub run_immediately: bool,
    #[serde(default = "default_true")]
    pub audio_response: bool,
}

fn default_true() -> bool {
    true
}

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, BridgeError> {
    let mut sessions: Vec<SessionSummary> = state
        .registry()
        .list()
        .iter()
        .map(|session| session.summary())
        .collect();
    sessions.sort_by_key(|s| s.created_at);

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, BridgeError> {
    let session = state.registry().get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(session.summary()))
}

pub async fn stop_session(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, BridgeError> {
    state.registry().stop(&path.into_inner()).await;
    Ok(HttpResponse::NoContent().finish())
}

/// Queue an RTVI `send-text` message for the session's runner.
pub async fn send_message(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, BridgeError> {
    let request = body.into_inner();
    if request.text.trim().is_empty() {
        return Err(BridgeError::BadRequest("text must not be empty".to_string()));
    }

    let session = state.registry().get(&path.into_inner())?;
    let msg_id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .transport()
        .send_rtvi_text(
            &session,
            &msg_id,
            &request.text,
            request.run_immediately,
            request.audio_response,
        )
        .await?;

    Ok(HttpResponse::Accepted().json(json!({
        "status": "queued",
        "id": msg_id,
        "session_id": session.id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
