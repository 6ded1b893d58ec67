use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::state::AppState;

/// Ask the telephony switch to stream a call to this bridge's AudioSocket listener.
pub async fn start_media(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, BridgeError> {
    let call_id = path.into_inner();
    let handle = state.bridge.start_external_media(call_id).await?;

    Ok(HttpResponse::Created().json(json!({
        "call_id": call_id,
        "external_media_id": handle.id,
        "external_host": state.config.audiosocket.advertise_address,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
