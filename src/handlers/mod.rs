pub mod calls;
pub mod sessions;

use actix_web::web;

use crate::health;

/// Register the control API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/sessions", web::get().to(sessions::list_sessions))
            .route("/sessions/{id}", web::get().to(sessions::get_session))
            .route("/sessions/{id}", web::delete().to(sessions::stop_session))
            .route("/sessions/{id}/messages", web::post().to(sessions::send_message))
            .route("/calls/{id}/media", web::post().to(calls::start_media)),
    )
    // Also provide health check at root level for probes
    .route("/health", web::get().to(health::health_check));
}
