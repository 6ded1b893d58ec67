//! # Control Plane Client
//!
//! HTTP/JSON adapter implementing every collaborator port against the
//! platform's control plane.
//!
//! ## Endpoints (relative to `control_plane.base_url`):
//! - `GET /v1/pipecatcalls/{id}` → call metadata
//! - `POST /v1/calls/{reference_id}/external-media` / `DELETE` same path
//! - `POST /v1/events` → conversation events
//! - `POST /v1/pipelines` → starts a pipeline run, answers when the run ends
//! - `DELETE /v1/pipelines/{id}` → terminates a run
//!
//! Requests use the configured timeout, except the pipeline start request,
//! which stays open for the whole run.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::config::ControlPlaneConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{CallMeta, ConversationEvent};
use crate::ports::{
    CallDirectory, EventPublisher, ExternalMedia, ExternalMediaHandle, ExternalMediaRequest,
    PipelineRunner, PipelineStartRequest, PortFuture,
};

#[derive(Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    client: Client,
    /// No request timeout; pipeline runs last as long as the call
    run_client: Client,
}

impl ControlPlaneClient {
    pub fn new(config: &ControlPlaneConfig) -> BridgeResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let run_client = Client::builder().connect_timeout(config.timeout()).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            run_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success status onto a bridge error, keeping the body for context.
async fn check(resp: Response, what: &str) -> BridgeResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(BridgeError::NotFound(what.to_string())),
        _ => Err(BridgeError::Collaborator(format!("{} failed {}: {}", what, status, body))),
    }
}

async fn json<T: DeserializeOwned>(resp: Response, what: &str) -> BridgeResult<T> {
    let resp = check(resp, what).await?;
    Ok(resp.json::<T>().await?)
}

impl CallDirectory for ControlPlaneClient {
    fn get_call(&self, id: Uuid) -> PortFuture<CallMeta> {
        let request = self.client.get(self.url(&format!("/v1/pipecatcalls/{}", id)));
        Box::pin(async move {
            let resp = request.send().await?;
            json(resp, &format!("pipecatcall {}", id)).await
        })
    }
}

impl ExternalMedia for ControlPlaneClient {
    fn start(&self, request: ExternalMediaRequest) -> PortFuture<ExternalMediaHandle> {
        let what = format!("external media start for {}", request.reference_id);
        let builder = self
            .client
            .post(self.url(&format!("/v1/calls/{}/external-media", request.reference_id)))
            .json(&request);
        Box::pin(async move { json(builder.send().await?, &what).await })
    }

    fn stop(&self, reference_id: Uuid) -> PortFuture<()> {
        let builder = self
            .client
            .delete(self.url(&format!("/v1/calls/{}/external-media", reference_id)));
        Box::pin(async move {
            check(builder.send().await?, &format!("external media stop for {}", reference_id)).await?;
            Ok(())
        })
    }
}

impl EventPublisher for ControlPlaneClient {
    fn publish(&self, event: ConversationEvent) -> PortFuture<()> {
        let builder = self.client.post(self.url("/v1/events")).json(&event);
        Box::pin(async move {
            check(builder.send().await?, event.event_type.as_str()).await?;
            debug!(message_id = %event.message.id, "Published conversation event");
            Ok(())
        })
    }
}

impl PipelineRunner for ControlPlaneClient {
    fn start(&self, request: PipelineStartRequest) -> PortFuture<()> {
        let what = format!("pipeline run {}", request.id);
        let builder = self.run_client.post(self.url("/v1/pipelines")).json(&request);
        Box::pin(async move {
            check(builder.send().await?, &what).await?;
            Ok(())
        })
    }

    fn terminate(&self, id: Uuid) -> PortFuture<()> {
        let builder = self.client.delete(self.url(&format!("/v1/pipelines/{}", id)));
        Box::pin(async move {
            check(builder.send().await?, &format!("pipeline terminate {}", id)).await?;
            Ok(())
        })
    }
}
