//! # Runner Callback Server
//!
//! Accepts the WebSocket the pipeline runner opens back to the bridge after a
//! pipeline start. The runner dials `<callback_base_url>/ws?id=<call id>`.
//!
//! ## Handshake:
//! - unknown or missing `id` → HTTP 404
//! - session already has a runner attached → HTTP 409
//! - otherwise the connection claims the session's outbound queue
//!
//! After the handshake the sender task drains the queue while this task runs
//! the inbound loop. When the inbound loop ends the session is cancelled.

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::runner::transport::{spawn_sender, RunnerTransport};
use crate::session::{Session, SessionFrame, SessionRegistry};

pub struct RunnerServer {
    registry: Arc<SessionRegistry>,
    transport: Arc<RunnerTransport>,
}

impl RunnerServer {
    pub fn new(registry: Arc<SessionRegistry>, transport: Arc<RunnerTransport>) -> Self {
        Self { registry, transport }
    }

    /// Accept runner connections until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "Runner accept failed");
                        continue;
                    }
                },
            };

            debug!(%addr, "Runner connected");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    warn!(%addr, error = %err, "Runner connection ended with error");
                }
            });
        }

        info!("Runner callback server stopped");
    }

    pub async fn handle_connection<S>(&self, stream: S) -> BridgeResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut attached: Option<(Arc<Session>, mpsc::Receiver<SessionFrame>)> = None;

        let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
            match self.attach(request) {
                Ok(claimed) => {
                    attached = Some(claimed);
                    Ok(response)
                }
                Err(err) => Err(reject(&err)),
            }
        })
        .await?;

        let (session, outbound) =
            attached.ok_or_else(|| BridgeError::Protocol("runner handshake without a session".to_string()))?;

        info!(id = %session.id, "Runner attached to session");

        let (sink, stream) = ws.split();
        spawn_sender(session.clone(), outbound, sink);

        let res = self.transport.inbound_loop(&session, stream).await;
        session.cancel();

        info!(id = %session.id, "Runner detached from session");
        res
    }

    /// Resolve the session named in the handshake query and claim its queue.
    fn attach(&self, request: &Request) -> BridgeResult<(Arc<Session>, mpsc::Receiver<SessionFrame>)> {
        let id = call_id(request.uri().query())
            .ok_or_else(|| BridgeError::NotFound(request.uri().to_string()))?;

        let session = self.registry.get(&id)?;
        let outbound = session
            .take_outbound()
            .ok_or_else(|| BridgeError::AlreadyExists(format!("runner for session {}", id)))?;

        Ok((session, outbound))
    }
}

/// Extract the `id` query parameter.
fn call_id(query: Option<&str>) -> Option<Uuid> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "id")
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

fn reject(err: &BridgeError) -> ErrorResponse {
    let status = match err {
        BridgeError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::NOT_FOUND,
    };

    warn!(error = %err, status = status.as_u16(), "Rejecting runner handshake");

    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = status;
    response
}
