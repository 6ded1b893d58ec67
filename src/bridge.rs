//! # Bridge Orchestrator
//!
//! Wires one telephony connection to one AI pipeline run.
//!
//! ## Per-Connection Flow:
//! 1. Read the AudioSocket handshake for the stream id
//! 2. Resolve the call metadata for that id
//! 3. Register the session
//! 4. Spawn the keepalive supervisor, the pipeline starter and the media relay
//! 5. Wait for the session's cancellation
//! 6. Tear down: stop external media, then stop the session
//!
//! Any of the spawned tasks may end the call: the media relay on hangup or a
//! read failure, the pipeline starter when the run ends, the runner server
//! when the runner disconnects, or the control API through the registry.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::audiosocket::{get_next_media, get_streaming_id, telephony_writer};
use crate::audio::codec::upsample_8k_to_16k;
use crate::config::{AudioSocketConfig, RunnerConfig};
use crate::error::BridgeResult;
use crate::ports::{
    CallDirectory, ExternalMedia, ExternalMediaHandle, ExternalMediaRequest, PipelineRunner,
    PipelineStartRequest,
};
use crate::runner::RunnerTransport;
use crate::session::{KeepaliveSupervisor, Session, SessionRegistry};

pub struct Bridge {
    audiosocket: AudioSocketConfig,
    runner: RunnerConfig,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn CallDirectory>,
    media: Arc<dyn ExternalMedia>,
    pipeline: Arc<dyn PipelineRunner>,
    transport: Arc<RunnerTransport>,
    keepalive: KeepaliveSupervisor,
}

impl Bridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audiosocket: AudioSocketConfig,
        runner: RunnerConfig,
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn CallDirectory>,
        media: Arc<dyn ExternalMedia>,
        pipeline: Arc<dyn PipelineRunner>,
        transport: Arc<RunnerTransport>,
        keepalive: KeepaliveSupervisor,
    ) -> Self {
        Self {
            audiosocket,
            runner,
            registry,
            directory,
            media,
            pipeline,
            transport,
            keepalive,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<RunnerTransport> {
        &self.transport
    }

    /// Accept telephony connections until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "AudioSocket accept failed");
                        continue;
                    }
                },
            };

            if let Err(err) = stream.set_nodelay(true) {
                debug!(%addr, error = %err, "Could not disable Nagle on telephony connection");
            }

            debug!(%addr, "Telephony leg connected");
            let bridge = self.clone();
            tokio::spawn(async move {
                if let Err(err) = bridge.handle_connection(stream).await {
                    warn!(%addr, error = %err, "Telephony connection ended with error");
                }
            });
        }

        info!("AudioSocket listener stopped");
    }

    /// Run one call from handshake to teardown.
    ///
    /// Returns once the session has been torn down. Errors are only returned
    /// for failures before the session exists; the connection is dropped then.
    pub async fn handle_connection<S>(&self, stream: S) -> BridgeResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);

        let id = get_streaming_id(&mut reader).await?;
        debug!(id = %id, "Telephony handshake received");

        let meta = self.directory.get_call(id).await?;
        let session = self.registry.create(&meta, id, telephony_writer(writer))?;

        tokio::spawn({
            let keepalive = self.keepalive.clone();
            let token = session.token().clone();
            let writer = session.telephony().clone();
            async move { keepalive.run(token, writer).await }
        });

        let request = PipelineStartRequest::new(&meta, self.runner.callback_url(&id));
        let run = self.pipeline.start(request);
        tokio::spawn({
            let token = session.token().clone();
            async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    res = run => {
                        match res {
                            Ok(()) => info!(id = %id, "Pipeline run finished"),
                            Err(err) => warn!(id = %id, error = %err, "Pipeline run failed"),
                        }
                        token.cancel();
                    }
                }
            }
        });

        tokio::spawn(relay_media(self.transport.clone(), session.clone(), reader));

        session.cancelled().await;
        self.teardown(&session).await;
        Ok(())
    }

    async fn teardown(&self, session: &Session) {
        if let Err(err) = self.media.stop(session.reference_id).await {
            warn!(id = %session.id, error = %err, "Could not stop external media");
        }

        self.registry.stop(&session.id).await;
    }

    /// Point the telephony switch at this bridge's AudioSocket listener for a call.
    pub async fn start_external_media(&self, call_id: Uuid) -> BridgeResult<ExternalMediaHandle> {
        let meta = self.directory.get_call(call_id).await?;

        let request = ExternalMediaRequest {
            reference_type: meta.reference_type,
            reference_id: meta.reference_id,
            external_host: self.audiosocket.advertise_address.clone(),
            encapsulation: self.audiosocket.encapsulation.clone(),
            transport: self.audiosocket.transport.clone(),
            format: self.audiosocket.format.clone(),
        };

        let handle = self.media.start(request).await?;
        info!(call_id = %call_id, media_id = %handle.id, "Started external media");
        Ok(handle)
    }
}

/// Relay caller audio to the runner until hangup, a read failure or cancellation.
async fn relay_media<R>(transport: Arc<RunnerTransport>, session: Arc<Session>, mut reader: ReadHalf<R>)
where
    R: AsyncRead + Send + 'static,
{
    let mut packet_id: u64 = 0;

    loop {
        let media = tokio::select! {
            _ = session.cancelled() => break,
            media = get_next_media(&mut reader) => media,
        };

        match media {
            Ok(Some(pcm)) => {
                packet_id += 1;
                let pcm = upsample_8k_to_16k(&pcm);
                if let Err(err) = transport.send_audio(&session, packet_id, pcm).await {
                    debug!(id = %session.id, error = %err, "Stopped relaying caller audio");
                    break;
                }
            }
            Ok(None) => {}
            Err(err) if err.is_hangup() => {
                info!(id = %session.id, "Caller hung up");
                break;
            }
            Err(err) => {
                warn!(id = %session.id, error = %err, "Telephony read failed");
                break;
            }
        }
    }

    session.cancel();
}
