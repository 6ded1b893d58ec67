//! # Runner Transport
//!
//! Moves frames between a session and its runner WebSocket.
//!
//! ## Data Flow:
//! - **Outbound**: producers call `send_*`, which encode a frame and put it on
//!   the session's bounded queue; [`sender_loop`] drains the queue into the
//!   WebSocket sink. A full queue blocks the producer.
//! - **Inbound**: [`RunnerTransport::inbound_loop`] decodes binary messages,
//!   plays runner audio to the telephony leg and hands RTVI envelopes to the
//!   translator.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::audiosocket::{self, WritePacing};
use crate::audio::codec::downsample;
use crate::config::RunnerConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::runner::frame::RunnerFrame;
use crate::runner::rtvi::{send_text_envelope, RtviTranslator};
use crate::session::{Session, SessionFrame};

pub struct RunnerTransport {
    /// Rate stamped on outbound audio
    sample_rate: u32,
    channels: u32,
    pacing: WritePacing,
    translator: RtviTranslator,
}

impl RunnerTransport {
    pub fn new(config: &RunnerConfig, pacing: WritePacing, translator: RtviTranslator) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            pacing,
            translator,
        }
    }

    /// Queue one chunk of caller audio for the runner.
    pub async fn send_audio(&self, session: &Session, packet_id: u64, pcm: Vec<u8>) -> BridgeResult<()> {
        let frame = RunnerFrame::Audio {
            id: packet_id,
            payload: pcm,
            sample_rate: self.sample_rate,
            channels: self.channels,
        };

        session.enqueue(SessionFrame::binary(frame.encode())).await
    }

    /// Inject text into the conversation, answered immediately with speech.
    pub async fn send_text(&self, session: &Session, text: &str) -> BridgeResult<()> {
        let msg_id = Uuid::new_v4().to_string();
        self.send_rtvi_text(session, &msg_id, text, true, true).await
    }

    pub async fn send_rtvi_text(
        &self,
        session: &Session,
        msg_id: &str,
        text: &str,
        run_immediately: bool,
        audio_response: bool,
    ) -> BridgeResult<()> {
        let data = send_text_envelope(msg_id, text, run_immediately, audio_response)?;
        let frame = RunnerFrame::Message { data };

        debug!(id = %session.id, msg_id, "Queueing RTVI send-text");
        session.enqueue(SessionFrame::binary(frame.encode())).await
    }

    /// Read runner messages until the socket closes, fails, or the session ends.
    ///
    /// Returns `Ok(())` for a clean close or cancellation; any error ends the
    /// loop and is returned so the caller can cancel the session.
    pub async fn inbound_loop<S>(&self, session: &Session, mut stream: S) -> BridgeResult<()>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::select! {
                _ = session.cancelled() => return Ok(()),
                message = stream.next() => message,
            };

            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    debug!(id = %session.id, "Runner stream ended");
                    return Ok(());
                }
            };

            match message {
                WsMessage::Binary(data) => match self.handle_frame(session, &data).await {
                    Ok(()) | Err(BridgeError::Cancelled) => {}
                    Err(err) => return Err(err),
                },
                WsMessage::Ping(_) => {
                    // tungstenite queues the Pong reply itself
                    debug!(id = %session.id, "Runner ping");
                }
                WsMessage::Close(frame) => {
                    info!(id = %session.id, ?frame, "Runner closed the connection");
                    return Ok(());
                }
                WsMessage::Text(text) => {
                    warn!(id = %session.id, len = text.len(), "Text messages are not supported on the runner socket");
                }
                WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn handle_frame(&self, session: &Session, data: &[u8]) -> BridgeResult<()> {
        let frame = match RunnerFrame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(id = %session.id, error = %err, "Dropping undecodable runner frame");
                return Ok(());
            }
        };

        match frame {
            RunnerFrame::Audio {
                payload,
                sample_rate,
                channels,
                ..
            } => {
                if channels != 1 {
                    return Err(BridgeError::Protocol(format!(
                        "runner audio must be mono, got {} channels",
                        channels
                    )));
                }

                let pcm = match downsample(sample_rate, &payload) {
                    Ok(pcm) => pcm,
                    Err(BridgeError::UnsupportedRate(rate)) => {
                        warn!(id = %session.id, rate, "Dropping runner audio with unsupported rate");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                };

                if pcm.is_empty() {
                    return Ok(());
                }

                audiosocket::write(session.token(), session.telephony(), &pcm, self.pacing).await
            }
            RunnerFrame::Message { data } => {
                self.translator.handle(session, &data);
                Ok(())
            }
            other => {
                debug!(id = %session.id, kind = other.kind(), "Ignoring runner frame");
                Ok(())
            }
        }
    }
}

/// Drain the outbound queue into the runner socket until the queue closes or
/// the token fires, then close the sink.
pub async fn sender_loop<S>(
    token: CancellationToken,
    mut outbound: mpsc::Receiver<SessionFrame>,
    mut sink: S,
) -> BridgeResult<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let res = loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            frame = outbound.recv() => frame,
        };

        let Some(frame) = frame else {
            break Ok(());
        };

        if let Err(err) = sink.send(into_ws_message(frame)).await {
            break Err(BridgeError::Runner(err.to_string()));
        }
    };

    if let Err(err) = sink.close().await {
        debug!(error = %err, "Runner sink close failed");
    }
    res
}

fn into_ws_message(frame: SessionFrame) -> WsMessage {
    WsMessage::Binary(frame.payload)
}

/// Spawn [`sender_loop`] for a session. A failed send cancels the session.
pub fn spawn_sender<S>(session: Arc<Session>, outbound: mpsc::Receiver<SessionFrame>, sink: S)
where
    S: Sink<WsMessage> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        if let Err(err) = sender_loop(session.token().clone(), outbound, sink).await {
            warn!(id = %session.id, error = %err, "Runner sender failed");
            session.cancel();
        }
    });
}
