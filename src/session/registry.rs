//! # Session Registry
//!
//! Tracks the live session of every bridged call, keyed by the stream id the
//! telephony leg announced.
//!
//! ## Session Lifecycle:
//! 1. **Absent**: no entry for the id
//! 2. **Active**: `create` inserted it; its tasks run until the cancellation token fires
//! 3. **Absent**: `stop` removed it, closed the telephony leg and terminated the pipeline
//!
//! ## Thread Safety:
//! One mutex protects only the id → session map; it is never held across an
//! `.await`. Session fields are read by several tasks, but each mutable field has
//! a single writer: the outbound queue is drained only by the runner sender task
//! and the LLM text accumulator is touched only by the runner inbound loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::audiosocket::{self, TelephonyWriter};
use crate::error::{BridgeError, BridgeResult};
use crate::models::{CallMeta, ReferenceType};
use crate::ports::PipelineRunner;

/// Unit of work on a session's outbound queue: one encoded runner frame,
/// sent as a binary WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFrame {
    pub payload: Vec<u8>,
}

impl SessionFrame {
    pub fn binary(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}

/// Live state linking one telephony connection to one runner connection.
pub struct Session {
    /// Stream id from the AudioSocket handshake
    pub id: Uuid,
    pub customer_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub created_at: DateTime<Utc>,

    token: CancellationToken,

    outbound: mpsc::Sender<SessionFrame>,
    /// Claimed once by the runner connection that attaches to this session
    outbound_rx: Mutex<Option<mpsc::Receiver<SessionFrame>>>,

    telephony: TelephonyWriter,

    /// Streamed `bot-llm-text` deltas awaiting `bot-llm-stopped`
    bot_llm_text: Mutex<String>,
}

impl Session {
    fn new(meta: &CallMeta, id: Uuid, telephony: TelephonyWriter, queue_size: usize) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(queue_size);

        Self {
            id,
            customer_id: meta.customer_id,
            reference_type: meta.reference_type,
            reference_id: meta.reference_id,
            created_at: Utc::now(),
            token: CancellationToken::new(),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            telephony,
            bot_llm_text: Mutex::new(String::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fire the session's cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn telephony(&self) -> &TelephonyWriter {
        &self.telephony
    }

    /// Queue a frame for the runner.
    ///
    /// Waits while the queue is full; frames are never dropped. Returns
    /// `Cancelled` if the session ends first.
    pub async fn enqueue(&self, frame: SessionFrame) -> BridgeResult<()> {
        tokio::select! {
            _ = self.token.cancelled() => Err(BridgeError::Cancelled),
            res = self.outbound.send(frame) => res.map_err(|_| BridgeError::Cancelled),
        }
    }

    /// Hand the outbound queue receiver to the runner sender task.
    /// Returns `None` once a runner connection has already claimed it.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<SessionFrame>> {
        self.outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn append_bot_llm_text(&self, text: &str) {
        self.bot_llm_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    /// Return the accumulated LLM text and reset the accumulator.
    pub fn take_bot_llm_text(&self) -> String {
        std::mem::take(&mut *self.bot_llm_text.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            customer_id: self.customer_id,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            created_at: self.created_at,
            cancelled: self.is_cancelled(),
            runner_attached: self
                .outbound_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none(),
        }
    }
}

/// Serializable view of a session for the control API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Set while teardown is in progress
    pub cancelled: bool,
    pub runner_attached: bool,
}

/// Concurrent map of active sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,

    /// Depth of each session's outbound queue
    queue_size: usize,

    pipeline: Arc<dyn PipelineRunner>,
}

impl SessionRegistry {
    pub fn new(queue_size: usize, pipeline: Arc<dyn PipelineRunner>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_size: queue_size.max(1),
            pipeline,
        }
    }

    /// Register a session for `streaming_id`.
    ///
    /// The existence check and the insert happen under one lock, so two
    /// connections announcing the same id cannot both succeed.
    pub fn create(
        &self,
        meta: &CallMeta,
        streaming_id: Uuid,
        conn: TelephonyWriter,
    ) -> BridgeResult<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if sessions.contains_key(&streaming_id) {
            return Err(BridgeError::AlreadyExists(streaming_id.to_string()));
        }

        let session = Arc::new(Session::new(meta, streaming_id, conn, self.queue_size));
        sessions.insert(streaming_id, session.clone());

        info!(
            id = %streaming_id,
            customer_id = %session.customer_id,
            reference_type = session.reference_type.as_str(),
            reference_id = %session.reference_id,
            "Created session"
        );
        Ok(session)
    }

    pub fn get(&self, id: &Uuid) -> BridgeResult<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    /// Tear a session down. Calling it for an absent id only logs.
    ///
    /// ## Steps:
    /// 1. Remove the entry (the caller that removes it performs the rest)
    /// 2. Fire the session's cancellation, which releases any in-flight telephony write
    /// 3. Close the telephony connection, logging failures
    /// 4. Ask the AI pipeline to terminate
    pub async fn stop(&self, id: &Uuid) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        let session = match removed {
            Some(session) => session,
            None => {
                debug!(id = %id, "Session already stopped");
                return;
            }
        };

        session.cancel();

        if let Err(err) = audiosocket::close(session.telephony()).await {
            warn!(id = %id, error = %err, "Could not close the telephony connection");
        }

        if let Err(err) = self.pipeline.terminate(*id).await {
            warn!(id = %id, error = %err, "Could not terminate the AI pipeline");
        }

        info!(id = %id, "Stopped session");
    }

    /// Stop every active session (used on shutdown).
    pub async fn stop_all(&self) {
        for id in self.ids() {
            self.stop(&id).await;
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
