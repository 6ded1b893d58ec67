//! # Collaborator Ports
//!
//! Narrow contracts the bridge consumes from the rest of the platform. Each port
//! returns a boxed `Send` future so implementations can be shared as
//! `Arc<dyn Port>` across session tasks and swapped for fakes in tests.
//!
//! ## Ports:
//! - **CallDirectory**: call metadata lookup by id
//! - **ExternalMedia**: ask the telephony switch to start/stop streaming a call to us
//! - **EventPublisher**: publish conversation events
//! - **PipelineRunner**: start and terminate the AI pipeline for a call

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::BridgeResult;
use crate::models::{CallMeta, ConversationEvent, ReferenceType};

pub type PortFuture<T> = Pin<Box<dyn Future<Output = BridgeResult<T>> + Send + 'static>>;

/// Parameters for starting external media on a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMediaRequest {
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    /// `host:port` the switch connects its AudioSocket leg to
    pub external_host: String,
    pub encapsulation: String,
    pub transport: String,
    pub format: String,
}

/// External media instance created by the switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMediaHandle {
    pub id: Uuid,
}

/// Parameters for starting the AI pipeline of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStartRequest {
    pub id: Uuid,
    /// WebSocket URL the runner dials back to exchange frames
    pub callback_url: String,
    pub llm_type: String,
    pub llm_messages: Vec<serde_json::Value>,
    pub stt_type: String,
    pub stt_language: String,
    pub tts_type: String,
    pub tts_language: String,
    pub tts_voice_id: String,
}

impl PipelineStartRequest {
    pub fn new(meta: &CallMeta, callback_url: String) -> Self {
        Self {
            id: meta.id,
            callback_url,
            llm_type: meta.llm_type.clone(),
            llm_messages: meta.llm_messages.clone(),
            stt_type: meta.stt_type.clone(),
            stt_language: meta.stt_language.clone(),
            tts_type: meta.tts_type.clone(),
            tts_language: meta.tts_language.clone(),
            tts_voice_id: meta.tts_voice_id.clone(),
        }
    }
}

pub trait CallDirectory: Send + Sync {
    /// Fails with `NotFound` for unknown ids.
    fn get_call(&self, id: Uuid) -> PortFuture<CallMeta>;
}

pub trait ExternalMedia: Send + Sync {
    fn start(&self, request: ExternalMediaRequest) -> PortFuture<ExternalMediaHandle>;
    fn stop(&self, reference_id: Uuid) -> PortFuture<()>;
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ConversationEvent) -> PortFuture<()>;
}

pub trait PipelineRunner: Send + Sync {
    /// Start the pipeline. The future resolves when the pipeline run ends.
    fn start(&self, request: PipelineStartRequest) -> PortFuture<()>;
    fn terminate(&self, id: Uuid) -> PortFuture<()>;
}
