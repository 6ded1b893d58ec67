//! # Domain Models
//!
//! Data exchanged with the collaborators around the bridge: the call metadata
//! looked up when a telephony leg connects, and the conversation events the
//! RTVI translator publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the pipeline call is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Call,
    AiCall,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Call => "call",
            ReferenceType::AiCall => "ai_call",
        }
    }
}

/// Metadata of one AI pipeline call, resolved by the stream id the telephony
/// leg announces in its handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMeta {
    pub id: Uuid,
    pub customer_id: Uuid,
    #[serde(default)]
    pub activeflow_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,

    pub llm_type: String,
    /// Seed messages handed to the LLM before the conversation starts
    #[serde(default)]
    pub llm_messages: Vec<serde_json::Value>,

    #[serde(default)]
    pub stt_type: String,
    #[serde(default)]
    pub stt_language: String,

    #[serde(default)]
    pub tts_type: String,
    #[serde(default)]
    pub tts_language: String,
    #[serde(default)]
    pub tts_voice_id: String,
}

/// Conversation event types published to the event collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "message_bot_transcription")]
    BotTranscription,
    #[serde(rename = "message_user_transcription")]
    UserTranscription,
    #[serde(rename = "message_user_llm")]
    UserLlm,
    #[serde(rename = "message_bot_llm")]
    BotLlm,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BotTranscription => "message_bot_transcription",
            EventType::UserTranscription => "message_user_transcription",
            EventType::UserLlm => "message_user_llm",
            EventType::BotLlm => "message_bot_llm",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            EventType::BotTranscription | EventType::BotLlm => Role::Assistant,
            EventType::UserTranscription | EventType::UserLlm => Role::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
}

/// One utterance of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub call_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub role: Role,
    pub text: String,
    pub tm_create: DateTime<Utc>,
}

/// Event handed to the publish collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub event_type: EventType,
    pub message: ConversationMessage,
}
