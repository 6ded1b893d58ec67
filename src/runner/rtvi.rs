//! # RTVI Translator
//!
//! Decodes the RTVI JSON envelopes carried in runner `Message` frames and turns
//! the conversation-relevant ones into [`ConversationEvent`]s.
//!
//! ## Dispatch:
//! - `bot-transcription` → BotTranscription event
//! - `user-transcription` → UserTranscription event, final results only
//! - `user-llm-text` → UserLlm event
//! - `bot-llm-text` → appended to the session's accumulator
//! - `bot-llm-stopped` → BotLlm event with the accumulated text
//! - anything else → logged

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::BridgeResult;
use crate::models::{ConversationEvent, ConversationMessage, EventType};
use crate::ports::EventPublisher;
use crate::session::Session;

pub const RTVI_LABEL: &str = "rtvi-ai";

/// Types recognized but not published.
const LOGGED_ONLY: &[&str] = &[
    "bot-tts-text",
    "bot-llm-started",
    "bot-tts-started",
    "bot-tts-stopped",
    "user-started-speaking",
    "user-stopped-speaking",
    "bot-started-speaking",
    "bot-stopped-speaking",
    "bot-ready",
    "metrics",
    "error",
    "server-message",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    label: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TextData {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "final")]
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct SendTextOptions {
    run_immediately: bool,
    audio_response: bool,
}

#[derive(Debug, Serialize)]
struct SendTextData<'a> {
    content: &'a str,
    options: SendTextOptions,
}

#[derive(Debug, Serialize)]
struct SendTextEnvelope<'a> {
    id: &'a str,
    label: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    data: SendTextData<'a>,
}

/// Build the `send-text` envelope that injects text into the conversation.
pub fn send_text_envelope(
    id: &str,
    text: &str,
    run_immediately: bool,
    audio_response: bool,
) -> BridgeResult<String> {
    let envelope = SendTextEnvelope {
        id,
        label: RTVI_LABEL,
        kind: "send-text",
        data: SendTextData {
            content: text,
            options: SendTextOptions {
                run_immediately,
                audio_response,
            },
        },
    };

    Ok(serde_json::to_string(&envelope)?)
}

pub struct RtviTranslator {
    publisher: Arc<dyn EventPublisher>,
}

impl RtviTranslator {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Translate one envelope for `session`.
    ///
    /// ## Returns:
    /// - `Ok(Some(event))` when the envelope produces a conversation event
    /// - `Ok(None)` for envelopes that only update state or are ignored
    /// - `Err(Decode)` when the payload is not an RTVI envelope
    pub fn translate(&self, session: &Session, raw: &str) -> BridgeResult<Option<ConversationEvent>> {
        let envelope: Envelope = serde_json::from_str(raw)?;

        if envelope.label != RTVI_LABEL {
            warn!(id = %session.id, label = %envelope.label, "Ignoring message with unexpected label");
            return Ok(None);
        }

        let text = || serde_json::from_value::<TextData>(envelope.data.clone());

        let event = match envelope.kind.as_str() {
            "bot-transcription" => Some((EventType::BotTranscription, text()?.text)),
            "user-transcription" => {
                let data = text()?;
                if !data.is_final {
                    return Ok(None);
                }
                Some((EventType::UserTranscription, data.text))
            }
            "user-llm-text" => Some((EventType::UserLlm, text()?.text)),
            "bot-llm-text" => {
                session.append_bot_llm_text(&text()?.text);
                None
            }
            "bot-llm-stopped" => Some((EventType::BotLlm, session.take_bot_llm_text())),
            kind if LOGGED_ONLY.contains(&kind) => {
                debug!(id = %session.id, kind, data = %envelope.data, "RTVI message");
                None
            }
            kind => {
                debug!(id = %session.id, kind, "Unhandled RTVI message type");
                None
            }
        };

        Ok(event.map(|(event_type, text)| build_event(session, event_type, text)))
    }

    /// Translate and publish without waiting for the publisher.
    pub fn handle(&self, session: &Session, raw: &str) {
        let event = match self.translate(session, raw) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(err) => {
                warn!(id = %session.id, error = %err, "Could not translate RTVI message");
                return;
            }
        };

        debug!(id = %session.id, event_type = event.event_type.as_str(), "Publishing conversation event");
        let publish = self.publisher.publish(event);
        let id = session.id;
        tokio::spawn(async move {
            if let Err(err) = publish.await {
                error!(id = %id, error = %err, "Could not publish conversation event");
            }
        });
    }
}

fn build_event(session: &Session, event_type: EventType, text: String) -> ConversationEvent {
    ConversationEvent {
        event_type,
        message: ConversationMessage {
            id: Uuid::new_v4(),
            customer_id: session.customer_id,
            call_id: session.id,
            reference_type: session.reference_type,
            reference_id: session.reference_id,
            role: event_type.role(),
            text,
            tm_create: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::models::{ReferenceType, Role};
    use crate::ports::fakes::{call_meta, FakePublisher};
    use crate::session::registry::tests::{detached_writer, registry_with};
    use serde_json::json;

    fn fixture() -> (Arc<Session>, RtviTranslator, Arc<FakePublisher>) {
        let (registry, _) = registry_with(4);
        let id = Uuid::new_v4();
        let session = registry.create(&call_meta(id), id, detached_writer()).unwrap();
        let publisher = Arc::new(FakePublisher::default());
        (session, RtviTranslator::new(publisher.clone()), publisher)
    }

    fn envelope(kind: &str, data: Value) -> String {
        json!({"label": "rtvi-ai", "type": kind, "data": data}).to_string()
    }

    #[test]
    fn test_interim_user_transcription_is_dropped() {
        let (session, translator, _) = fixture();
        let raw = envelope("user-transcription", json!({"text": "hel", "final": false}));

        assert!(translator.translate(&session, &raw).unwrap().is_none());
    }

    #[test]
    fn test_final_user_transcription_emits_event() {
        let (session, translator, _) = fixture();
        let raw = envelope(
            "user-transcription",
            json!({"text": "hello there", "user_id": "u1", "timestamp": "t", "final": true}),
        );

        let event = translator.translate(&session, &raw).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::UserTranscription);
        assert_eq!(event.message.text, "hello there");
        assert_eq!(event.message.role, Role::User);
        assert_eq!(event.message.call_id, session.id);
        assert_eq!(event.message.customer_id, session.customer_id);
        assert_eq!(event.message.reference_type, ReferenceType::AiCall);
        assert_eq!(event.message.reference_id, session.reference_id);
    }

    #[test]
    fn test_bot_llm_deltas_concatenate_on_stop() {
        let (session, translator, _) = fixture();

        for delta in ["The weather ", "is ", "sunny."] {
            let raw = envelope("bot-llm-text", json!({"text": delta}));
            assert!(translator.translate(&session, &raw).unwrap().is_none());
        }

        let stopped = envelope("bot-llm-stopped", Value::Null);
        let event = translator.translate(&session, &stopped).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::BotLlm);
        assert_eq!(event.message.text, "The weather is sunny.");
        assert_eq!(event.message.role, Role::Assistant);

        let again = translator.translate(&session, &stopped).unwrap().unwrap();
        assert_eq!(again.message.text, "");
    }

    #[test]
    fn test_bot_transcription_and_user_llm_text() {
        let (session, translator, _) = fixture();

        let bot = envelope("bot-transcription", json!({"text": "Hi!"}));
        let event = translator.translate(&session, &bot).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::BotTranscription);

        let user = envelope("user-llm-text", json!({"text": "What time is it?"}));
        let event = translator.translate(&session, &user).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::UserLlm);
        assert_eq!(event.message.text, "What time is it?");
    }

    #[test]
    fn test_foreign_label_and_unknown_types_are_ignored() {
        let (session, translator, _) = fixture();

        let foreign = json!({"label": "other", "type": "bot-transcription", "data": {"text": "x"}});
        assert!(translator.translate(&session, &foreign.to_string()).unwrap().is_none());

        let speaking = envelope("bot-started-speaking", Value::Null);
        assert!(translator.translate(&session, &speaking).unwrap().is_none());

        let unknown = envelope("something-new", json!({}));
        assert!(translator.translate(&session, &unknown).unwrap().is_none());
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let (session, translator, _) = fixture();
        assert!(matches!(
            translator.translate(&session, "not json"),
            Err(BridgeError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_publishes() {
        let (session, translator, publisher) = fixture();
        let raw = envelope("bot-transcription", json!({"text": "Goodbye"}));

        translator.handle(&session, &raw);

        let events = publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.text, "Goodbye");
    }

    #[test]
    fn test_send_text_envelope_shape() {
        let raw = send_text_envelope("msg-1", "Please hold", true, false).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(
            value,
            json!({
                "id": "msg-1",
                "label": "rtvi-ai",
                "type": "send-text",
                "data": {
                    "content": "Please hold",
                    "options": {"run_immediately": true, "audio_response": false}
                }
            })
        );
    }
}
