//! # Runner Frames
//!
//! Protobuf messages exchanged with the pipeline runner over binary WebSocket
//! messages. The wire schema is
//!
//! ```text
//! message Frame {
//!   oneof frame {
//!     TextFrame text = 1;
//!     AudioRawFrame audio = 2;
//!     TranscriptionFrame transcription = 3;
//!     MessageFrame message = 4;
//!   }
//! }
//! ```
//!
//! [`RunnerFrame`] is the closed sum type the rest of the bridge matches on;
//! the prost structs stay private to this module.

use prost::Message as _;

use crate::error::BridgeResult;

#[derive(Clone, PartialEq, prost::Message)]
struct TextFrame {
    #[prost(uint64, tag = "1")]
    id: u64,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(string, tag = "3")]
    text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct AudioRawFrame {
    #[prost(uint64, tag = "1")]
    id: u64,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(bytes = "vec", tag = "3")]
    audio: Vec<u8>,
    #[prost(uint32, tag = "4")]
    sample_rate: u32,
    #[prost(uint32, tag = "5")]
    num_channels: u32,
    #[prost(uint64, optional, tag = "6")]
    pts: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct TranscriptionFrame {
    #[prost(uint64, tag = "1")]
    id: u64,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(string, tag = "3")]
    text: String,
    #[prost(string, tag = "4")]
    user_id: String,
    #[prost(string, tag = "5")]
    timestamp: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct MessageFrame {
    #[prost(string, tag = "1")]
    data: String,
}

#[derive(Clone, PartialEq, prost::Oneof)]
enum Kind {
    #[prost(message, tag = "1")]
    Text(TextFrame),
    #[prost(message, tag = "2")]
    Audio(AudioRawFrame),
    #[prost(message, tag = "3")]
    Transcription(TranscriptionFrame),
    #[prost(message, tag = "4")]
    Message(MessageFrame),
}

#[derive(Clone, PartialEq, prost::Message)]
struct Frame {
    #[prost(oneof = "Kind", tags = "1, 2, 3, 4")]
    frame: Option<Kind>,
}

/// One decoded runner frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerFrame {
    Audio {
        id: u64,
        payload: Vec<u8>,
        sample_rate: u32,
        channels: u32,
    },
    Text {
        text: String,
    },
    Transcription {
        text: String,
        user_id: String,
        timestamp: String,
    },
    /// Opaque JSON, normally an RTVI envelope
    Message {
        data: String,
    },
    /// Frame without a recognized variant
    Unknown,
}

impl RunnerFrame {
    pub fn encode(&self) -> Vec<u8> {
        let frame = match self {
            RunnerFrame::Audio {
                id,
                payload,
                sample_rate,
                channels,
            } => Some(Kind::Audio(AudioRawFrame {
                id: *id,
                name: String::new(),
                audio: payload.clone(),
                sample_rate: *sample_rate,
                num_channels: *channels,
                pts: None,
            })),
            RunnerFrame::Text { text } => Some(Kind::Text(TextFrame {
                id: 0,
                name: String::new(),
                text: text.clone(),
            })),
            RunnerFrame::Transcription {
                text,
                user_id,
                timestamp,
            } => Some(Kind::Transcription(TranscriptionFrame {
                id: 0,
                name: String::new(),
                text: text.clone(),
                user_id: user_id.clone(),
                timestamp: timestamp.clone(),
            })),
            RunnerFrame::Message { data } => Some(Kind::Message(MessageFrame { data: data.clone() })),
            RunnerFrame::Unknown => None,
        };

        Frame { frame }.encode_to_vec()
    }

    /// Decode a binary WebSocket payload. Malformed protobuf is a `Decode`
    /// error; a well-formed frame with no known variant is `Unknown`.
    pub fn decode(buf: &[u8]) -> BridgeResult<Self> {
        let frame = Frame::decode(buf)?;

        Ok(match frame.frame {
            Some(Kind::Audio(audio)) => RunnerFrame::Audio {
                id: audio.id,
                payload: audio.audio,
                sample_rate: audio.sample_rate,
                channels: audio.num_channels,
            },
            Some(Kind::Text(text)) => RunnerFrame::Text { text: text.text },
            Some(Kind::Transcription(t)) => RunnerFrame::Transcription {
                text: t.text,
                user_id: t.user_id,
                timestamp: t.timestamp,
            },
            Some(Kind::Message(message)) => RunnerFrame::Message { data: message.data },
            None => RunnerFrame::Unknown,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunnerFrame::Audio { .. } => "audio",
            RunnerFrame::Text { .. } => "text",
            RunnerFrame::Transcription { .. } => "transcription",
            RunnerFrame::Message { .. } => "message",
            RunnerFrame::Unknown => "unknown",
        }
    }
}
