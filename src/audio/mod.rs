//! # Telephony Audio
//!
//! Everything that touches the telephony leg's raw audio.
//!
//! ## Key Components:
//! - **Codec**: resampling between 8kHz and the runner rate, SLIN message wrapping
//! - **AudioSocket**: reading and writing the switch's TCP framing protocol
//!
//! ## Audio Format:
//! - **Telephony leg**: 8kHz, 16-bit, mono, little-endian SLIN
//! - **Runner leg**: 16kHz (configurable multiple of 8kHz), 16-bit, mono

pub mod audiosocket;  // TCP framing: handshake, media reads, paced writes
pub mod codec;        // Resampling and PCM wrap/unwrap
