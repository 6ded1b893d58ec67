//! # Sessions
//!
//! Per-call state shared by the telephony and runner legs.
//!
//! ## Key Components:
//! - **SessionRegistry**: owns the id → session map and drives teardown
//! - **KeepaliveSupervisor**: heartbeat writer for the telephony leg

pub mod keepalive;
pub mod registry;

pub use keepalive::KeepaliveSupervisor;
pub use registry::{Session, SessionFrame, SessionRegistry, SessionSummary};
