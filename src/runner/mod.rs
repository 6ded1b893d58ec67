//! # Pipeline Runner Leg
//!
//! The WebSocket side of the bridge, facing the AI pipeline runner.
//!
//! ## Key Components:
//! - **Frame**: protobuf tagged-frame encoding
//! - **Transport**: outbound queue producers, the sender task and the inbound loop
//! - **RTVI**: translation of embedded control messages into conversation events
//! - **Server**: the callback endpoint the runner dials

pub mod frame;
pub mod rtvi;
pub mod server;
pub mod transport;

pub use frame::RunnerFrame;
pub use rtvi::RtviTranslator;
pub use server::RunnerServer;
pub use transport::RunnerTransport;
