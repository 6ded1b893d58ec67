//! # Application State
//!
//! Shared state handed to every control API handler through `web::Data`.
//!
//! ## Contents:
//! - **config**: the configuration the process started with (read-only)
//! - **bridge**: the orchestrator, which also owns the session registry and
//!   the runner transport used to inject messages
//! - **start_time**: for uptime reporting
//!
//! Everything inside is either immutable or synchronizes itself, so the state
//! is cloned into each actix worker as a handful of `Arc`s.

use std::sync::Arc;
use std::time::Instant;

use crate::bridge::Bridge;
use crate::config::AppConfig;
use crate::runner::RunnerTransport;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub bridge: Arc<Bridge>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, bridge: Arc<Bridge>) -> Self {
        Self {
            config: Arc::new(config),
            bridge,
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.bridge.registry()
    }

    pub fn transport(&self) -> &Arc<RunnerTransport> {
        self.bridge.transport()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
