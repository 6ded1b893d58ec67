//! # Configuration Management
//!
//! Loads bridge settings from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` for the control API (deployment platforms)
//! 2. Environment variables (APP_AUDIOSOCKET__PORT, APP_RUNNER__CALLBACK_BASE_URL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::audio::codec::TELEPHONY_SAMPLE_RATE;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audiosocket: AudioSocketConfig,
    pub runner: RunnerConfig,
    pub keepalive: KeepaliveConfig,
    pub control_plane: ControlPlaneConfig,
}

/// Control HTTP API bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Telephony leg settings.
///
/// ## Fields:
/// - `host`/`port`: where the TCP listener accepts AudioSocket connections
/// - `advertise_address`: the `host:port` handed to the external-media collaborator;
///   the telephony switch dials this address
/// - `fragment_size`: max PCM bytes per outbound AudioSocket message (320 = 20ms at 8kHz)
/// - `fragment_delay_ms`: pause between outbound fragments
/// - `encapsulation`/`transport`/`format`: external-media parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSocketConfig {
    pub host: String,
    pub port: u16,
    pub advertise_address: String,
    pub fragment_size: usize,
    pub fragment_delay_ms: u64,
    pub encapsulation: String,
    pub transport: String,
    pub format: String,
}

/// AI pipeline (runner) leg settings.
///
/// ## Fields:
/// - `host`/`port`: where the runner callback WebSocket listener binds
/// - `callback_base_url`: public `ws://` base the runner is told to dial back
/// - `outbound_queue_size`: bounded per-session queue depth, in frames
/// - `sample_rate`/`channels`: metadata stamped on outbound audio frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub host: String,
    pub port: u16,
    pub callback_base_url: String,
    pub outbound_queue_size: usize,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Keepalive heartbeat and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

/// External collaborator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audiosocket: AudioSocketConfig {
                host: "0.0.0.0".to_string(),
                port: 9090,
                advertise_address: "127.0.0.1:9090".to_string(),
                fragment_size: 320,
                fragment_delay_ms: 20,
                encapsulation: "audiosocket".to_string(),
                transport: "tcp".to_string(),
                format: "slin".to_string(),
            },
            runner: RunnerConfig {
                host: "0.0.0.0".to_string(),
                port: 9091,
                callback_base_url: "ws://127.0.0.1:9091".to_string(),
                outbound_queue_size: 150,
                sample_rate: 16000,
                channels: 1,
            },
            keepalive: KeepaliveConfig {
                interval_ms: 10_000,
                max_attempts: 3,
                initial_backoff_ms: 100,
                multiplier: 2.0,
            },
            control_plane: ControlPlaneConfig {
                base_url: "http://127.0.0.1:8000".to_string(),
                timeout_ms: 5_000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_AUDIOSOCKET__ADVERTISE_ADDRESS=10.0.0.5:9090`
    /// - `APP_RUNNER__OUTBOUND_QUEUE_SIZE=300`
    /// - `APP_KEEPALIVE__MAX_ATTEMPTS=5`
    /// - `HOST=0.0.0.0` / `PORT=3000`: control API address
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 || self.audiosocket.port == 0 || self.runner.port == 0 {
            return Err(anyhow::anyhow!("Listener ports cannot be 0"));
        }

        if self.audiosocket.fragment_size == 0 || self.audiosocket.fragment_size % 2 != 0 {
            return Err(anyhow::anyhow!("AudioSocket fragment size must be a positive even number"));
        }

        if self.runner.outbound_queue_size == 0 {
            return Err(anyhow::anyhow!("Runner outbound queue size must be greater than 0"));
        }

        // caller audio is upsampled 2x before it reaches the runner
        if self.runner.sample_rate != TELEPHONY_SAMPLE_RATE * 2 {
            return Err(anyhow::anyhow!(
                "Runner sample rate must be {} Hz",
                TELEPHONY_SAMPLE_RATE * 2
            ));
        }

        if self.runner.channels != 1 {
            return Err(anyhow::anyhow!("Runner audio must be mono"));
        }

        if self.keepalive.interval_ms == 0 {
            return Err(anyhow::anyhow!("Keepalive interval must be greater than 0"));
        }

        if self.keepalive.max_attempts == 0 {
            return Err(anyhow::anyhow!("Keepalive max attempts must be greater than 0"));
        }

        if self.keepalive.multiplier < 1.0 {
            return Err(anyhow::anyhow!("Keepalive backoff multiplier must be at least 1.0"));
        }

        Ok(())
    }
}

impl AudioSocketConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fragment_delay(&self) -> Duration {
        Duration::from_millis(self.fragment_delay_ms)
    }
}

impl RunnerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL the runner dials back for one call.
    pub fn callback_url(&self, id: &uuid::Uuid) -> String {
        format!("{}/ws?id={}", self.callback_base_url.trim_end_matches('/'), id)
    }
}

impl ControlPlaneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audiosocket.fragment_size, 320);
        assert_eq!(config.keepalive.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.runner.sample_rate = 22050;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.keepalive.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audiosocket.fragment_size = 321;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runner.outbound_queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.keepalive.interval_ms = 0;
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_callback_url() {
        let mut config = AppConfig::default();
        config.runner.callback_base_url = "wss://bridge.example.com/".to_string();
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.runner.callback_url(&id),
            "wss://bridge.example.com/ws?id=00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml = r#"
            [keepalive]
            max_attempts = 5

            [runner]
            outbound_queue_size = 300
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.keepalive.max_attempts, 5);
        assert_eq!(config.runner.outbound_queue_size, 300);
        assert_eq!(config.keepalive.initial_backoff_ms, 100);
    }
}
