//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (VITALINK_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use vitalink_core::{PresenceConfig, PresenceTracker};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Credential verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Presence timing.
    #[serde(default)]
    pub presence: PresenceSection,

    /// Hub routing policy.
    #[serde(default)]
    pub hub: HubSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the one-to-one chat WebSocket endpoint.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Path for the consultation broadcast WebSocket endpoint.
    #[serde(default = "default_consultation_path")]
    pub consultation_path: String,
}

/// Credential verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the platform's token issuer.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Window for completing an in-band auth handshake, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive probe interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle window before a connection is considered dead, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Presence timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSection {
    /// Silence longer than this marks an identity offline, in milliseconds.
    #[serde(default = "default_presence_timeout")]
    pub timeout_ms: u64,

    /// Sweep interval in milliseconds; must be shorter than the timeout.
    #[serde(default = "default_presence_sweep")]
    pub sweep_interval_ms: u64,
}

/// Hub routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Whether a sender receives its own broadcast back.
    #[serde(default)]
    pub echo_to_sender: bool,

    /// Capacity of the hub's inbound event queue.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-connection outbound mailbox capacity.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("VITALINK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("VITALINK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_chat_path() -> String {
    "/ws/chat".to_string()
}

fn default_consultation_path() -> String {
    "/ws/consultation".to_string()
}

fn default_jwt_secret() -> String {
    std::env::var("VITALINK_JWT_SECRET").unwrap_or_default()
}

fn default_handshake_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_presence_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_presence_sweep() -> u64 {
    10_000 // 10 seconds
}

fn default_event_capacity() -> usize {
    1024
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            presence: PresenceSection::default(),
            hub: HubSection::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chat_path: default_chat_path(),
            consultation_path: default_consultation_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_presence_timeout(),
            sweep_interval_ms: default_presence_sweep(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            echo_to_sender: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or
    /// if the loaded configuration is invalid.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "vitalink.toml",
            "/etc/vitalink/vitalink.toml",
            "~/.config/vitalink/vitalink.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if timing invariants are violated.
    pub fn validate(&self) -> Result<()> {
        // Delegates the sweep < timeout invariant.
        self.presence_config()?;

        if self.heartbeat.interval_ms >= self.heartbeat.timeout_ms {
            bail!("heartbeat interval must be shorter than the idle timeout");
        }
        if self.auth.handshake_timeout_ms == 0 {
            bail!("handshake timeout must be non-zero");
        }
        Ok(())
    }

    /// Presence timing as the core type.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep interval is not shorter than the
    /// timeout.
    pub fn presence_config(&self) -> Result<PresenceConfig> {
        PresenceConfig::new(
            Duration::from_millis(self.presence.timeout_ms),
            Duration::from_millis(self.presence.sweep_interval_ms),
        )
        .context("invalid [presence] configuration")
    }

    /// Build the presence tracker from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence timing is invalid.
    pub fn presence_tracker(&self) -> Result<PresenceTracker> {
        Ok(PresenceTracker::new(self.presence_config()?))
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.chat_path, "/ws/chat");
        assert!(!config.hub.echo_to_sender);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [hub]
            echo_to_sender = true

            [limits]
            mailbox_capacity = 64
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(config.hub.echo_to_sender);
        assert_eq!(config.limits.mailbox_capacity, 64);
    }

    #[test]
    fn test_validate_rejects_slow_sweep() {
        let mut config = Config::default();
        config.presence.sweep_interval_ms = config.presence.timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_slow_heartbeat() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = config.heartbeat.timeout_ms + 1;
        assert!(config.validate().is_err());
    }
}
