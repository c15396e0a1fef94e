//! Client configuration
//!
//! All timing values are in milliseconds. Every field has a default, so an
//! empty TOML document yields a working configuration.
//!
//! ```toml
//! gateway_port = 13400
//! activation_timeout_ms = 2000
//! p2_star_ms = 5000
//!
//! [[security.keys]]
//! model = "D31L"
//! level = 1
//! algorithm = "xor"
//! secret = "a5c3"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_PROTOCOL_VERSION};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// DoIP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway TCP port
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    /// Protocol version written into outgoing headers
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Bound on waiting for a routing activation response
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_ms: u64,
    /// UDS P2* extension applied after each "response pending"
    #[serde(default = "default_p2_star")]
    pub p2_star_ms: u64,
    /// Tail after a multi-response window during which frames are still collected
    #[serde(default = "default_multi_response_grace")]
    pub multi_response_grace_ms: u64,
    /// Extra time a caller waits beyond the engine's own deadlines
    #[serde(default = "default_caller_margin")]
    pub caller_margin_ms: u64,
    /// Bound on joining the engine during close
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
    /// Largest accepted payload length; bigger headers terminate the session
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: u32,
    /// Unclaimed diagnostic frames kept for a later receive
    #[serde(default = "default_rx_queue_capacity")]
    pub rx_queue_capacity: usize,
    /// Seed-key secrets
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_port: default_gateway_port(),
            protocol_version: default_protocol_version(),
            connect_timeout_ms: default_connect_timeout(),
            activation_timeout_ms: default_activation_timeout(),
            p2_star_ms: default_p2_star(),
            multi_response_grace_ms: default_multi_response_grace(),
            caller_margin_ms: default_caller_margin(),
            close_timeout_ms: default_close_timeout(),
            max_payload_len: default_max_payload_len(),
            rx_queue_capacity: default_rx_queue_capacity(),
            security: SecurityConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn p2_star(&self) -> Duration {
        Duration::from_millis(self.p2_star_ms)
    }

    pub fn multi_response_grace(&self) -> Duration {
        Duration::from_millis(self.multi_response_grace_ms)
    }

    pub fn caller_margin(&self) -> Duration {
        Duration::from_millis(self.caller_margin_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn default_gateway_port() -> u16 {
    13400
}

fn default_protocol_version() -> u8 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_activation_timeout() -> u64 {
    2000
}

fn default_p2_star() -> u64 {
    5000
}

fn default_multi_response_grace() -> u64 {
    250
}

fn default_caller_margin() -> u64 {
    2000
}

fn default_close_timeout() -> u64 {
    2000
}

fn default_max_payload_len() -> u32 {
    DEFAULT_MAX_PAYLOAD_LEN
}

fn default_rx_queue_capacity() -> usize {
    64
}

// =============================================================================
// Security Configuration
// =============================================================================

/// Seed-key secrets, one entry per (model, level)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub keys: Vec<SecretKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretKeyConfig {
    /// Model short name, e.g. "D31L"
    pub model: String,
    /// Security level (odd requestSeed sub-function)
    pub level: u8,
    #[serde(default)]
    pub algorithm: KeyAlgorithm,
    /// Hex-encoded secret
    pub secret: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Xor,
    Sha256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.gateway_port, 13400);
        assert_eq!(config.protocol_version, 0x02);
        assert_eq!(config.activation_timeout(), Duration::from_secs(2));
        assert_eq!(config.p2_star(), Duration::from_secs(5));
        assert!(config.security.keys.is_empty());
    }

    #[test]
    fn test_security_keys() {
        let config = ClientConfig::from_toml_str(
            r#"
            p2_star_ms = 300

            [[security.keys]]
            model = "D31L"
            level = 1
            secret = "a5c3"

            [[security.keys]]
            model = "D31X"
            level = 3
            algorithm = "sha256"
            secret = "00112233"
            "#,
        )
        .unwrap();

        assert_eq!(config.p2_star_ms, 300);
        assert_eq!(config.security.keys.len(), 2);
        assert_eq!(config.security.keys[0].algorithm, KeyAlgorithm::Xor);
        assert_eq!(config.security.keys[1].algorithm, KeyAlgorithm::Sha256);
        assert_eq!(config.security.keys[1].level, 3);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gateway_port = 13401\nrx_queue_capacity = 4").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.gateway_port, 13401);
        assert_eq!(config.rx_queue_capacity, 4);

        let err = ClientConfig::load("/nonexistent/doip.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ClientConfig::from_toml_str("gateway_port = \"abc\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
