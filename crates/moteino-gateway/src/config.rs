//! Session configuration.
//!
//! All fields have defaults, so a YAML file only needs the values it changes:
//!
//! ```yaml
//! baud_rate: 115200
//! command_timeout_ms: 2000
//! queue_capacity: 4096
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Default serial speed of the gateway firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Tunables for a [`GatewaySession`](crate::GatewaySession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serial speed (8N1).
    pub baud_rate: u32,
    /// How long a single transport read may block. Bounds how quickly the
    /// worker notices a shutdown request.
    pub read_poll_ms: u64,
    /// How long a command waits for its ACK/NAK.
    pub command_timeout_ms: u64,
    /// Capacity of the packet queue. When full, the worker stops reading
    /// until the application catches up.
    pub queue_capacity: usize,
    /// Size of the buffer handed to each transport read.
    pub read_chunk_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            read_poll_ms: 20,
            command_timeout_ms: 2_000,
            queue_capacity: 4_096,
            read_chunk_size: 256,
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, GatewayError> {
        let config: GatewayConfig =
            serde_yaml::from_str(yaml).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.baud_rate == 0 {
            return Err(GatewayError::Config("baud_rate must be non-zero".into()));
        }
        if self.read_poll_ms == 0 {
            return Err(GatewayError::Config("read_poll_ms must be non-zero".into()));
        }
        if self.command_timeout_ms == 0 {
            return Err(GatewayError::Config("command_timeout_ms must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(GatewayError::Config("queue_capacity must be non-zero".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(GatewayError::Config("read_chunk_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Transport read timeout.
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// Command acknowledgement timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = GatewayConfig::from_yaml_str("command_timeout_ms: 500\nqueue_capacity: 16\n").unwrap();
        assert_eq!(config.command_timeout_ms, 500);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_zero_command_timeout_is_rejected() {
        assert!(matches!(
            GatewayConfig::from_yaml_str("command_timeout_ms: 0\n"),
            Err(GatewayError::Config(_))
        ));
        let config = GatewayConfig {
            command_timeout_ms: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            GatewayConfig::from_yaml_str("queue_capacity: lots"),
            Err(GatewayError::Config(_))
        ));
        assert!(matches!(
            GatewayConfig::from_yaml_str("queue_capacity: 0"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = GatewayConfig::load("/nonexistent/moteino.yaml").unwrap_err();
        assert!(err.to_string().contains("moteino.yaml"));
    }
}
