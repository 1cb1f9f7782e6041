//! Error types for the gateway client.

use moteino_protocol::{opcode_name, NakReason, ProtocolError};
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other end went away (cable pulled, device reset, loopback dropped).
    #[error("transport disconnected")]
    Disconnected,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`GatewaySession`](crate::GatewaySession) operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The serial port could not be opened.
    #[error("serial port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Port identifier passed to `startup`.
        port: String,
        /// Why opening failed.
        reason: String,
    },

    /// The link to the gateway was lost; the session must be restarted.
    #[error("gateway disconnected")]
    Disconnected,

    /// No reply or packet arrived in time.
    #[error("timed out waiting for the gateway")]
    Timeout,

    /// The gateway rejected a command.
    #[error("gateway rejected {}: {reason}", op_name(.opcode))]
    NotAcknowledged {
        /// Opcode of the rejected command.
        opcode: u8,
        /// Reason code from the NAK frame.
        reason: NakReason,
    },

    /// Encryption keys must be exactly 16 bytes.
    #[error("encryption key must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Payload exceeds what the radio or the frame can carry.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The radio does not support this frequency band.
    #[error("unsupported frequency: {0} MHz")]
    InvalidFrequency(u16),

    /// The radio has not been initialised with `init_radio` yet.
    #[error("radio not configured; call init_radio first")]
    NotConfigured,

    /// The session has not been started.
    #[error("session not started")]
    NotStarted,

    /// `startup` was called on a session that is already open.
    #[error("session already started")]
    AlreadyStarted,

    /// Transport failure other than a disconnect.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Encoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

fn op_name(opcode: &u8) -> &'static str {
    opcode_name(*opcode)
}

impl GatewayError {
    /// Whether the caller may retry on the same session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::NotAcknowledged { .. }
        )
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected => GatewayError::Disconnected,
            other => GatewayError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moteino_protocol::OP_SEND_RADIO;

    #[test]
    fn test_transport_disconnect_maps_to_disconnected() {
        let err: GatewayError = TransportError::Disconnected.into();
        assert!(matches!(err, GatewayError::Disconnected));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: GatewayError = TransportError::Io(io).into();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::NotAcknowledged {
            opcode: OP_SEND_RADIO,
            reason: NakReason::TxFailed,
        };
        let text = err.to_string();
        assert!(text.contains("SEND_RADIO"));
        assert!(text.contains("transmit failed"));

        assert!(GatewayError::InvalidKeyLength(5).to_string().contains("got 5"));
    }

    #[test]
    fn test_recoverable() {
        assert!(GatewayError::Timeout.is_recoverable());
        assert!(!GatewayError::Disconnected.is_recoverable());
        assert!(!GatewayError::NotConfigured.is_recoverable());
    }
}
