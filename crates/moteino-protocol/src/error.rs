//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the gateway protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is too short for its opcode.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Payload exceeds what the frame or radio can carry.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Unknown command opcode.
    #[error("unknown command opcode: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Unknown reply opcode.
    #[error("unknown reply opcode: 0x{0:02X}")]
    UnknownReply(u8),

    /// Frame failed its integrity check.
    #[error("frame is not valid: {0}")]
    InvalidFrame(String),

    /// Invalid data in a payload field.
    #[error("invalid payload data: {0}")]
    InvalidData(String),
}

/// Reason codes carried by a NAK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakReason {
    /// The radio is not in a state that allows this command.
    BadState,
    /// An argument was out of range.
    IllegalArg,
    /// The radio failed to transmit.
    TxFailed,
    /// The command is not supported by the firmware.
    Unsupported,
    /// Unknown reason code.
    Unknown(u8),
}

impl std::fmt::Display for NakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NakReason::BadState => write!(f, "bad state"),
            NakReason::IllegalArg => write!(f, "illegal argument"),
            NakReason::TxFailed => write!(f, "radio transmit failed"),
            NakReason::Unsupported => write!(f, "unsupported command"),
            NakReason::Unknown(code) => write!(f, "unknown reason (0x{:02X})", code),
        }
    }
}

impl From<u8> for NakReason {
    fn from(code: u8) -> Self {
        use crate::constants::*;
        match code {
            NAK_BAD_STATE => NakReason::BadState,
            NAK_ILLEGAL_ARG => NakReason::IllegalArg,
            NAK_TX_FAILED => NakReason::TxFailed,
            NAK_UNSUPPORTED => NakReason::Unsupported,
            _ => NakReason::Unknown(code),
        }
    }
}

impl From<NakReason> for u8 {
    fn from(reason: NakReason) -> Self {
        use crate::constants::*;
        match reason {
            NakReason::BadState => NAK_BAD_STATE,
            NakReason::IllegalArg => NAK_ILLEGAL_ARG,
            NakReason::TxFailed => NAK_TX_FAILED,
            NakReason::Unsupported => NAK_UNSUPPORTED,
            NakReason::Unknown(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nak_reason_codes() {
        for code in 0u8..=8 {
            let reason = NakReason::from(code);
            assert_eq!(u8::from(reason), code);
        }
        assert_eq!(NakReason::from(1), NakReason::BadState);
        assert_eq!(NakReason::from(0x42), NakReason::Unknown(0x42));
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::FrameTooShort {
            expected: 6,
            actual: 2,
        };
        assert!(err.to_string().contains("at least 6"));
        assert!(ProtocolError::UnknownCommand(0x7F).to_string().contains("0x7F"));
    }
}
