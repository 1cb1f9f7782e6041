//! Protocol constants
//!
//! These constants define the start-of-frame markers, opcodes, NAK reason
//! codes and size limits used on the serial link between the host and the
//! Moteino gateway.

// ============================================================================
// Start-of-frame markers
// ============================================================================

/// Start-of-frame byte for host → gateway frames.
pub const SOF_TO_GATEWAY: u8 = b'<';
/// Start-of-frame byte for gateway → host frames.
pub const SOF_TO_HOST: u8 = b'>';

// ============================================================================
// Command Opcodes (host → gateway)
// ============================================================================

/// Initialise the radio (frequency band, node id, network id).
pub const OP_INIT_RADIO: u8 = 0x01;
/// Load a 16-byte AES key into the radio.
pub const OP_SET_KEY: u8 = 0x02;
/// Transmit a packet to a remote node.
pub const OP_SEND_RADIO: u8 = 0x03;
/// Echo the payload straight back over the serial link.
pub const OP_ECHO: u8 = 0x04;

// ============================================================================
// Reply Opcodes (gateway → host)
// ============================================================================

/// Command accepted. Payload is the acknowledged opcode.
pub const OP_ACK: u8 = 0x80;
/// Command rejected. Payload is the rejected opcode and a reason code.
pub const OP_NAK: u8 = 0x81;
/// Free-form status text (startup banner, diagnostics).
pub const OP_STATUS: u8 = 0x90;
/// A packet received over the air.
pub const OP_RADIO_PACKET: u8 = 0x91;
/// The payload of an earlier echo command.
pub const OP_ECHO_REPLY: u8 = 0x92;

// ============================================================================
// NAK Reason Codes
// ============================================================================

/// The radio is not in a state that allows this command.
pub const NAK_BAD_STATE: u8 = 1;
/// An argument was out of range.
pub const NAK_ILLEGAL_ARG: u8 = 2;
/// The radio failed to transmit.
pub const NAK_TX_FAILED: u8 = 3;
/// The gateway firmware does not know this command.
pub const NAK_UNSUPPORTED: u8 = 4;

// ============================================================================
// Sizes
// ============================================================================

/// SOF + opcode + seq + 2-byte length.
pub const HEADER_SIZE: usize = 5;
/// Size of the trailing CRC on frames with a payload.
pub const CRC_SIZE: usize = 2;
/// Largest payload a single frame may carry.
pub const MAX_FRAME_PAYLOAD: usize = 512;
/// Largest application payload the RFM69 can carry with encryption enabled.
pub const MAX_RADIO_PAYLOAD: usize = 61;
/// Size of the AES key held by the radio.
pub const ENCRYPTION_KEY_SIZE: usize = 16;
/// Bytes preceding the data in a RADIO_PACKET frame (src, dst, rssi).
pub const RADIO_PACKET_HEADER_SIZE: usize = 6;
/// Bytes preceding the data in a SEND_RADIO frame (dst).
pub const SEND_RADIO_HEADER_SIZE: usize = 2;

/// Returns true if `opcode` is a command the host may send.
pub fn is_command_opcode(opcode: u8) -> bool {
    matches!(opcode, OP_INIT_RADIO | OP_SET_KEY | OP_SEND_RADIO | OP_ECHO)
}

/// Returns true if `opcode` is something the gateway may send.
pub fn is_reply_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        OP_ACK | OP_NAK | OP_STATUS | OP_RADIO_PACKET | OP_ECHO_REPLY
    )
}

/// Human-readable opcode name for logs.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        OP_INIT_RADIO => "INIT_RADIO",
        OP_SET_KEY => "SET_KEY",
        OP_SEND_RADIO => "SEND_RADIO",
        OP_ECHO => "ECHO",
        OP_ACK => "ACK",
        OP_NAK => "NAK",
        OP_STATUS => "STATUS",
        OP_RADIO_PACKET => "RADIO_PACKET",
        OP_ECHO_REPLY => "ECHO_REPLY",
        _ => "UNKNOWN",
    }
}
