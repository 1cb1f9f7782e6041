//! Packets delivered to the application.
//!
//! Every gateway → host frame that is not an acknowledgement becomes exactly
//! one [`Packet`]. Frames that fail integrity checks or cannot be parsed
//! become [`Packet::Bad`] so nothing that crossed the link goes unreported.

/// A packet received over the air and forwarded by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioPacket {
    /// Node that transmitted the packet.
    pub src_node: u16,
    /// Node the packet was addressed to.
    pub dst_node: u16,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Application payload, opaque to this crate.
    pub data: Vec<u8>,
}

/// The payload of an earlier echo command, returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPacket {
    /// Echoed bytes.
    pub payload: Vec<u8>,
}

/// Status text from the gateway, e.g. its startup banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    /// Status text (invalid UTF-8 is replaced).
    pub text: String,
}

/// Why a frame could not be turned into a good packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadPacketReason {
    /// Payload did not match its CRC.
    CrcMismatch {
        /// CRC carried by the frame.
        expected: u16,
        /// CRC computed over the received payload.
        computed: u16,
    },
    /// Bytes outside any plausible frame, or a payload that could not be parsed.
    Malformed(String),
}

impl std::fmt::Display for BadPacketReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BadPacketReason::CrcMismatch { expected, computed } => write!(
                f,
                "CRC mismatch (expected 0x{:04X}, computed 0x{:04X})",
                expected, computed
            ),
            BadPacketReason::Malformed(detail) => write!(f, "malformed frame: {}", detail),
        }
    }
}

/// A frame that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadPacket {
    /// Opcode of the frame, or zero for unsynchronised bytes.
    pub opcode: u8,
    /// Raw bytes as received.
    pub payload: Vec<u8>,
    /// What went wrong.
    pub reason: BadPacketReason,
}

/// Everything the gateway can deliver to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Over-the-air packet.
    Radio(RadioPacket),
    /// Echo reply.
    Echo(EchoPacket),
    /// Integrity or parse failure.
    Bad(BadPacket),
    /// Gateway status text.
    Status(StatusPacket),
}

impl Packet {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Radio(_) => "radio",
            Packet::Echo(_) => "echo",
            Packet::Bad(_) => "bad",
            Packet::Status(_) => "status",
        }
    }

    /// Returns true for [`Packet::Bad`].
    pub fn is_bad(&self) -> bool {
        matches!(self, Packet::Bad(_))
    }
}

impl From<RadioPacket> for Packet {
    fn from(packet: RadioPacket) -> Self {
        Packet::Radio(packet)
    }
}

impl From<EchoPacket> for Packet {
    fn from(packet: EchoPacket) -> Self {
        Packet::Echo(packet)
    }
}

impl From<BadPacket> for Packet {
    fn from(packet: BadPacket) -> Self {
        Packet::Bad(packet)
    }
}

impl From<StatusPacket> for Packet {
    fn from(packet: StatusPacket) -> Self {
        Packet::Status(packet)
    }
}
