//! Frames sent by the gateway, and their classification on the host.

use crate::commands::require_len;
use crate::constants::*;
use crate::error::*;
use crate::frame::{encode_frame, Direction, Frame, FrameStatus};
use crate::packet::*;

/// Frames the gateway can send to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted.
    Ack {
        /// Opcode of the acknowledged command.
        opcode: u8,
    },

    /// Command rejected.
    Nak {
        /// Opcode of the rejected command.
        opcode: u8,
        /// Why it was rejected.
        reason: NakReason,
    },

    /// Status text.
    Status(String),

    /// Over-the-air packet.
    Radio(RadioPacket),

    /// Echo reply.
    EchoReply(Vec<u8>),
}

impl Reply {
    /// Get the opcode for this reply.
    pub fn code(&self) -> u8 {
        match self {
            Reply::Ack { .. } => OP_ACK,
            Reply::Nak { .. } => OP_NAK,
            Reply::Status(_) => OP_STATUS,
            Reply::Radio(_) => OP_RADIO_PACKET,
            Reply::EchoReply(_) => OP_ECHO_REPLY,
        }
    }

    /// Encode the reply payload (without framing).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Reply::Ack { opcode } => buf.push(*opcode),

            Reply::Nak { opcode, reason } => {
                buf.push(*opcode);
                buf.push((*reason).into());
            }

            Reply::Status(text) => buf.extend_from_slice(text.as_bytes()),

            Reply::Radio(packet) => {
                buf.extend_from_slice(&packet.src_node.to_le_bytes());
                buf.extend_from_slice(&packet.dst_node.to_le_bytes());
                buf.extend_from_slice(&packet.rssi.to_le_bytes());
                buf.extend_from_slice(&packet.data);
            }

            Reply::EchoReply(payload) => buf.extend_from_slice(payload),
        }

        buf
    }

    /// Encode the reply as a complete gateway → host frame.
    pub fn encode(&self, seq: u8) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(Direction::ToHost, self.code(), seq, &self.encode_payload())
    }
}

/// A classified gateway → host frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Positive acknowledgement of the command with this seq and opcode.
    Ack {
        /// Sequence number of the acknowledged command.
        seq: u8,
        /// Opcode of the acknowledged command.
        opcode: u8,
    },
    /// Negative acknowledgement.
    Nak {
        /// Sequence number of the rejected command.
        seq: u8,
        /// Opcode of the rejected command.
        opcode: u8,
        /// Reason given by the gateway.
        reason: NakReason,
    },
    /// Anything destined for the application queue.
    Packet(Packet),
}

impl Inbound {
    /// Classify a decoded frame.
    ///
    /// Acknowledgements are only recognised on frames that passed their CRC;
    /// a damaged ack is reported as a bad packet like any other frame.
    pub fn classify(frame: Frame) -> Self {
        let Frame {
            opcode,
            seq,
            payload,
            status,
        } = frame;

        match status {
            FrameStatus::Valid => {}
            FrameStatus::CrcMismatch { expected, computed } => {
                return Inbound::Packet(Packet::Bad(BadPacket {
                    opcode,
                    payload,
                    reason: BadPacketReason::CrcMismatch { expected, computed },
                }));
            }
            FrameStatus::Unsynchronized => {
                return Inbound::Packet(Packet::Bad(BadPacket {
                    opcode,
                    payload,
                    reason: BadPacketReason::Malformed("bytes outside any frame".to_string()),
                }));
            }
            FrameStatus::Truncated => {
                return Inbound::Packet(Packet::Bad(BadPacket {
                    opcode,
                    payload,
                    reason: BadPacketReason::Malformed("frame cut short".to_string()),
                }));
            }
        }

        match decode_valid(opcode, seq, &payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                log::debug!("could not parse {} frame: {}", opcode_name(opcode), err);
                Inbound::Packet(Packet::Bad(BadPacket {
                    opcode,
                    payload,
                    reason: BadPacketReason::Malformed(err.to_string()),
                }))
            }
        }
    }
}

fn decode_valid(opcode: u8, seq: u8, data: &[u8]) -> Result<Inbound, ProtocolError> {
    match opcode {
        OP_ACK => {
            require_len(data, 1)?;
            Ok(Inbound::Ack {
                seq,
                opcode: data[0],
            })
        }

        OP_NAK => {
            require_len(data, 2)?;
            Ok(Inbound::Nak {
                seq,
                opcode: data[0],
                reason: NakReason::from(data[1]),
            })
        }

        OP_STATUS => Ok(Inbound::Packet(Packet::Status(StatusPacket {
            text: String::from_utf8_lossy(data).into_owned(),
        }))),

        OP_RADIO_PACKET => {
            require_len(data, RADIO_PACKET_HEADER_SIZE)?;
            let body = &data[RADIO_PACKET_HEADER_SIZE..];
            if body.len() > MAX_RADIO_PAYLOAD {
                return Err(ProtocolError::PayloadTooLarge {
                    max: MAX_RADIO_PAYLOAD,
                    actual: body.len(),
                });
            }
            Ok(Inbound::Packet(Packet::Radio(RadioPacket {
                src_node: u16::from_le_bytes([data[0], data[1]]),
                dst_node: u16::from_le_bytes([data[2], data[3]]),
                rssi: i16::from_le_bytes([data[4], data[5]]),
                data: body.to_vec(),
            })))
        }

        OP_ECHO_REPLY => Ok(Inbound::Packet(Packet::Echo(EchoPacket {
            payload: data.to_vec(),
        }))),

        other => Err(ProtocolError::UnknownReply(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;

    fn classify_bytes(bytes: &[u8]) -> Vec<Inbound> {
        FrameDecoder::host()
            .push_bytes(bytes)
            .into_iter()
            .map(Inbound::classify)
            .collect()
    }

    #[test]
    fn test_ack_and_nak() {
        let mut bytes = Reply::Ack { opcode: OP_ECHO }.encode(17).unwrap();
        bytes.extend(
            Reply::Nak {
                opcode: OP_SEND_RADIO,
                reason: NakReason::BadState,
            }
            .encode(18)
            .unwrap(),
        );

        let inbound = classify_bytes(&bytes);
        assert_eq!(
            inbound,
            vec![
                Inbound::Ack {
                    seq: 17,
                    opcode: OP_ECHO
                },
                Inbound::Nak {
                    seq: 18,
                    opcode: OP_SEND_RADIO,
                    reason: NakReason::BadState
                },
            ]
        );
    }

    #[test]
    fn test_radio_packet() {
        let packet = RadioPacket {
            src_node: 7,
            dst_node: 1,
            rssi: -42,
            data: vec![1, 70, 68, 0x2C, 0x01, 0xDC, 0x05],
        };
        let bytes = Reply::Radio(packet.clone()).encode(0).unwrap();
        assert_eq!(classify_bytes(&bytes), vec![Inbound::Packet(Packet::Radio(packet))]);
    }

    #[test]
    fn test_status_and_echo() {
        let mut bytes = Reply::Status("gateway alive".into()).encode(0).unwrap();
        bytes.extend(Reply::EchoReply(b"ping".to_vec()).encode(3).unwrap());

        let inbound = classify_bytes(&bytes);
        assert_eq!(inbound.len(), 2);
        match &inbound[0] {
            Inbound::Packet(Packet::Status(status)) => assert_eq!(status.text, "gateway alive"),
            other => panic!("expected status, got {:?}", other),
        }
        match &inbound[1] {
            Inbound::Packet(Packet::Echo(echo)) => assert_eq!(echo.payload, b"ping"),
            other => panic!("expected echo, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_is_bad_packet() {
        let original = Reply::Radio(RadioPacket {
            src_node: 2,
            dst_node: 1,
            rssi: -80,
            data: b"telemetry".to_vec(),
        })
        .encode(0)
        .unwrap();
        let payload_len = original.len() - HEADER_SIZE - CRC_SIZE;

        for i in 0..payload_len {
            let mut bytes = original.clone();
            bytes[HEADER_SIZE + i] ^= 0x10;
            let inbound = classify_bytes(&bytes);
            assert_eq!(inbound.len(), 1);
            match &inbound[0] {
                Inbound::Packet(Packet::Bad(bad)) => {
                    assert!(matches!(bad.reason, BadPacketReason::CrcMismatch { .. }));
                    assert_eq!(bad.payload, bytes[HEADER_SIZE..HEADER_SIZE + payload_len]);
                }
                other => panic!("byte {}: expected bad packet, got {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_short_radio_packet_is_malformed() {
        let bytes = encode_frame(Direction::ToHost, OP_RADIO_PACKET, 0, &[1, 0, 2]).unwrap();
        match &classify_bytes(&bytes)[0] {
            Inbound::Packet(Packet::Bad(bad)) => {
                assert_eq!(bad.opcode, OP_RADIO_PACKET);
                assert_eq!(bad.payload, vec![1, 0, 2]);
                assert!(matches!(bad.reason, BadPacketReason::Malformed(_)));
            }
            other => panic!("expected bad packet, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_ack_is_not_an_ack() {
        let mut bytes = Reply::Ack { opcode: OP_ECHO }.encode(5).unwrap();
        bytes[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            classify_bytes(&bytes)[0],
            Inbound::Packet(Packet::Bad(_))
        ));
    }

    #[test]
    fn test_noise_is_bad_packet() {
        let mut bytes = b"\xFF\xFE".to_vec();
        bytes.extend(Reply::Status(String::new()).encode(0).unwrap());
        let inbound = classify_bytes(&bytes);
        assert_eq!(inbound.len(), 2);
        match &inbound[0] {
            Inbound::Packet(Packet::Bad(bad)) => assert_eq!(bad.payload, vec![0xFF, 0xFE]),
            other => panic!("expected bad packet, got {:?}", other),
        }
        assert!(matches!(inbound[1], Inbound::Packet(Packet::Status(_))));
    }
}
