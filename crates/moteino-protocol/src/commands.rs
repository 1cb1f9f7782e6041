//! Commands that can be sent to the gateway.

use crate::constants::*;
use crate::error::ProtocolError;
use crate::frame::{encode_frame, Direction, Frame};
use crate::types::*;

/// Commands that can be sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Initialise the radio.
    InitRadio(RadioConfig),

    /// Load an AES key into the radio.
    SetEncryptionKey(EncryptionKey),

    /// Transmit a packet over the air.
    SendRadioPacket {
        /// Destination node id.
        dst_node: u16,
        /// Opaque application payload.
        data: Vec<u8>,
    },

    /// Echo a payload back over the serial link.
    Echo {
        /// Bytes to echo.
        payload: Vec<u8>,
    },
}

impl Command {
    /// Get the opcode for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::InitRadio(_) => OP_INIT_RADIO,
            Command::SetEncryptionKey(_) => OP_SET_KEY,
            Command::SendRadioPacket { .. } => OP_SEND_RADIO,
            Command::Echo { .. } => OP_ECHO,
        }
    }

    /// Encode the command payload (without framing).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Command::InitRadio(config) => {
                buf.extend_from_slice(&config.frequency.mhz().to_le_bytes());
                buf.extend_from_slice(&config.node_id.to_le_bytes());
                buf.push(config.network_id);
            }

            Command::SetEncryptionKey(key) => {
                buf.extend_from_slice(key.as_bytes());
            }

            Command::SendRadioPacket { dst_node, data } => {
                buf.extend_from_slice(&dst_node.to_le_bytes());
                buf.extend_from_slice(data);
            }

            Command::Echo { payload } => {
                buf.extend_from_slice(payload);
            }
        }

        buf
    }

    /// Encode the command as a complete host → gateway frame.
    pub fn encode(&self, seq: u8) -> Result<Vec<u8>, ProtocolError> {
        if let Command::SendRadioPacket { data, .. } = self {
            if data.len() > MAX_RADIO_PAYLOAD {
                return Err(ProtocolError::PayloadTooLarge {
                    max: MAX_RADIO_PAYLOAD,
                    actual: data.len(),
                });
            }
        }
        encode_frame(Direction::ToGateway, self.code(), seq, &self.encode_payload())
    }

    /// Decode a command from a host → gateway frame (gateway side).
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        if !frame.is_valid() {
            return Err(ProtocolError::InvalidFrame(format!("{:?}", frame.status)));
        }
        let data = frame.payload.as_slice();

        match frame.opcode {
            OP_INIT_RADIO => {
                require_len(data, 5)?;
                let mhz = u16::from_le_bytes([data[0], data[1]]);
                let frequency = FrequencyBand::from_mhz(mhz).ok_or_else(|| {
                    ProtocolError::InvalidData(format!("unsupported frequency {} MHz", mhz))
                })?;
                Ok(Command::InitRadio(RadioConfig {
                    frequency,
                    node_id: u16::from_le_bytes([data[2], data[3]]),
                    network_id: data[4],
                }))
            }

            OP_SET_KEY => Ok(Command::SetEncryptionKey(EncryptionKey::from_slice(data)?)),

            OP_SEND_RADIO => {
                require_len(data, SEND_RADIO_HEADER_SIZE)?;
                let body = &data[SEND_RADIO_HEADER_SIZE..];
                if body.len() > MAX_RADIO_PAYLOAD {
                    return Err(ProtocolError::PayloadTooLarge {
                        max: MAX_RADIO_PAYLOAD,
                        actual: body.len(),
                    });
                }
                Ok(Command::SendRadioPacket {
                    dst_node: u16::from_le_bytes([data[0], data[1]]),
                    data: body.to_vec(),
                })
            }

            OP_ECHO => Ok(Command::Echo {
                payload: data.to_vec(),
            }),

            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

pub(crate) fn require_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::FrameTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
