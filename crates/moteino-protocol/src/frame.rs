//! Frame encoding/decoding utilities.
//!
//! Every message on the serial link is a length-delimited frame:
//!
//! ```text
//! +-----+--------+-----+--------+--------+------------------+--------+--------+
//! | SOF | opcode | seq | len_lo | len_hi | payload[0..len]  | crc_lo | crc_hi |
//! +-----+--------+-----+--------+--------+------------------+--------+--------+
//! ```
//!
//! `SOF` is `<` for host → gateway frames and `>` for gateway → host frames.
//! The CRC covers exactly the payload and is only present when `len > 0`.

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::*;
use crate::crc::payload_crc;
use crate::error::ProtocolError;

/// Which way a frame travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host → gateway (commands).
    ToGateway,
    /// Gateway → host (replies and unsolicited packets).
    ToHost,
}

impl Direction {
    /// Start-of-frame byte used in this direction.
    pub fn sof(&self) -> u8 {
        match self {
            Direction::ToGateway => SOF_TO_GATEWAY,
            Direction::ToHost => SOF_TO_HOST,
        }
    }

    /// Whether `opcode` may legally appear in this direction.
    pub fn accepts(&self, opcode: u8) -> bool {
        match self {
            Direction::ToGateway => is_command_opcode(opcode),
            Direction::ToHost => is_reply_opcode(opcode),
        }
    }
}

/// Integrity status attached to each decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Header plausible and CRC (if any) matched.
    Valid,
    /// The payload does not match the trailing CRC.
    CrcMismatch {
        /// CRC carried by the frame.
        expected: u16,
        /// CRC computed over the received payload.
        computed: u16,
    },
    /// Bytes that did not belong to any plausible frame. The payload holds
    /// the skipped bytes; opcode and seq are zero.
    Unsynchronized,
    /// The header promised more bytes than arrived before the next intact
    /// frame started. The payload holds what did arrive after the header.
    Truncated,
}

/// One wire-level unit produced by the [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte.
    pub opcode: u8,
    /// Sequence number used to correlate commands and acknowledgements.
    pub seq: u8,
    /// Payload bytes (without framing or CRC).
    pub payload: Vec<u8>,
    /// Integrity status.
    pub status: FrameStatus,
}

impl Frame {
    /// Returns true if the frame passed all integrity checks.
    pub fn is_valid(&self) -> bool {
        self.status == FrameStatus::Valid
    }
}

/// Encode a complete frame, including SOF, header and CRC.
pub fn encode_frame(
    direction: Direction,
    opcode: u8,
    seq: u8,
    payload: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            max: MAX_FRAME_PAYLOAD,
            actual: payload.len(),
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.push(direction.sof());
    buf.push(opcode);
    buf.push(seq);
    buf.put_u16_le(payload.len() as u16);
    if !payload.is_empty() {
        buf.extend_from_slice(payload);
        buf.put_u16_le(payload_crc(payload));
    }
    Ok(buf)
}

/// Stateful accumulator turning a raw byte stream into frames.
///
/// Bytes may arrive split at arbitrary points; partial frames are kept until
/// the rest arrives. A start byte followed by an implausible header (an
/// opcode not valid for this direction, or an oversized length) is treated as
/// noise and the decoder scans forward for the next start byte. Noise is never
/// dropped silently: each run is reported as an [`FrameStatus::Unsynchronized`]
/// frame once the next plausible frame begins, or in slices of
/// [`MAX_FRAME_PAYLOAD`] bytes if the run gets that long.
///
/// A frame whose CRC fails is checked for an intact frame starting inside the
/// span its length field claimed. If one is found, the damaged frame is cut
/// short there and reported as [`FrameStatus::Truncated`], and decoding resumes
/// at the intact frame.
#[derive(Debug)]
pub struct FrameDecoder {
    direction: Direction,
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Noise bytes skipped while resynchronising.
    stray: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder for frames travelling in `direction`.
    pub fn new(direction: Direction) -> Self {
        FrameDecoder {
            direction,
            buffer: BytesMut::with_capacity(HEADER_SIZE + MAX_FRAME_PAYLOAD + CRC_SIZE),
            stray: Vec::new(),
        }
    }

    /// Decoder for the host side of the link (reads gateway → host frames).
    pub fn host() -> Self {
        Self::new(Direction::ToHost)
    }

    /// Decoder for the gateway side of the link (reads host → gateway frames).
    pub fn gateway() -> Self {
        Self::new(Direction::ToGateway)
    }

    /// Add received data and return every frame it completes.
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Number of bytes held back waiting for more input.
    ///
    /// This includes noise that has not been reported yet: a noise run is only
    /// emitted once the next plausible frame begins, so on an idle line it
    /// stays here until [`FrameDecoder::flush`] is called.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.stray.len()
    }

    /// Report everything still buffered as one [`FrameStatus::Unsynchronized`]
    /// frame, e.g. when the link closes. Returns `None` if nothing is held.
    pub fn flush(&mut self) -> Option<Frame> {
        let mut bytes = std::mem::take(&mut self.stray);
        bytes.extend_from_slice(&self.buffer);
        self.buffer.clear();
        if bytes.is_empty() {
            return None;
        }
        Some(Frame {
            opcode: 0,
            seq: 0,
            payload: bytes,
            status: FrameStatus::Unsynchronized,
        })
    }

    /// Discard all buffered state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.stray.clear();
    }

    fn next_frame(&mut self) -> Option<Frame> {
        let sof = self.direction.sof();
        loop {
            if self.buffer.is_empty() {
                return None;
            }

            if self.buffer[0] != sof {
                if let Some(frame) = self.skip_stray_byte() {
                    return Some(frame);
                }
                continue;
            }

            if self.buffer.len() < HEADER_SIZE {
                return None;
            }

            let opcode = self.buffer[1];
            let seq = self.buffer[2];
            let len = u16::from_le_bytes([self.buffer[3], self.buffer[4]]) as usize;

            if !self.direction.accepts(opcode) || len > MAX_FRAME_PAYLOAD {
                log::debug!(
                    "implausible header (opcode 0x{:02X}, len {}), resynchronising",
                    opcode,
                    len
                );
                if let Some(frame) = self.skip_stray_byte() {
                    return Some(frame);
                }
                continue;
            }

            // Report the noise before the frame that ended it.
            if !self.stray.is_empty() {
                return Some(self.flush_stray());
            }

            let crc_len = if len > 0 { CRC_SIZE } else { 0 };
            let frame_len = HEADER_SIZE + len + crc_len;
            if self.buffer.len() < frame_len {
                return None;
            }

            let status = if len > 0 {
                let end = HEADER_SIZE + len;
                let expected = u16::from_le_bytes([self.buffer[end], self.buffer[end + 1]]);
                let computed = payload_crc(&self.buffer[HEADER_SIZE..end]);
                if expected == computed {
                    FrameStatus::Valid
                } else {
                    FrameStatus::CrcMismatch { expected, computed }
                }
            } else {
                FrameStatus::Valid
            };

            if status != FrameStatus::Valid {
                if let Some(start) = self.intact_frame_within(frame_len)? {
                    return Some(self.cut_truncated(start));
                }
            }

            self.buffer.advance(HEADER_SIZE);
            let payload = self.buffer.split_to(len).to_vec();
            self.buffer.advance(crc_len);

            log::trace!(
                "frame {} seq={} len={} status={:?}",
                opcode_name(opcode),
                seq,
                len,
                status
            );

            return Some(Frame {
                opcode,
                seq,
                payload,
                status,
            });
        }
    }

    /// First offset in `1..span` where an intact frame starts, `Some(None)` if
    /// there is none, or `None` if more input is needed to tell.
    fn intact_frame_within(&self, span: usize) -> Option<Option<usize>> {
        for start in 1..span {
            if self.intact_frame_at(start)? {
                return Some(Some(start));
            }
        }
        Some(None)
    }

    /// Whether a plausible header with a matching CRC starts at `start`.
    /// `None` if the buffer ends before that can be decided.
    fn intact_frame_at(&self, start: usize) -> Option<bool> {
        let buf = &self.buffer[start..];
        if buf.first() != Some(&self.direction.sof()) {
            return Some(false);
        }
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        if !self.direction.accepts(buf[1]) || len > MAX_FRAME_PAYLOAD {
            return Some(false);
        }
        if len == 0 {
            return Some(true);
        }
        let end = HEADER_SIZE + len;
        if buf.len() < end + CRC_SIZE {
            return None;
        }
        let carried = u16::from_le_bytes([buf[end], buf[end + 1]]);
        Some(carried == payload_crc(&buf[HEADER_SIZE..end]))
    }

    /// Split off the damaged frame in front of the intact one at `start`.
    fn cut_truncated(&mut self, start: usize) -> Frame {
        let opcode = self.buffer[1];
        let seq = self.buffer[2];
        let cut = self.buffer.split_to(start);
        let payload = cut.get(HEADER_SIZE..).map(<[u8]>::to_vec).unwrap_or_default();
        log::debug!(
            "{} frame cut short after {} bytes, resynchronising",
            opcode_name(opcode),
            start
        );
        Frame {
            opcode,
            seq,
            payload,
            status: FrameStatus::Truncated,
        }
    }

    /// Move one byte into the noise run; returns a frame if the run is full.
    fn skip_stray_byte(&mut self) -> Option<Frame> {
        self.stray.push(self.buffer[0]);
        self.buffer.advance(1);
        if self.stray.len() >= MAX_FRAME_PAYLOAD {
            Some(self.flush_stray())
        } else {
            None
        }
    }

    fn flush_stray(&mut self) -> Frame {
        Frame {
            opcode: 0,
            seq: 0,
            payload: std::mem::take(&mut self.stray),
            status: FrameStatus::Unsynchronized,
        }
    }
}
