//! Moteino Gateway Serial Protocol
//!
//! This crate provides types and utilities for talking to a Moteino radio
//! gateway over its serial link. It performs no I/O: callers feed received
//! bytes into a [`FrameDecoder`] and write the output of [`Command::encode`].
//!
//! # Protocol Overview
//!
//! Every message is a length-delimited frame (see [`encode_frame`]):
//!
//! - **Commands** (host → gateway): `INIT_RADIO`, `SET_KEY`, `SEND_RADIO`, `ECHO`
//! - **Acknowledgements** (gateway → host): `ACK` / `NAK`, correlated by sequence number
//! - **Packets** (gateway → host): radio packets, echo replies and status text
//!
//! # Example
//!
//! ```rust
//! use moteino_protocol::{Command, FrameDecoder, Inbound, Reply};
//!
//! let bytes = Command::Echo { payload: b"ping".to_vec() }.encode(1).unwrap();
//! assert_eq!(bytes[0], b'<');
//!
//! let mut decoder = FrameDecoder::host();
//! let reply = Reply::EchoReply(b"ping".to_vec()).encode(1).unwrap();
//! for frame in decoder.push_bytes(&reply) {
//!     match Inbound::classify(frame) {
//!         Inbound::Packet(packet) => println!("{:?}", packet),
//!         Inbound::Ack { .. } | Inbound::Nak { .. } => {}
//!     }
//! }
//! ```

mod commands;
mod constants;
mod crc;
mod error;
mod frame;
mod packet;
mod replies;
mod types;

pub use commands::*;
pub use constants::*;
pub use crc::*;
pub use error::*;
pub use frame::*;
pub use packet::*;
pub use replies::*;
pub use types::*;
