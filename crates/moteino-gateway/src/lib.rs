//! Host-side client for a Moteino radio gateway.
//!
//! A [`GatewaySession`] owns the serial link to one gateway. A background
//! dispatcher thread reads and frames everything the gateway sends:
//! acknowledgements wake the command that is waiting for them, and every other
//! frame becomes a [`Packet`] on a FIFO queue.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use moteino_gateway::{GatewayConfig, GatewaySession, Packet};
//!
//! # fn main() -> Result<(), moteino_gateway::GatewayError> {
//! let mut gw = GatewaySession::new(GatewayConfig::default());
//! gw.startup("/dev/ttyUSB0")?;
//!
//! // The gateway says hello once it has booted.
//! gw.wait_for_message(Some(Duration::from_secs(5)))?;
//!
//! gw.init_radio(915, 1, 100)?;
//! gw.set_encryption_key(b"1234123412341234")?;
//!
//! loop {
//!     if let Packet::Radio(packet) = gw.wait_for_message(None)? {
//!         println!("[rssi {}] from node {}", packet.rssi, packet.src_node);
//!         gw.send_radio_packet(packet.src_node, b"I see you")?;
//!     }
//! }
//! # }
//! ```
//!
//! Without hardware, pair a [`LoopbackTransport`] with a [`SimulatedGateway`]
//! and pass the host end to [`GatewaySession::startup_with_transport`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod loopback;
mod pending;
pub mod session;
pub mod simulator;
pub mod transport;

pub use config::{GatewayConfig, DEFAULT_BAUD_RATE};
pub use dispatcher::{LinkStats, DISPATCHER_THREAD_NAME};
pub use echo_test::{echo_payload, run_echo_test, EchoFault, EchoTestReport};
pub use error::{GatewayError, TransportError};
pub use loopback::{LoopbackDevice, LoopbackTransport};
pub use session::{GatewaySession, SessionState};
pub use simulator::{SimulatedGateway, SimulatorOptions, SimulatorState};
pub use transport::{SerialTransport, Transport};

pub use moteino_protocol::{
    BadPacket, BadPacketReason, EchoPacket, FrequencyBand, NakReason, Packet, RadioConfig,
    RadioPacket, StatusPacket,
};
