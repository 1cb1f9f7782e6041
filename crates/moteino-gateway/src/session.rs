//! The public entry point: a session with one Moteino gateway.
//!
//! ```text
//! Closed --startup--> Open --init_radio--> Configured --set_encryption_key--> Keyed
//!    ^                                          ^                               |
//!    +---------------- shutdown ----------------+---------- init_radio ---------+
//! ```
//!
//! Commands are synchronous: each one is written, then the caller blocks until
//! the matching ACK/NAK arrives or the command timeout expires. Everything else
//! the gateway sends lands on a FIFO queue read with
//! [`GatewaySession::wait_for_message`].

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use moteino_protocol::{
    opcode_name, Command, EncryptionKey, FrequencyBand, Packet, RadioConfig, ENCRYPTION_KEY_SIZE,
    MAX_FRAME_PAYLOAD, MAX_RADIO_PAYLOAD,
};
use parking_lot::Mutex;

use crate::config::GatewayConfig;
use crate::dispatcher::{spawn_dispatcher, LinkShared, LinkStats, WorkerExit};
use crate::error::{GatewayError, TransportError};
use crate::pending::AckOutcome;
use crate::transport::{SerialTransport, Transport};

/// Lifecycle state of a [`GatewaySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport is open.
    Closed,
    /// Transport open, radio not initialised.
    Open,
    /// Radio initialised, no encryption key loaded.
    Configured,
    /// Radio initialised and an encryption key loaded.
    Keyed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::Configured => "configured",
            SessionState::Keyed => "keyed",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct RadioState {
    config: Option<RadioConfig>,
    keyed: bool,
}

struct Link {
    shared: Arc<LinkShared>,
    writer: Mutex<Box<dyn Transport>>,
    packets: Receiver<Packet>,
    worker: Option<JoinHandle<WorkerExit>>,
}

/// A connection to one gateway.
///
/// Commands take `&self`, so a session can be shared between a thread that
/// issues commands and one that consumes packets. Dropping the session shuts
/// it down.
pub struct GatewaySession {
    config: GatewayConfig,
    link: Option<Link>,
    radio: Mutex<RadioState>,
}

impl GatewaySession {
    /// Create a closed session.
    pub fn new(config: GatewayConfig) -> Self {
        GatewaySession {
            config,
            link: None,
            radio: Mutex::new(RadioState::default()),
        }
    }

    /// Settings this session was created with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open `port` and start the dispatcher.
    pub fn startup(&mut self, port: &str) -> Result<(), GatewayError> {
        if self.link.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }
        self.config.validate()?;
        let transport = SerialTransport::open(port, &self.config)?;
        self.startup_with_transport(Box::new(transport))
    }

    /// Start the session on an already-open transport.
    pub fn startup_with_transport(
        &mut self,
        transport: Box<dyn Transport>,
    ) -> Result<(), GatewayError> {
        if self.link.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }
        self.config.validate()?;

        let writer = transport.try_clone()?;
        let (tx, packets) = crossbeam_channel::bounded(self.config.queue_capacity);
        let shared = Arc::new(LinkShared::new());
        let worker = spawn_dispatcher(
            transport,
            tx,
            Arc::clone(&shared),
            self.config.read_chunk_size,
            self.config.read_poll(),
            self.config.command_timeout(),
        )
        .map_err(TransportError::Io)?;

        *self.radio.lock() = RadioState::default();
        self.link = Some(Link {
            shared,
            writer: Mutex::new(writer),
            packets,
            worker: Some(worker),
        });
        tracing::info!("gateway session started");
        Ok(())
    }

    /// Stop the dispatcher and release the transport. Safe to call twice.
    pub fn shutdown(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        link.shared.request_stop();
        if let Some(worker) = link.worker.take() {
            match worker.join() {
                Ok(exit) => tracing::debug!(?exit, "dispatcher joined"),
                Err(_) => tracing::error!("dispatcher thread panicked"),
            }
        }
        link.writer.lock().close();
        *self.radio.lock() = RadioState::default();

        let discarded = link.packets.len();
        if discarded > 0 {
            tracing::debug!(discarded, "undelivered packets dropped at shutdown");
        }
        tracing::info!("gateway session closed");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.link.is_none() {
            return SessionState::Closed;
        }
        let radio = self.radio.lock();
        match (radio.config, radio.keyed) {
            (None, _) => SessionState::Open,
            (Some(_), false) => SessionState::Configured,
            (Some(_), true) => SessionState::Keyed,
        }
    }

    /// Whether the dispatcher is still reading from the gateway.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.shared.is_alive())
    }

    /// Radio parameters from the last successful `init_radio`.
    pub fn radio_config(&self) -> Option<RadioConfig> {
        self.radio.lock().config
    }

    /// Whether an encryption key is loaded for the current radio config.
    pub fn has_encryption_key(&self) -> bool {
        self.radio.lock().keyed
    }

    /// Dispatcher counters, or `None` when closed.
    pub fn stats(&self) -> Option<LinkStats> {
        self.link.as_ref().map(|link| link.shared.stats())
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Initialise the radio. Any previously loaded key is forgotten.
    pub fn init_radio(
        &self,
        frequency_mhz: u16,
        node_id: u16,
        network_id: u8,
    ) -> Result<(), GatewayError> {
        let frequency = FrequencyBand::from_mhz(frequency_mhz)
            .ok_or(GatewayError::InvalidFrequency(frequency_mhz))?;
        let config = RadioConfig {
            frequency,
            node_id,
            network_id,
        };

        self.execute(Command::InitRadio(config))?;

        let mut radio = self.radio.lock();
        radio.config = Some(config);
        radio.keyed = false;
        tracing::info!(%frequency, node_id, network_id, "radio initialised");
        Ok(())
    }

    /// Load a 16-byte AES key. Requires `init_radio` first.
    pub fn set_encryption_key(&self, key: &[u8]) -> Result<(), GatewayError> {
        if key.len() != ENCRYPTION_KEY_SIZE {
            return Err(GatewayError::InvalidKeyLength(key.len()));
        }
        let key = EncryptionKey::from_slice(key)?;
        self.link()?;
        self.require_configured()?;

        self.execute(Command::SetEncryptionKey(key))?;

        self.radio.lock().keyed = true;
        tracing::info!("encryption key loaded");
        Ok(())
    }

    /// Transmit `data` to `dst_node`. Requires `init_radio` first.
    pub fn send_radio_packet(&self, dst_node: u16, data: &[u8]) -> Result<(), GatewayError> {
        if data.len() > MAX_RADIO_PAYLOAD {
            return Err(GatewayError::PayloadTooLarge {
                size: data.len(),
                max: MAX_RADIO_PAYLOAD,
            });
        }
        self.link()?;
        self.require_configured()?;

        self.execute(Command::SendRadioPacket {
            dst_node,
            data: data.to_vec(),
        })
    }

    /// Ask the gateway to echo `payload` back as an [`Packet::Echo`].
    ///
    /// Returns `Ok(true)` if the gateway acknowledged, `Ok(false)` if it
    /// rejected the command or did not answer in time.
    pub fn echo(&self, payload: &[u8]) -> Result<bool, GatewayError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(GatewayError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        match self.execute(Command::Echo {
            payload: payload.to_vec(),
        }) {
            Ok(()) => Ok(true),
            Err(err @ (GatewayError::Timeout | GatewayError::NotAcknowledged { .. })) => {
                tracing::warn!(%err, "echo not acknowledged");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------------
    // Packets
    // ------------------------------------------------------------------------

    /// Take the next packet, blocking for up to `timeout` (`None` waits forever).
    ///
    /// Packets already queued are still delivered after the link drops; once
    /// the queue is empty a dead link yields [`GatewayError::Disconnected`].
    pub fn wait_for_message(&self, timeout: Option<Duration>) -> Result<Packet, GatewayError> {
        let link = self.link()?;
        match timeout {
            Some(timeout) => link.packets.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => GatewayError::Timeout,
                RecvTimeoutError::Disconnected => GatewayError::Disconnected,
            }),
            None => link
                .packets
                .recv()
                .map_err(|_| GatewayError::Disconnected),
        }
    }

    /// Take the next packet if one is queued.
    pub fn try_next_message(&self) -> Result<Option<Packet>, GatewayError> {
        let link = self.link()?;
        match link.packets.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(GatewayError::Disconnected),
        }
    }

    /// Number of packets waiting on the queue.
    pub fn queued_messages(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.packets.len())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn link(&self) -> Result<&Link, GatewayError> {
        self.link.as_ref().ok_or(GatewayError::NotStarted)
    }

    fn require_configured(&self) -> Result<(), GatewayError> {
        if self.radio.lock().config.is_none() {
            return Err(GatewayError::NotConfigured);
        }
        Ok(())
    }

    /// Write a command and wait for its acknowledgement.
    fn execute(&self, command: Command) -> Result<(), GatewayError> {
        let link = self.link()?;
        if !link.shared.is_alive() {
            return Err(GatewayError::Disconnected);
        }

        let opcode = command.code();
        let Some((seq, reply)) = link.shared.pending.register(opcode) else {
            tracing::warn!(op = opcode_name(opcode), "no free sequence numbers");
            return Err(GatewayError::Timeout);
        };
        // The worker may have exited between the check above and the insert;
        // its final sweep would then have missed this entry.
        if !link.shared.is_alive() {
            link.shared.pending.cancel(seq);
            return Err(GatewayError::Disconnected);
        }

        let sent = command
            .encode(seq)
            .map_err(GatewayError::from)
            .and_then(|bytes| {
                tracing::trace!(seq, op = opcode_name(opcode), frame_len = bytes.len(), "sending command");
                link.writer.lock().write(&bytes).map_err(GatewayError::from)
            });
        if let Err(err) = sent {
            link.shared.pending.cancel(seq);
            return Err(err);
        }

        match reply.recv_timeout(self.config.command_timeout()) {
            Ok(AckOutcome::Ack) => Ok(()),
            Ok(AckOutcome::Nak(reason)) => {
                tracing::debug!(seq, op = opcode_name(opcode), %reason, "command rejected");
                Err(GatewayError::NotAcknowledged { opcode, reason })
            }
            Err(RecvTimeoutError::Timeout) => {
                link.shared.pending.cancel(seq);
                tracing::debug!(seq, op = opcode_name(opcode), "command timed out");
                Err(GatewayError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(GatewayError::Disconnected),
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
