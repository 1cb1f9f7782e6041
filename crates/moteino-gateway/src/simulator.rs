//! A simulated Moteino gateway running on the device end of a loopback link.
//!
//! The simulator decodes host commands and answers them the way the firmware
//! does: ACK on success, NAK with a reason otherwise, echo replies after the
//! ACK. Tests drive it through [`SimulatedGateway`] to inject radio traffic,
//! raw line noise and disconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use moteino_protocol::{
    opcode_name, Command, EncryptionKey, FrameDecoder, FrameStatus, NakReason, RadioConfig,
    RadioPacket, Reply,
};
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::loopback::LoopbackDevice;

/// Banner sent when the simulated gateway boots.
pub const DEFAULT_BANNER: &str = "gateway alive";

// ============================================================================
// Options and state
// ============================================================================

/// Behaviour knobs for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Status text sent on boot, if any.
    pub banner: Option<String>,
    /// RSSI reported on radio packets the simulator generates.
    pub rssi: i16,
    /// Answer every SEND_RADIO with a radio packet carrying the same data,
    /// as if the destination node echoed it back.
    pub reflect_radio: bool,
    /// Reject every SEND_RADIO with [`NakReason::TxFailed`].
    pub fail_transmit: bool,
    /// Process commands but never acknowledge them.
    pub mute_acks: bool,
    /// How often the worker checks for a stop request.
    pub poll: Duration,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        SimulatorOptions {
            banner: Some(DEFAULT_BANNER.to_string()),
            rssi: -40,
            reflect_radio: false,
            fail_transmit: false,
            mute_acks: false,
            poll: Duration::from_millis(10),
        }
    }
}

/// What the simulated radio has been told so far.
#[derive(Debug, Clone, Default)]
pub struct SimulatorState {
    /// Configuration from the last INIT_RADIO.
    pub radio: Option<RadioConfig>,
    /// Key from the last SET_KEY since INIT_RADIO.
    pub key: Option<EncryptionKey>,
    /// Packets transmitted over the air, as (destination, data).
    pub transmitted: Vec<(u16, Vec<u8>)>,
    /// Opcodes of every well-formed command, in arrival order.
    pub commands: Vec<u8>,
    /// Frames that failed their CRC or could not be parsed.
    pub rejected_frames: usize,
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running simulator thread.
pub struct SimulatedGateway {
    device: LoopbackDevice,
    state: Arc<Mutex<SimulatorState>>,
    stop: Arc<AtomicBool>,
    rssi: i16,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedGateway {
    /// Start a simulator with default options.
    pub fn spawn(device: LoopbackDevice) -> std::io::Result<Self> {
        Self::spawn_with(device, SimulatorOptions::default())
    }

    /// Start a simulator.
    pub fn spawn_with(device: LoopbackDevice, options: SimulatorOptions) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(SimulatorState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let rssi = options.rssi;

        let worker = SimulatorWorker {
            device: device.clone(),
            decoder: FrameDecoder::gateway(),
            state: Arc::clone(&state),
            stop: Arc::clone(&stop),
            options,
        };
        let thread = thread::Builder::new()
            .name("moteino-sim".to_string())
            .spawn(move || worker.run())?;

        Ok(SimulatedGateway {
            device,
            state,
            stop,
            rssi,
            thread: Some(thread),
        })
    }

    /// Deliver a radio packet to the host as if it arrived over the air.
    pub fn inject_radio_packet(
        &self,
        src_node: u16,
        dst_node: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let packet = RadioPacket {
            src_node,
            dst_node,
            rssi: self.rssi,
            data: data.to_vec(),
        };
        self.inject_reply(&Reply::Radio(packet))
    }

    /// Send an unsolicited gateway frame.
    pub fn inject_reply(&self, reply: &Reply) -> Result<(), TransportError> {
        self.device.send(&encode(reply, 0)?)
    }

    /// Write raw bytes to the host, e.g. line noise or a damaged frame.
    pub fn inject_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.device.send(bytes)
    }

    /// Snapshot of what the simulated radio has seen.
    pub fn state(&self) -> SimulatorState {
        self.state.lock().clone()
    }

    /// Stop the simulator and drop the device end, disconnecting the host.
    pub fn disconnect(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("simulator thread panicked");
            }
        }
    }
}

impl Drop for SimulatedGateway {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

// ============================================================================
// Worker
// ============================================================================

struct SimulatorWorker {
    device: LoopbackDevice,
    decoder: FrameDecoder,
    state: Arc<Mutex<SimulatorState>>,
    stop: Arc<AtomicBool>,
    options: SimulatorOptions,
}

impl SimulatorWorker {
    fn run(mut self) {
        if let Some(banner) = self.options.banner.clone() {
            if self.send(&Reply::Status(banner), 0).is_err() {
                return;
            }
        }

        while !self.stop.load(Ordering::Relaxed) {
            match self.device.recv_timeout(self.options.poll) {
                Ok(Some(bytes)) => {
                    for frame in self.decoder.push_bytes(&bytes) {
                        if frame.status == FrameStatus::Unsynchronized {
                            tracing::debug!(len = frame.payload.len(), "simulator skipped noise");
                            continue;
                        }
                        let (seq, opcode) = (frame.seq, frame.opcode);
                        let result = match Command::decode(&frame) {
                            Ok(command) => self.handle(seq, command),
                            Err(err) => {
                                tracing::debug!(opcode = opcode_name(opcode), %err, "simulator rejected frame");
                                self.state.lock().rejected_frames += 1;
                                self.nak(seq, opcode, NakReason::IllegalArg)
                            }
                        };
                        if result.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {}
                Err(_) => return,
            }
        }
    }

    fn handle(&mut self, seq: u8, command: Command) -> Result<(), TransportError> {
        let opcode = command.code();
        self.state.lock().commands.push(opcode);

        match command {
            Command::InitRadio(config) => {
                {
                    let mut state = self.state.lock();
                    state.radio = Some(config);
                    state.key = None;
                }
                self.ack(seq, opcode)
            }

            Command::SetEncryptionKey(key) => {
                let configured = {
                    let mut state = self.state.lock();
                    if state.radio.is_some() {
                        state.key = Some(key);
                    }
                    state.radio.is_some()
                };
                if configured {
                    self.ack(seq, opcode)
                } else {
                    self.nak(seq, opcode, NakReason::BadState)
                }
            }

            Command::SendRadioPacket { dst_node, data } => {
                let radio = self.state.lock().radio;
                let Some(radio) = radio else {
                    return self.nak(seq, opcode, NakReason::BadState);
                };
                if self.options.fail_transmit {
                    return self.nak(seq, opcode, NakReason::TxFailed);
                }
                self.state.lock().transmitted.push((dst_node, data.clone()));
                self.ack(seq, opcode)?;
                if self.options.reflect_radio {
                    let packet = RadioPacket {
                        src_node: dst_node,
                        dst_node: radio.node_id,
                        rssi: self.options.rssi,
                        data,
                    };
                    self.send(&Reply::Radio(packet), 0)?;
                }
                Ok(())
            }

            Command::Echo { payload } => {
                // One write, so nothing injected can land between ACK and reply.
                let mut bytes = if self.options.mute_acks {
                    Vec::new()
                } else {
                    encode(&Reply::Ack { opcode }, seq)?
                };
                bytes.extend(encode(&Reply::EchoReply(payload), seq)?);
                self.device.send(&bytes)
            }
        }
    }

    fn ack(&self, seq: u8, opcode: u8) -> Result<(), TransportError> {
        if self.options.mute_acks {
            return Ok(());
        }
        self.send(&Reply::Ack { opcode }, seq)
    }

    fn nak(&self, seq: u8, opcode: u8, reason: NakReason) -> Result<(), TransportError> {
        if self.options.mute_acks {
            return Ok(());
        }
        self.send(&Reply::Nak { opcode, reason }, seq)
    }

    fn send(&self, reply: &Reply, seq: u8) -> Result<(), TransportError> {
        self.device.send(&encode(reply, seq)?)
    }
}

fn encode(reply: &Reply, seq: u8) -> Result<Vec<u8>, TransportError> {
    reply
        .encode(seq)
        .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use crate::transport::Transport;
    use moteino_protocol::{FrequencyBand, Inbound, Packet, OP_ECHO, OP_INIT_RADIO, OP_SET_KEY};
    use std::time::Instant;

    fn read_inbound(host: &mut LoopbackTransport, decoder: &mut FrameDecoder, count: usize) -> Vec<Inbound> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while out.len() < count && Instant::now() < deadline {
            let n = host.read_available(&mut buf).unwrap();
            out.extend(decoder.push_bytes(&buf[..n]).into_iter().map(Inbound::classify));
        }
        out
    }

    #[test]
    fn test_banner_then_echo() {
        let (mut host, device) = LoopbackTransport::pair();
        let _sim = SimulatedGateway::spawn(device).unwrap();
        let mut decoder = FrameDecoder::host();

        let banner = read_inbound(&mut host, &mut decoder, 1);
        assert!(matches!(&banner[0], Inbound::Packet(Packet::Status(s)) if s.text == DEFAULT_BANNER));

        let echo = Command::Echo { payload: b"abc".to_vec() };
        host.write(&echo.encode(9).unwrap()).unwrap();
        let replies = read_inbound(&mut host, &mut decoder, 2);
        assert_eq!(replies[0], Inbound::Ack { seq: 9, opcode: OP_ECHO });
        assert!(matches!(&replies[1], Inbound::Packet(Packet::Echo(e)) if e.payload == b"abc"));
    }

    #[test]
    fn test_key_before_init_is_rejected() {
        let (mut host, device) = LoopbackTransport::pair();
        let sim = SimulatedGateway::spawn_with(
            device,
            SimulatorOptions {
                banner: None,
                ..SimulatorOptions::default()
            },
        )
        .unwrap();
        let mut decoder = FrameDecoder::host();

        let key = Command::SetEncryptionKey(EncryptionKey::new([7; 16]));
        host.write(&key.encode(1).unwrap()).unwrap();
        assert_eq!(
            read_inbound(&mut host, &mut decoder, 1),
            vec![Inbound::Nak {
                seq: 1,
                opcode: OP_SET_KEY,
                reason: NakReason::BadState
            }]
        );

        let init = Command::InitRadio(RadioConfig {
            frequency: FrequencyBand::Mhz915,
            node_id: 1,
            network_id: 100,
        });
        host.write(&init.encode(2).unwrap()).unwrap();
        host.write(&key.encode(3).unwrap()).unwrap();
        let replies = read_inbound(&mut host, &mut decoder, 2);
        assert_eq!(replies[0], Inbound::Ack { seq: 2, opcode: OP_INIT_RADIO });
        assert_eq!(replies[1], Inbound::Ack { seq: 3, opcode: OP_SET_KEY });

        let state = sim.state();
        assert_eq!(state.radio.map(|r| r.node_id), Some(1));
        assert!(state.key.is_some());
        assert_eq!(state.commands, vec![OP_SET_KEY, OP_INIT_RADIO, OP_SET_KEY]);
    }

    #[test]
    fn test_disconnect_closes_host() {
        let (mut host, device) = LoopbackTransport::pair();
        let sim = SimulatedGateway::spawn(device).unwrap();
        sim.disconnect();

        let mut buf = [0u8; 64];
        // The banner may still be buffered; the link reports disconnect after it.
        let mut result = host.read_available(&mut buf);
        while result.is_ok() {
            result = host.read_available(&mut buf);
        }
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }
}
