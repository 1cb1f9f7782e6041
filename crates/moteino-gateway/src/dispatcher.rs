//! Background worker that owns the read side of the transport.
//!
//! The worker reads bytes, frames them, resolves acknowledgements against the
//! [`PendingTable`] and pushes every other frame onto the packet queue in
//! arrival order. It exits when asked to stop, when the transport reports a
//! disconnect, or when the session drops the queue receiver. On exit it marks
//! the link dead, fails all pending commands and drops the queue sender so
//! blocked waiters wake up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use moteino_protocol::{opcode_name, FrameDecoder, Inbound, Packet};

use crate::error::TransportError;
use crate::pending::{AckOutcome, PendingTable};
use crate::transport::Transport;

/// Name of the dispatcher thread.
pub const DISPATCHER_THREAD_NAME: &str = "moteino-dispatch";

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Bytes read from the transport.
    pub bytes_read: u64,
    /// Frames produced by the decoder, including bad ones.
    pub frames: u64,
    /// ACK/NAK frames matched to a pending command.
    pub acks: u64,
    /// ACK/NAK frames nobody was waiting for.
    pub late_acks: u64,
    /// Packets put on the queue.
    pub packets: u64,
    /// Of which were [`Packet::Bad`].
    pub bad_packets: u64,
    /// Commands currently awaiting acknowledgement.
    pub pending_commands: u64,
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the session and its dispatcher.
pub(crate) struct LinkShared {
    pub(crate) pending: PendingTable,
    alive: AtomicBool,
    stop: AtomicBool,
    bytes_read: AtomicU64,
    frames: AtomicU64,
    acks: AtomicU64,
    late_acks: AtomicU64,
    packets: AtomicU64,
    bad_packets: AtomicU64,
}

impl LinkShared {
    pub(crate) fn new() -> Self {
        LinkShared {
            pending: PendingTable::new(),
            alive: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            late_acks: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            bad_packets: AtomicU64::new(0),
        }
    }

    /// False once the worker has exited for any reason.
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> LinkStats {
        LinkStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            late_acks: self.late_acks.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bad_packets: self.bad_packets.load(Ordering::Relaxed),
            pending_commands: self.pending.len() as u64,
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Stopped,
    Disconnected,
    QueueClosed,
}

struct Dispatcher {
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    queue: Sender<Packet>,
    shared: Arc<LinkShared>,
    read_buf: Vec<u8>,
    enqueue_poll: Duration,
    stale_after: Duration,
}

/// Start the dispatcher on its own thread.
pub(crate) fn spawn_dispatcher(
    transport: Box<dyn Transport>,
    queue: Sender<Packet>,
    shared: Arc<LinkShared>,
    read_chunk_size: usize,
    poll: Duration,
    command_timeout: Duration,
) -> std::io::Result<JoinHandle<WorkerExit>> {
    let dispatcher = Dispatcher {
        transport,
        decoder: FrameDecoder::host(),
        queue,
        shared,
        read_buf: vec![0u8; read_chunk_size],
        enqueue_poll: poll,
        stale_after: command_timeout * 2,
    };

    thread::Builder::new()
        .name(DISPATCHER_THREAD_NAME.to_string())
        .spawn(move || dispatcher.run())
}

impl Dispatcher {
    fn run(mut self) -> WorkerExit {
        tracing::debug!("dispatcher started");
        let exit = self.read_loop();

        // Bytes left in the decoder would otherwise vanish with the link.
        if exit == WorkerExit::Disconnected {
            if let Some(frame) = self.decoder.flush() {
                self.shared.frames.fetch_add(1, Ordering::Relaxed);
                self.dispatch(Inbound::classify(frame));
            }
        }

        self.shared.alive.store(false, Ordering::Release);
        self.shared.pending.fail_all();
        self.transport.close();
        match exit {
            WorkerExit::Disconnected => tracing::warn!("gateway link lost"),
            _ => tracing::debug!(?exit, "dispatcher stopped"),
        }
        // `self.queue` drops here, waking anyone blocked on the receiver.
        exit
    }

    fn read_loop(&mut self) -> WorkerExit {
        loop {
            if self.shared.should_stop() {
                return WorkerExit::Stopped;
            }

            let n = match self.transport.read_available(&mut self.read_buf) {
                Ok(n) => n,
                Err(TransportError::Disconnected) => {
                    return WorkerExit::Disconnected;
                }
                Err(err) => {
                    tracing::error!(%err, "transport read failed");
                    return WorkerExit::Disconnected;
                }
            };

            if n == 0 {
                let purged = self.shared.pending.purge_older_than(self.stale_after);
                if purged > 0 {
                    tracing::debug!(purged, "dropped stale pending commands");
                }
                continue;
            }

            self.shared.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            tracing::trace!(bytes = n, "read from transport");

            let frames = self.decoder.push_bytes(&self.read_buf[..n]);
            for frame in frames {
                self.shared.frames.fetch_add(1, Ordering::Relaxed);
                if let Some(exit) = self.dispatch(Inbound::classify(frame)) {
                    return exit;
                }
            }
        }
    }

    fn dispatch(&mut self, inbound: Inbound) -> Option<WorkerExit> {
        match inbound {
            Inbound::Ack { seq, opcode } => {
                self.resolve(seq, opcode, AckOutcome::Ack);
                None
            }
            Inbound::Nak {
                seq,
                opcode,
                reason,
            } => {
                self.resolve(seq, opcode, AckOutcome::Nak(reason));
                None
            }
            Inbound::Packet(packet) => self.enqueue(packet),
        }
    }

    fn resolve(&self, seq: u8, opcode: u8, outcome: AckOutcome) {
        if self.shared.pending.resolve(seq, opcode, outcome) {
            self.shared.acks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.late_acks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(seq, op = opcode_name(opcode), ?outcome, "late or unmatched acknowledgement dropped");
        }
    }

    /// Blocks while the queue is full; the stop flag is checked between attempts.
    fn enqueue(&mut self, mut packet: Packet) -> Option<WorkerExit> {
        if let Packet::Bad(bad) = &packet {
            self.shared.bad_packets.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(op = opcode_name(bad.opcode), reason = %bad.reason, "bad packet from gateway");
        }

        loop {
            match self.queue.send_timeout(packet, self.enqueue_poll) {
                Ok(()) => {
                    self.shared.packets.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shared.should_stop() {
                        return Some(WorkerExit::Stopped);
                    }
                    tracing::trace!("packet queue full");
                    packet = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Some(WorkerExit::QueueClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use moteino_protocol::{Reply, OP_ECHO};

    fn start(capacity: usize) -> (
        crate::loopback::LoopbackDevice,
        crossbeam_channel::Receiver<Packet>,
        Arc<LinkShared>,
        JoinHandle<WorkerExit>,
    ) {
        let (host, device) = LoopbackTransport::pair_with_poll(Duration::from_millis(5));
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let shared = Arc::new(LinkShared::new());
        let handle = spawn_dispatcher(
            Box::new(host),
            tx,
            Arc::clone(&shared),
            64,
            Duration::from_millis(5),
            Duration::from_secs(1),
        )
        .unwrap();
        (device, rx, shared, handle)
    }

    #[test]
    fn test_acks_resolve_and_packets_queue() {
        let (device, rx, shared, handle) = start(16);
        let (seq, ack_rx) = shared.pending.register(OP_ECHO).unwrap();

        let mut bytes = Reply::Ack { opcode: OP_ECHO }.encode(seq).unwrap();
        bytes.extend(Reply::EchoReply(b"x".to_vec()).encode(seq).unwrap());
        device.send(&bytes).unwrap();

        assert_eq!(ack_rx.recv_timeout(Duration::from_secs(2)), Ok(AckOutcome::Ack));
        let packet = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(packet, Packet::Echo(ref e) if e.payload == b"x"));
        assert!(rx.try_recv().is_err());

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
        let stats = shared.stats();
        assert_eq!(stats.acks, 1);
        assert_eq!(stats.packets, 1);
    }

    #[test]
    fn test_disconnect_fails_pending_and_closes_queue() {
        let (device, rx, shared, handle) = start(16);
        let (_, ack_rx) = shared.pending.register(OP_ECHO).unwrap();

        drop(device);
        assert_eq!(handle.join().unwrap(), WorkerExit::Disconnected);
        assert!(!shared.is_alive());
        assert!(ack_rx.recv().is_err());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_leftover_bytes_are_reported_on_disconnect() {
        let (device, rx, _shared, handle) = start(16);
        device.send(b"brown-out").unwrap();
        drop(device);

        assert_eq!(handle.join().unwrap(), WorkerExit::Disconnected);
        match rx.recv().unwrap() {
            Packet::Bad(bad) => assert_eq!(bad.payload, b"brown-out"),
            other => panic!("expected bad packet, got {:?}", other),
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_full_queue_blocks_instead_of_dropping() {
        let (device, rx, shared, handle) = start(2);
        let mut bytes = Vec::new();
        for i in 0..50u8 {
            bytes.extend(Reply::EchoReply(vec![i]).encode(0).unwrap());
        }
        device.send(&bytes).unwrap();

        // Let the worker fill the queue and block on it.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rx.len(), 2);

        for i in 0..50u8 {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                Packet::Echo(echo) => assert_eq!(echo.payload, vec![i]),
                other => panic!("expected echo {}, got {:?}", i, other),
            }
        }
        assert!(rx.try_recv().is_err());

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
        assert_eq!(shared.stats().packets, 50);
    }

    #[test]
    fn test_full_queue_still_honours_stop() {
        let (device, rx, shared, handle) = start(1);
        for _ in 0..3 {
            device
                .send(&Reply::Status("tick".into()).encode(0).unwrap())
                .unwrap();
        }
        // Give the worker time to fill the queue and block.
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, Packet::Status(_)));

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
    }
}
