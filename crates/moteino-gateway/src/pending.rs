//! Commands awaiting acknowledgement.
//!
//! Each command is registered under a fresh sequence number before it is
//! written. The dispatcher resolves the entry when an ACK or NAK with the
//! same seq and opcode arrives; the caller removes it on timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use moteino_protocol::{opcode_name, NakReason};
use parking_lot::Mutex;

/// How the gateway answered a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    Ack,
    Nak(NakReason),
}

struct PendingCommand {
    opcode: u8,
    issued_at: Instant,
    reply: Sender<AckOutcome>,
}

struct Inner {
    entries: HashMap<u8, PendingCommand>,
    next_seq: u8,
}

/// Sequence-keyed table of in-flight commands.
pub(crate) struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        PendingTable {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 1,
            }),
        }
    }

    /// Reserve a sequence number for `opcode`. Seq 0 is left to unsolicited
    /// gateway frames. Returns `None` when every seq is in flight.
    pub(crate) fn register(&self, opcode: u8) -> Option<(u8, Receiver<AckOutcome>)> {
        let mut inner = self.inner.lock();
        for _ in 0..u8::MAX {
            let seq = inner.next_seq;
            inner.next_seq = match inner.next_seq.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if inner.entries.contains_key(&seq) {
                continue;
            }
            let (reply, rx) = crossbeam_channel::bounded(1);
            inner.entries.insert(
                seq,
                PendingCommand {
                    opcode,
                    issued_at: Instant::now(),
                    reply,
                },
            );
            return Some((seq, rx));
        }
        None
    }

    /// Deliver an ACK/NAK. Returns false if nothing was waiting for it.
    pub(crate) fn resolve(&self, seq: u8, opcode: u8, outcome: AckOutcome) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(&seq) {
            Some(entry) if entry.opcode == opcode => {}
            Some(entry) => {
                log_mismatch(seq, entry.opcode, opcode);
                return false;
            }
            None => return false,
        }
        let Some(entry) = inner.entries.remove(&seq) else {
            return false;
        };
        drop(inner);

        tracing::trace!(
            seq,
            op = opcode_name(opcode),
            elapsed_us = entry.issued_at.elapsed().as_micros() as u64,
            ?outcome,
            "command resolved"
        );
        // Capacity 1 and a single resolve per entry, so this never blocks.
        // The waiter may already have given up, which is fine.
        let _ = entry.reply.try_send(outcome);
        true
    }

    /// Forget an entry whose caller stopped waiting.
    pub(crate) fn cancel(&self, seq: u8) {
        self.inner.lock().entries.remove(&seq);
    }

    /// Drop entries older than `max_age`. Returns how many were removed.
    pub(crate) fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.issued_at.elapsed() <= max_age);
        before - inner.entries.len()
    }

    /// Fail every waiter. Their receivers observe a disconnected channel.
    pub(crate) fn fail_all(&self) {
        let drained = std::mem::take(&mut self.inner.lock().entries);
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending commands");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

fn log_mismatch(seq: u8, expected: u8, got: u8) {
    tracing::warn!(
        seq,
        expected = opcode_name(expected),
        got = opcode_name(got),
        "acknowledgement opcode does not match pending command"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;
    use moteino_protocol::{OP_ECHO, OP_SEND_RADIO};

    #[test]
    fn test_register_and_resolve() {
        let table = PendingTable::new();
        let (seq, rx) = table.register(OP_ECHO).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.resolve(seq, OP_ECHO, AckOutcome::Ack));
        assert_eq!(rx.try_recv(), Ok(AckOutcome::Ack));
        assert_eq!(table.len(), 0);

        // Second ack for the same seq is late.
        assert!(!table.resolve(seq, OP_ECHO, AckOutcome::Ack));
    }

    #[test]
    fn test_opcode_must_match() {
        let table = PendingTable::new();
        let (seq, rx) = table.register(OP_SEND_RADIO).unwrap();
        assert!(!table.resolve(seq, OP_ECHO, AckOutcome::Ack));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(table.resolve(
            seq,
            OP_SEND_RADIO,
            AckOutcome::Nak(NakReason::TxFailed)
        ));
        assert_eq!(rx.try_recv(), Ok(AckOutcome::Nak(NakReason::TxFailed)));
    }

    #[test]
    fn test_seq_skips_zero_and_in_flight() {
        let table = PendingTable::new();
        let mut held = Vec::new();
        for _ in 0..255 {
            let (seq, rx) = table.register(OP_ECHO).unwrap();
            assert_ne!(seq, 0);
            held.push((seq, rx));
        }
        assert!(table.register(OP_ECHO).is_none());

        let (freed, _) = held.remove(100);
        table.cancel(freed);
        let (seq, _rx) = table.register(OP_ECHO).unwrap();
        assert_eq!(seq, freed);
    }

    #[test]
    fn test_fail_all_disconnects_waiters() {
        let table = PendingTable::new();
        let (_, rx1) = table.register(OP_ECHO).unwrap();
        let (_, rx2) = table.register(OP_ECHO).unwrap();
        table.fail_all();
        assert_eq!(rx1.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(rx2.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_purge() {
        let table = PendingTable::new();
        table.register(OP_ECHO).unwrap();
        assert_eq!(table.purge_older_than(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.purge_older_than(Duration::from_millis(1)), 1);
        assert_eq!(table.len(), 0);
    }
}
