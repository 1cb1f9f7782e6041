//! In-process transport pair.
//!
//! [`LoopbackTransport::pair`] returns the host end (a [`Transport`]) and the
//! device end ([`LoopbackDevice`]). Bytes written on one end arrive on the
//! other, in order. Dropping every device handle disconnects the host end,
//! which is how tests simulate a pulled cable.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::TransportError;
use crate::transport::Transport;

/// Host end of a loopback link.
pub struct LoopbackTransport {
    to_device: Sender<Vec<u8>>,
    from_device: Receiver<Vec<u8>>,
    /// Bytes of a received chunk that did not fit the caller's buffer.
    leftover: Vec<u8>,
    poll: Duration,
}

/// Device end of a loopback link.
#[derive(Clone)]
pub struct LoopbackDevice {
    to_host: Sender<Vec<u8>>,
    from_host: Receiver<Vec<u8>>,
}

impl LoopbackTransport {
    /// Default time a host read blocks when nothing is available.
    pub const DEFAULT_POLL: Duration = Duration::from_millis(10);

    /// Create a connected host/device pair.
    pub fn pair() -> (LoopbackTransport, LoopbackDevice) {
        Self::pair_with_poll(Self::DEFAULT_POLL)
    }

    /// Create a pair whose host reads block for at most `poll`.
    pub fn pair_with_poll(poll: Duration) -> (LoopbackTransport, LoopbackDevice) {
        let (to_device, from_host) = crossbeam_channel::unbounded();
        let (to_host, from_device) = crossbeam_channel::unbounded();
        (
            LoopbackTransport {
                to_device,
                from_device,
                leftover: Vec::new(),
                poll,
            },
            LoopbackDevice { to_host, from_host },
        )
    }

    fn fill(&mut self, buf: &mut [u8], chunk: Vec<u8>) -> usize {
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.leftover = chunk[n..].to_vec();
        }
        n
    }
}

impl Transport for LoopbackTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.leftover.is_empty() {
            let chunk = std::mem::take(&mut self.leftover);
            return Ok(self.fill(buf, chunk));
        }
        match self.from_device.recv_timeout(self.poll) {
            Ok(chunk) => Ok(self.fill(buf, chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.to_device
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(LoopbackTransport {
            to_device: self.to_device.clone(),
            from_device: self.from_device.clone(),
            leftover: Vec::new(),
            poll: self.poll,
        }))
    }
}

impl LoopbackDevice {
    /// Send bytes to the host.
    pub fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.to_host
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    /// Wait up to `timeout` for bytes written by the host.
    /// Returns `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.from_host.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Take bytes written by the host without blocking.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.from_host.try_recv() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}
