//! Byte transports between the host and the gateway.
//!
//! The session needs two handles on the same link: the dispatcher worker owns
//! one for reading, callers share the other for writing. [`Transport::try_clone`]
//! provides the second handle.

use std::io::{self, Read, Write};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, TransportError};

/// A bidirectional byte stream to the gateway.
pub trait Transport: Send {
    /// Read whatever is available into `buf`, blocking for at most the
    /// transport's poll interval. Returns `Ok(0)` when nothing arrived.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Open a second handle on the same link.
    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Release the underlying handle early. Dropping has the same effect.
    fn close(&mut self) {}
}

/// A gateway attached to an OS serial port.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at the configured baud rate, 8N1, no flow control.
    pub fn open(port_name: &str, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let port = serialport::new(port_name, config.baud_rate)
            .timeout(config.read_poll())
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| GatewayError::PortUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(port = port_name, baud = config.baud_rate, "serial port opened");

        Ok(SerialTransport {
            name: port_name.to_string(),
            port,
        })
    }

    /// Port identifier this transport was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) => classify_io_error(e).map(|_| 0),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| {
                if is_disconnect(e.kind()) {
                    TransportError::Disconnected
                } else {
                    TransportError::Io(e)
                }
            })
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| TransportError::Io(e.into()))?;
        Ok(Box::new(SerialTransport {
            name: self.name.clone(),
            port,
        }))
    }
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    )
}

/// Read timeouts are not errors; a vanished device is a disconnect.
fn classify_io_error(err: io::Error) -> Result<(), TransportError> {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(()),
        kind if is_disconnect(kind) => Err(TransportError::Disconnected),
        _ => Err(TransportError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port() {
        let err = SerialTransport::open("/dev/does-not-exist-moteino", &GatewayConfig::default())
            .err()
            .expect("opening a missing port should fail");
        match err {
            GatewayError::PortUnavailable { port, .. } => {
                assert_eq!(port, "/dev/does-not-exist-moteino")
            }
            other => panic!("expected PortUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_io_error() {
        assert!(classify_io_error(io::Error::from(io::ErrorKind::TimedOut)).is_ok());
        assert!(matches!(
            classify_io_error(io::Error::from(io::ErrorKind::BrokenPipe)),
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            classify_io_error(io::Error::from(io::ErrorKind::PermissionDenied)),
            Err(TransportError::Io(_))
        ));
    }
}
