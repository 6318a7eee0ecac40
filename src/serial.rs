use std::io::{Read, Write};
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

/// Every connection runs at this rate, 8N1, no flow control.
pub const BAUD_RATE: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("{port}: {reason}")]
    Open { port: String, reason: String },
    #[error("not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

impl SerialError {
    fn open(port: &str, reason: impl ToString) -> Self {
        let mut reason = reason.to_string();
        if reason.is_empty() {
            reason = "open failed".to_string();
        }
        SerialError::Open {
            port: port.to_string(),
            reason,
        }
    }
}

/// An open serial device.
pub trait SerialLink {
    fn name(&self) -> &str;

    /// Bytes received by the device but not read yet. Must not block.
    fn pending(&mut self) -> Result<usize, SerialError>;

    /// Fills `buf` completely from the receive buffer.
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<(), SerialError>;

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError>;
}

pub trait PortOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, SerialError>;
}

/// Opens real devices through the `serialport` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl PortOpener for SystemOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, SerialError> {
        let device = serialport::new(port, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| SerialError::open(port, e))?;
        Ok(Box::new(DevicePort {
            port: device,
            name: port.to_string(),
        }))
    }
}

struct DevicePort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialLink for DevicePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn pending(&mut self) -> Result<usize, SerialError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        self.port.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Device identifiers currently visible to the OS. Enumeration failures
/// are logged and reported as an empty list.
pub fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("port enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// The single serial session of the application.
#[derive(Default)]
pub enum Connection {
    #[default]
    Disconnected,
    Connected(Box<dyn SerialLink>),
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        matches!(self, Connection::Connected(_))
    }

    pub fn port_name(&self) -> Option<&str> {
        match self {
            Connection::Connected(link) => Some(link.name()),
            Connection::Disconnected => None,
        }
    }

    /// Opens `port` at [`BAUD_RATE`]. Any link already open is closed
    /// first; on failure the connection stays disconnected.
    pub fn connect(&mut self, opener: &dyn PortOpener, port: &str) -> Result<(), SerialError> {
        self.disconnect();
        let link = opener.open(port, BAUD_RATE)?;
        info!("opened {port} at {BAUD_RATE} baud");
        *self = Connection::Connected(link);
        Ok(())
    }

    /// Drops the link, closing the device. Returns whether one was open.
    pub fn disconnect(&mut self) -> bool {
        match std::mem::take(self) {
            Connection::Connected(link) => {
                info!("closed {}", link.name());
                true
            }
            Connection::Disconnected => false,
        }
    }

    pub fn pending(&mut self) -> Result<usize, SerialError> {
        match self {
            Connection::Connected(link) => link.pending(),
            Connection::Disconnected => Err(SerialError::NotConnected),
        }
    }

    /// Reads exactly the bytes pending right now. Never touches a device
    /// while disconnected.
    pub fn read_pending(&mut self) -> Result<Vec<u8>, SerialError> {
        if !self.is_connected() {
            return Ok(Vec::new());
        }
        let n = self.pending()?;
        let Connection::Connected(link) = self else {
            return Ok(Vec::new());
        };
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; n];
        link.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        match self {
            Connection::Connected(link) => link.write_all(data),
            Connection::Disconnected => Err(SerialError::NotConnected),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Connected(link) => f.debug_tuple("Connected").field(&link.name()).finish(),
            Connection::Disconnected => f.write_str("Disconnected"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::sim::SimOpener;
    use super::*;

    #[test]
    fn enumeration_is_stable_without_device_changes() {
        assert_eq!(list_ports(), list_ports());
    }

    #[test]
    fn connect_to_known_port() {
        let mut opener = SimOpener::default();
        let port = opener.add("SIM0");
        let mut conn = Connection::default();

        conn.connect(&opener, "SIM0").unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.port_name(), Some("SIM0"));
        assert!(port.is_open());
        assert_eq!(port.baud_rate(), BAUD_RATE);
    }

    #[test]
    fn connect_to_unknown_port_stays_disconnected() {
        let opener = SimOpener::default();
        let mut conn = Connection::default();

        let err = conn.connect(&opener, "SIM9").unwrap_err();

        assert!(!conn.is_connected());
        assert_eq!(err.to_string(), "SIM9: no such device");
        match err {
            SerialError::Open { port, .. } => assert_eq!(port, "SIM9"),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[test]
    fn system_opener_rejects_missing_device() {
        let err = SystemOpener
            .open("/dev/nanoterm_missing_port_0", BAUD_RATE)
            .err()
            .expect("opening a missing device must fail");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn reconnect_closes_previous_link() {
        let mut opener = SimOpener::default();
        let first = opener.add("SIM0");
        let second = opener.add("SIM1");
        let mut conn = Connection::default();

        conn.connect(&opener, "SIM0").unwrap();
        conn.connect(&opener, "SIM1").unwrap();

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(conn.port_name(), Some("SIM1"));
    }

    #[test]
    fn read_pending_drains_everything_once() {
        let mut opener = SimOpener::default();
        let port = opener.add("SIM0");
        let mut conn = Connection::default();
        conn.connect(&opener, "SIM0").unwrap();

        port.feed(b"abc");
        port.feed(b"\r\n");

        assert_eq!(conn.read_pending().unwrap(), b"abc\r\n");
        assert!(conn.read_pending().unwrap().is_empty());
    }

    #[test]
    fn disconnect_closes_and_short_circuits_reads() {
        let mut opener = SimOpener::default();
        let port = opener.add("SIM0");
        let mut conn = Connection::default();
        conn.connect(&opener, "SIM0").unwrap();

        assert!(conn.disconnect());
        assert!(!port.is_open());
        assert!(!conn.disconnect());

        let checks = port.pending_checks();
        port.feed(b"late");
        assert!(conn.read_pending().unwrap().is_empty());
        assert_eq!(port.pending_checks(), checks);
        assert!(matches!(conn.pending(), Err(SerialError::NotConnected)));
    }

    #[test]
    fn write_requires_connection() {
        let mut opener = SimOpener::default();
        let port = opener.add("SIM0");
        let mut conn = Connection::default();

        assert!(matches!(conn.write(b"x"), Err(SerialError::NotConnected)));

        conn.connect(&opener, "SIM0").unwrap();
        conn.write(b"hello").unwrap();
        assert_eq!(port.writes(), vec![b"hello".to_vec()]);
    }
}
