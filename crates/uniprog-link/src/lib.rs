//! uniprog-link - host side of the uniprog probe protocol
//!
//! Frames commands with `uniprog_core`'s codec, moves them over a
//! [`Transport`] and decodes the replies.
//!
//! # Supported Transports
//!
//! - Serial port (USB CDC-ACM): `serial:/dev/ttyACM0`, `serial:COM3,baud=115200`
//! - In-process simulated probe (feature `sim`): `sim`
//!
//! # Example
//!
//! ```no_run
//! use uniprog_link::{flash, Connection};
//!
//! let mut probe = Connection::parse("serial:/dev/ttyACM0")?.open()?;
//! probe.ping()?;
//! let (manufacturer, device) = flash::read_jedec_id(&mut probe)?;
//! println!("JEDEC ID: {:02X} {:04X}", manufacturer, device);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod error;
pub mod flash;
pub mod transport;

use std::time::Duration;

pub use client::{Client, ProbeStatus, SpiScan, DEFAULT_TIMEOUT};
pub use error::{LinkError, Result};
pub use transport::serial::SerialTransport;
#[cfg(feature = "sim")]
pub use transport::sim::SimTransport;
pub use transport::Transport;

/// Client over a transport chosen at runtime
pub type DynClient = Client<Box<dyn Transport>>;

/// Where the probe is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM3")
        device: String,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// Simulated probe in this process
    Sim,
}

impl Connection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `serial:/dev/ttyACM0` - serial with default baud
    /// - `serial:/dev/ttyACM0,baud=115200` - serial with specified baud
    /// - `sim` - simulated probe
    pub fn parse(s: &str) -> Result<Self> {
        if s == "sim" {
            return Ok(Connection::Sim);
        }
        let Some(rest) = s.strip_prefix("serial:") else {
            return Err(LinkError::InvalidConnection(format!(
                "{}. Use serial:<device>[,baud=N] or sim",
                s
            )));
        };

        let mut parts = rest.split(',');
        let device = parts.next().unwrap_or_default();
        if device.is_empty() {
            return Err(LinkError::InvalidConnection("missing serial device".into()));
        }
        let mut baud = None;
        for option in parts {
            match option.split_once('=') {
                Some(("baud", value)) => {
                    baud = Some(value.parse().map_err(|_| {
                        LinkError::InvalidConnection(format!("Invalid baud rate: {}", value))
                    })?);
                }
                _ => {
                    return Err(LinkError::InvalidConnection(format!(
                        "Unknown option: {}",
                        option
                    )))
                }
            }
        }
        Ok(Connection::Serial {
            device: device.to_string(),
            baud,
        })
    }

    /// Open the transport and wrap it in a client
    pub fn open(&self) -> Result<DynClient> {
        self.open_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Open with a custom reply timeout
    pub fn open_with_timeout(&self, timeout: Duration) -> Result<DynClient> {
        let transport: Box<dyn Transport> = match self {
            Connection::Serial { device, baud } => Box::new(SerialTransport::open(device, *baud)?),
            #[cfg(feature = "sim")]
            Connection::Sim => Box::new(SimTransport::spawn()?),
            #[cfg(not(feature = "sim"))]
            Connection::Sim => {
                return Err(LinkError::ConnectionFailed(
                    "built without simulated probe support".into(),
                ))
            }
        };
        Ok(Client::new(transport).with_timeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial() {
        assert_eq!(
            Connection::parse("serial:/dev/ttyACM0").unwrap(),
            Connection::Serial {
                device: "/dev/ttyACM0".into(),
                baud: None
            }
        );
        assert_eq!(
            Connection::parse("serial:COM3,baud=921600").unwrap(),
            Connection::Serial {
                device: "COM3".into(),
                baud: Some(921_600)
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "/dev/ttyACM0", "serial:", "serial:COM3,baud=fast", "serial:COM3,parity=odd"] {
            assert!(
                matches!(Connection::parse(bad), Err(LinkError::InvalidConnection(_))),
                "{}",
                bad
            );
        }
    }

    #[cfg(feature = "sim")]
    #[test]
    fn test_open_sim() {
        assert_eq!(Connection::parse("sim").unwrap(), Connection::Sim);
        let mut probe = Connection::Sim.open().unwrap();
        probe.ping().unwrap();
        assert!(probe.capabilities().unwrap().contains("\"swd\""));
    }
}
