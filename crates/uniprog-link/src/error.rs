//! Error types for host-side probe communication

use thiserror::Error;
use uniprog_core::ErrorCode;

/// Errors raised while talking to a probe
#[derive(Debug, Error)]
pub enum LinkError {
    /// Failed to open the connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Malformed connection string
    #[error("Invalid connection string: {0}")]
    InvalidConnection(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(String),

    /// No reply within the configured timeout
    #[error("Timed out waiting for reply to command 0x{0:02X}")]
    Timeout(u8),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Reply frame failed its integrity check
    #[error("CRC mismatch in reply: received {received:08X}, computed {computed:08X}")]
    Crc {
        /// CRC carried by the frame
        received: u32,
        /// CRC computed over the frame
        computed: u32,
    },

    /// Reply header announced more than a frame can carry
    #[error("Reply declares {0} payload bytes")]
    Framing(u16),

    /// The probe answered with an error packet
    #[error("Probe error {code}: {message}")]
    Device {
        /// Wire error code
        code: ErrorCode,
        /// ASCII detail sent by the probe
        message: String,
    },

    /// Error packet carrying a code this host does not know
    #[error("Probe error 0x{0:02X}")]
    UnknownErrorCode(u8),

    /// Reply had the wrong shape for the command
    #[error("Unexpected reply to command 0x{command:02X}: {reason}")]
    InvalidResponse {
        /// Command that was sent
        command: u8,
        /// What was wrong
        reason: String,
    },

    /// Request does not fit the protocol
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

impl From<uniprog_core::Error> for LinkError {
    fn from(e: uniprog_core::Error) -> Self {
        LinkError::InvalidParameter(e.to_string())
    }
}

impl LinkError {
    /// Wire error code, when the probe reported one
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            LinkError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}
