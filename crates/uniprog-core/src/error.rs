//! Error types for uniprog-core
//!
//! Two layers live here. [`Error`] is the internal, `Copy` error returned by
//! the engines and the registry. [`ErrorCode`] and [`CommandError`] are what
//! travels back to the host inside an error packet.

use core::fmt;

/// Why an SWD register access was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwdFailure {
    /// Target answered WAIT (ACK = 0b010)
    Wait,
    /// Target answered FAULT (ACK = 0b100)
    Fault,
    /// Nothing drove the line during the ACK phase (reads as 0b111)
    NoResponse,
    /// ACK pattern that is not defined by the protocol
    InvalidAck(u8),
    /// Parity bit of a read data word did not match
    Parity,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Registry errors
    /// All registry slots are in use
    RegistryFull,
    /// Registration range has `start > end`
    InvalidRange,

    // Buffer errors
    /// Handler tried to write past the response capacity
    ResponseOverflow,
    /// Payload longer than the protocol maximum
    PayloadTooLarge,

    // QSPI errors
    /// Operation is not possible in the current QSPI mode
    UnsupportedMode,
    /// Mode number outside 0..=5
    InvalidMode(u8),
    /// Address length other than 3 or 4 bytes
    InvalidAddressLength(u8),
    /// Requested clock frequency cannot be produced
    InvalidClock,

    // Bus errors
    /// I2C or SPI peripheral reported an error
    Bus,
    /// GPIO pin could not be driven
    Pin,

    // SWD errors
    /// SWD transaction failed
    Swd(SwdFailure),
}

impl fmt::Display for SwdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => write!(f, "target answered WAIT"),
            Self::Fault => write!(f, "target answered FAULT"),
            Self::NoResponse => write!(f, "no response from target"),
            Self::InvalidAck(ack) => write!(f, "invalid ACK 0b{:03b}", ack),
            Self::Parity => write!(f, "data parity error"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistryFull => write!(f, "driver registry is full"),
            Self::InvalidRange => write!(f, "invalid command range"),
            Self::ResponseOverflow => write!(f, "response buffer overflow"),
            Self::PayloadTooLarge => write!(f, "payload exceeds maximum length"),
            Self::UnsupportedMode => write!(f, "operation not supported in current QSPI mode"),
            Self::InvalidMode(mode) => write!(f, "invalid QSPI mode {}", mode),
            Self::InvalidAddressLength(len) => write!(f, "invalid address length {}", len),
            Self::InvalidClock => write!(f, "invalid clock frequency"),
            Self::Bus => write!(f, "bus transfer failed"),
            Self::Pin => write!(f, "GPIO error"),
            Self::Swd(failure) => write!(f, "SWD: {}", failure),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<SwdFailure> for Error {
    fn from(failure: SwdFailure) -> Self {
        Self::Swd(failure)
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

/// Error code carried in the first payload byte of an error packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// No driver handles the command
    UnknownCommand = 0x01,
    /// Frame CRC did not match
    CrcMismatch = 0x02,
    /// Request payload is truncated or malformed
    InvalidRequest = 0x03,
    /// Driver failed without a more specific reason
    CommandFailed = 0x04,
    /// Bus NACK or peripheral error
    BusError = 0x05,
    /// Declared payload length exceeds the maximum
    PayloadTooLarge = 0x06,
    /// Parameter out of range
    InvalidParameter = 0x07,
    /// Debug target rejected the access
    TargetError = 0x08,
}

impl ErrorCode {
    /// Decode a wire value
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::UnknownCommand),
            0x02 => Some(Self::CrcMismatch),
            0x03 => Some(Self::InvalidRequest),
            0x04 => Some(Self::CommandFailed),
            0x05 => Some(Self::BusError),
            0x06 => Some(Self::PayloadTooLarge),
            0x07 => Some(Self::InvalidParameter),
            0x08 => Some(Self::TargetError),
            _ => None,
        }
    }

    /// Short human readable name
    pub const fn name(self) -> &'static str {
        match self {
            Self::UnknownCommand => "unknown command",
            Self::CrcMismatch => "CRC mismatch",
            Self::InvalidRequest => "invalid request",
            Self::CommandFailed => "command failed",
            Self::BusError => "bus error",
            Self::PayloadTooLarge => "payload too large",
            Self::InvalidParameter => "invalid parameter",
            Self::TargetError => "target error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Failure returned by a [`Driver`](crate::Driver) command handler
///
/// The code and message are sent back verbatim as the error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandError {
    /// Wire error code
    pub code: ErrorCode,
    /// ASCII detail appended after the code
    pub message: &'static str,
}

impl CommandError {
    /// Build an error from a code and message
    pub const fn new(code: ErrorCode, message: &'static str) -> Self {
        Self { code, message }
    }

    /// The command is not implemented by the driver owning its range
    pub const fn unknown_command() -> Self {
        Self::new(ErrorCode::UnknownCommand, "Unknown CMD")
    }

    /// The request payload could not be decoded
    pub const fn invalid_request(message: &'static str) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// A request field is out of range
    pub const fn invalid_parameter(message: &'static str) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    /// The bus reported a failure
    pub const fn bus(message: &'static str) -> Self {
        Self::new(ErrorCode::BusError, message)
    }

    /// The attached target refused or did not answer
    pub const fn target(message: &'static str) -> Self {
        Self::new(ErrorCode::TargetError, message)
    }
}

impl From<Error> for CommandError {
    fn from(err: Error) -> Self {
        match err {
            Error::RegistryFull | Error::InvalidRange | Error::Pin => {
                Self::new(ErrorCode::CommandFailed, "Cmd Failed")
            }
            Error::ResponseOverflow => Self::new(ErrorCode::PayloadTooLarge, "Response too large"),
            Error::PayloadTooLarge => Self::new(ErrorCode::PayloadTooLarge, "Payload too large"),
            Error::UnsupportedMode => Self::invalid_parameter("Unsupported in current mode"),
            Error::InvalidMode(_) => Self::invalid_parameter("Invalid mode"),
            Error::InvalidAddressLength(_) => Self::invalid_parameter("Invalid address length"),
            Error::InvalidClock => Self::invalid_parameter("Invalid clock"),
            Error::Bus => Self::bus("Bus error"),
            Error::Swd(SwdFailure::Wait) => Self::target("SWD WAIT"),
            Error::Swd(SwdFailure::Fault) => Self::target("SWD FAULT"),
            Error::Swd(SwdFailure::NoResponse) => Self::target("SWD no response"),
            Error::Swd(SwdFailure::InvalidAck(_)) => Self::target("SWD invalid ACK"),
            Error::Swd(SwdFailure::Parity) => Self::target("SWD parity error"),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CommandError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for value in 0x01..=0x08u8 {
            let code = ErrorCode::from_u8(value).unwrap();
            assert_eq!(code as u8, value);
        }
        assert_eq!(ErrorCode::from_u8(0x00), None);
        assert_eq!(ErrorCode::from_u8(0x09), None);
    }

    #[test]
    fn test_swd_errors_map_to_target_error() {
        let err: CommandError = Error::Swd(SwdFailure::Fault).into();
        assert_eq!(err.code, ErrorCode::TargetError);
        let err: CommandError = Error::InvalidMode(9).into();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }
}
