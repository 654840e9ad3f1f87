use crate::command::ConnectionState;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Line-level failures reported by a [`crate::transport::Transport`].
///
/// The numeric codes are stable and index [`DESCRIPTIONS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerialErrorKind {
    NoError = 0,
    DeviceNotFound = 1,
    /// Opened elsewhere, or the user lacks permission
    PermissionDenied = 2,
    /// Opened already by this transport
    AlreadyOpen = 3,
    Parity = 4,
    Framing = 5,
    BreakCondition = 6,
    WriteIo = 7,
    ReadIo = 8,
    /// The device went away (unplugged, port closed underneath us)
    ResourceUnavailable = 9,
    UnsupportedOperation = 10,
    Unidentified = 11,
    Timeout = 12,
    NotOpen = 13,
}

const DESCRIPTIONS: [&str; 14] = [
    "No error.",
    "The serial device does not exist.",
    "The serial device is in use by another process, or permission to open it was denied.",
    "The serial device is already open.",
    "The hardware detected a parity error while reading.",
    "The hardware detected a framing error while reading.",
    "The hardware detected a break condition on the input line.",
    "An I/O error occurred while writing to the device.",
    "An I/O error occurred while reading from the device.",
    "The serial device became unavailable, e.g. it was unplugged.",
    "The operating system does not support or forbids the requested operation.",
    "An unidentified serial port error occurred.",
    "The serial operation timed out.",
    "The operation requires an open serial device.",
];

const KINDS: [SerialErrorKind; 14] = [
    SerialErrorKind::NoError,
    SerialErrorKind::DeviceNotFound,
    SerialErrorKind::PermissionDenied,
    SerialErrorKind::AlreadyOpen,
    SerialErrorKind::Parity,
    SerialErrorKind::Framing,
    SerialErrorKind::BreakCondition,
    SerialErrorKind::WriteIo,
    SerialErrorKind::ReadIo,
    SerialErrorKind::ResourceUnavailable,
    SerialErrorKind::UnsupportedOperation,
    SerialErrorKind::Unidentified,
    SerialErrorKind::Timeout,
    SerialErrorKind::NotOpen,
];

impl SerialErrorKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        KINDS.get(usize::from(code)).copied()
    }

    /// User-facing description of the condition
    pub fn description(self) -> &'static str {
        DESCRIPTIONS[usize::from(self.code())]
    }

    /// Whether the connection cannot be used any more after this error
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ResourceUnavailable | Self::NotOpen)
    }

    /// Classify an I/O error raised while reading
    pub fn from_read_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => {
                Self::ResourceUnavailable
            }
            _ => Self::ReadIo,
        }
    }

    /// Classify an I/O error raised while writing
    pub fn from_write_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => Self::ResourceUnavailable,
            _ => Self::WriteIo,
        }
    }

    fn from_open_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::DeviceNotFound,
            io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy => Self::PermissionDenied,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::Unsupported => Self::UnsupportedOperation,
            _ => Self::Unidentified,
        }
    }
}

impl fmt::Display for SerialErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for SerialErrorKind {}

impl From<&tokio_serial::Error> for SerialErrorKind {
    fn from(err: &tokio_serial::Error) -> Self {
        match err.kind {
            tokio_serial::ErrorKind::NoDevice => Self::DeviceNotFound,
            tokio_serial::ErrorKind::InvalidInput => Self::UnsupportedOperation,
            tokio_serial::ErrorKind::Unknown => Self::Unidentified,
            tokio_serial::ErrorKind::Io(kind) => Self::from_open_io(kind),
        }
    }
}

impl From<tokio_serial::Error> for SerialErrorKind {
    fn from(err: tokio_serial::Error) -> Self {
        Self::from(&err)
    }
}

/// The primary error type for the `velotrack-lib` library.
#[derive(Error, Debug)]
pub enum VTError {
    #[error("Serial port error: {0}")]
    Serial(#[from] SerialErrorKind),

    #[error("No serial port selected")]
    NoPortSelected,

    #[error("Cannot connect while {0}")]
    AlreadyConnected(ConnectionState),

    #[error("No connection. Connect to the device first.")]
    NotConnected,

    #[error("Device did not confirm the connection within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Unexpected handshake byte {actual:#04x}")]
    HandshakeMismatch { actual: u8 },

    #[error("Invalid time resolution reply: {0}")]
    InvalidTimeResolution(String),

    #[error("Could not confirm successful measurement (got {actual:#04x})")]
    MeasurementNotConfirmed { actual: u8 },

    #[error("Measurement was not confirmed within {0:?}")]
    MeasurementTimeout(Duration),

    #[error("Unable to write samples to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VTError {
    /// Failures that abort a connection attempt during the handshake
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            VTError::HandshakeTimeout(_) | VTError::HandshakeMismatch { .. } | VTError::InvalidTimeResolution(_)
        )
    }

    /// The serial condition behind this error, if any
    pub fn serial_kind(&self) -> Option<SerialErrorKind> {
        match self {
            VTError::Serial(kind) => Some(*kind),
            _ => None,
        }
    }
}
