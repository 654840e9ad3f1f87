use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

/// Single-byte request sent from the host to the recorder.
///
/// The wire value is the ordinal of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    #[strum(to_string = "start measurement")]
    StartMeasurement = 0,
    #[strum(to_string = "stop measurement")]
    StopMeasurement = 1,
    #[strum(to_string = "transfer buffer")]
    TransferBuffer = 2,
    #[strum(to_string = "transfer time resolution")]
    TransferTimeResolution = 3,
}

/// Status byte emitted by the recorder to signal a device-level event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StatusCode {
    #[strum(to_string = "connection established")]
    ConnectionEstablished = 0xCE,
    #[strum(to_string = "measurement taken")]
    MeasurementTaken = 0xCF,
}

impl StatusCode {
    /// Check whether a received byte is this status code
    pub fn matches(self, byte: u8) -> bool {
        u8::from(self) == byte
    }
}

/// Lifecycle of the connection owned by [`crate::VeloTrack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    #[strum(to_string = "Connecting ...")]
    Connecting,
    Connected,
}
