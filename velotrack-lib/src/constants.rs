// Protocol constants for the VeloTrack recorder

use std::time::Duration;

/// Size of one raw sample in the downloaded buffer (signed 16-bit, little-endian)
pub const SAMPLE_SIZE: usize = 2;

/// Size of the time-resolution reply (unsigned 16-bit, little-endian)
pub const TIME_RESOLUTION_SIZE: usize = 2;

/// Distance travelled per encoder step, in meters
pub const METERS_PER_STEP: f64 = 7.45e-5;

/// Microseconds per second
pub const MICROS_PER_SECOND: f64 = 1e6;

/// Recording interval assumed until the device reports its own (µs)
pub const DEFAULT_RECORDING_INTERVAL_US: u16 = 2000;

/// Absolute deadline for the connection-established byte after opening the port
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle timeout for the time-resolution reply
pub const TIME_RESOLUTION_TIMEOUT: Duration = Duration::from_millis(500);

/// Idle timeout for the buffer download
pub const DOWNLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Baud rate used when none is configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read buffer size for a single transport chunk
pub const READ_CHUNK_SIZE: usize = 4096;
