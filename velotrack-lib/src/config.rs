use crate::constants::{DOWNLOAD_IDLE_TIMEOUT, HANDSHAKE_TIMEOUT, TIME_RESOLUTION_TIMEOUT};
use std::time::Duration;

/// Timing and behaviour of the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Absolute deadline for the connection-established byte
    pub handshake_timeout: Duration,
    /// Idle timeout for the time-resolution reply
    pub time_resolution_timeout: Duration,
    /// Idle timeout for the buffer download
    pub download_idle_timeout: Duration,
    /// Deadline for the measurement confirmation; `None` waits for as long as
    /// the physical measurement takes
    pub measurement_timeout: Option<Duration>,
    /// Download the buffer as soon as a measurement is confirmed
    pub auto_download: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            time_resolution_timeout: TIME_RESOLUTION_TIMEOUT,
            download_idle_timeout: DOWNLOAD_IDLE_TIMEOUT,
            measurement_timeout: None,
            auto_download: true,
        }
    }
}

impl DeviceConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_measurement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.measurement_timeout = timeout;
        self
    }

    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.auto_download = enabled;
        self
    }
}
