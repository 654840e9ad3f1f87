use crate::command::{Command, ConnectionState, StatusCode};
use crate::config::DeviceConfig;
use crate::constants::{DEFAULT_RECORDING_INTERVAL_US, MICROS_PER_SECOND};
use crate::decoder::{decode, parse_recording_interval};
use crate::error::{SerialErrorKind, VTError};
use crate::sink::{SampleSink, save_to_file};
use crate::transport::{SerialSettings, SerialTransport, Transport};
use bytes::{Buf, Bytes, BytesMut};
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Result of a buffer download.
#[derive(Debug)]
pub struct DownloadReport {
    pub sample_count: usize,
    /// Sinks that rejected the new samples; the samples stay in memory regardless
    pub sink_failures: Vec<VTError>,
}

/// Protocol engine for a VeloTrack recorder.
///
/// Owns one transport for its whole lifetime and reopens it on every
/// connect. Every operation takes `&mut self`, so at most one exchange is
/// in flight. Dropping an operation's future cancels it; an abandoned
/// handshake is cleaned up by the next [`VeloTrack::connect`].
pub struct VeloTrack<T: Transport = SerialTransport> {
    transport: T,
    config: DeviceConfig,
    state: ConnectionState,
    port_name: Option<String>,
    recording_interval_us: u16,
    inbox: BytesMut,
    raw: Bytes,
    samples: Vec<f64>,
    sinks: Vec<Box<dyn SampleSink + Send>>,
}

impl VeloTrack<SerialTransport> {
    /// Engine over a system serial port
    pub fn serial(settings: SerialSettings, config: DeviceConfig) -> Self {
        Self::new(SerialTransport::new(settings), config)
    }
}

impl<T: Transport> VeloTrack<T> {
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            port_name: None,
            recording_interval_us: DEFAULT_RECORDING_INTERVAL_US,
            inbox: BytesMut::new(),
            raw: Bytes::new(),
            samples: Vec::new(),
            sinks: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Microseconds between samples, as last reported by the device
    pub fn recording_interval_us(&self) -> u16 {
        self.recording_interval_us
    }

    pub fn sample_interval_secs(&self) -> f64 {
        f64::from(self.recording_interval_us) / MICROS_PER_SECOND
    }

    /// Calibrated speeds (m/s) of the last download, in acquisition order
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn raw_buffer(&self) -> &Bytes {
        &self.raw
    }

    pub fn set_auto_download(&mut self, enabled: bool) {
        self.config.auto_download = enabled;
    }

    /// Register a consumer for every future download
    pub fn add_sink(&mut self, sink: impl SampleSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    /// Open `port_name`, wait for the device to announce itself and read its time resolution.
    pub async fn connect(&mut self, port_name: &str) -> Result<(), VTError> {
        if port_name.is_empty() {
            return Err(VTError::NoPortSelected);
        }
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => {
                warn!("Previous connection attempt was abandoned, resetting");
                self.disconnect();
            }
            ConnectionState::Connected => return Err(VTError::AlreadyConnected(self.state)),
        }

        info!(port = port_name, "Opening serial port...");
        self.transport.open(port_name)?;
        if let Err(kind) = self.transport.set_data_terminal_ready(true) {
            warn!(error = %kind, "Could not assert DTR");
        }
        self.port_name = Some(port_name.to_string());
        self.state = ConnectionState::Connecting;
        info!("--- Waiting for Device Handshake ---");

        match self.handshake().await {
            Ok(interval) => {
                self.recording_interval_us = interval;
                self.state = ConnectionState::Connected;
                info!(port = port_name, recording_interval_us = interval, "Connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Connection error");
                self.disconnect();
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<u16, VTError> {
        let limit = self.config.handshake_timeout;
        let status = match self.wait_for_status(Some(limit)).await {
            Ok(Some(status)) => status,
            Ok(None) => return Err(VTError::HandshakeTimeout(limit)),
            Err(e) => return Err(e),
        };
        if !StatusCode::ConnectionEstablished.matches(status) {
            return Err(VTError::HandshakeMismatch { actual: status });
        }

        let reply = self
            .send_command(Command::TransferTimeResolution, Some(self.config.time_resolution_timeout))
            .await?;
        parse_recording_interval(&reply)
    }

    /// Close the port. Always ends in `Disconnected`.
    pub fn disconnect(&mut self) {
        self.transport.close();
        self.inbox.clear();
        if self.state != ConnectionState::Disconnected {
            info!(port = self.port_name.as_deref().unwrap_or_default(), "Disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.port_name = None;
    }

    /// Write a single command byte and collect the reply.
    ///
    /// The reply is complete once nothing has arrived for `idle_timeout`
    /// (measured from the write, restarted by every arrival); it may be empty.
    /// With `None` the reply is whatever the first arrival delivers.
    pub async fn send_command(&mut self, command: Command, idle_timeout: Option<Duration>) -> Result<Bytes, VTError> {
        self.write_command(command).await?;

        let mut reply = BytesMut::new();
        match idle_timeout {
            Some(idle) => loop {
                match timeout(idle, self.transport.read_chunk()).await {
                    Ok(Ok(chunk)) => reply.extend_from_slice(&chunk),
                    Ok(Err(kind)) => return Err(self.transport_failure(kind)),
                    Err(_) => break,
                }
            },
            None => match self.transport.read_chunk().await {
                Ok(chunk) => reply.extend_from_slice(&chunk),
                Err(kind) => return Err(self.transport_failure(kind)),
            },
        }

        debug!(?command, bytes = reply.len(), "Command complete");
        Ok(reply.freeze())
    }

    /// Ask the device to record, wait for it to confirm, and download if enabled.
    ///
    /// Without a configured measurement timeout this waits for as long as the
    /// measurement takes.
    pub async fn start_measurement(&mut self) -> Result<Option<DownloadReport>, VTError> {
        self.ensure_connected()?;

        self.write_command(Command::StartMeasurement).await?;
        info!("Running measurement, please wait...");

        let status = match self.wait_for_status(self.config.measurement_timeout).await? {
            Some(status) => status,
            None => {
                let limit = self.config.measurement_timeout.unwrap_or_default();
                warn!(?limit, "Measurement confirmation timed out");
                return Err(VTError::MeasurementTimeout(limit));
            }
        };
        if !StatusCode::MeasurementTaken.matches(status) {
            warn!(status = format_args!("{status:#04x}"), "Could not confirm successful measurement");
            return Err(VTError::MeasurementNotConfirmed { actual: status });
        }

        info!("Measurement finished");
        if self.config.auto_download {
            self.download_buffer().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Tell the device to abort a running measurement. No reply is expected.
    pub async fn stop_measurement(&mut self) -> Result<(), VTError> {
        self.ensure_connected()?;
        self.write_command(Command::StopMeasurement).await
    }

    /// Fetch the device buffer, decode it and hand it to every sink.
    pub async fn download_buffer(&mut self) -> Result<DownloadReport, VTError> {
        self.ensure_connected()?;

        info!("Downloading data, please wait...");
        let raw = self
            .send_command(Command::TransferBuffer, Some(self.config.download_idle_timeout))
            .await?;
        let samples = decode(&raw, self.recording_interval_us);
        info!(bytes = raw.len(), samples = samples.len(), "Download finished");

        self.raw = raw;
        self.samples = samples;

        let interval = self.sample_interval_secs();
        let mut sink_failures = Vec::new();
        for sink in &mut self.sinks {
            if let Err(e) = sink.accept(&self.samples, interval) {
                error!(error = %e, "Sample sink failed");
                sink_failures.push(e);
            }
        }

        Ok(DownloadReport {
            sample_count: self.samples.len(),
            sink_failures,
        })
    }

    /// Forget the raw buffer and samples.
    pub fn clear(&mut self) {
        self.raw = Bytes::new();
        self.samples = Vec::new();
        info!("Cleared");
    }

    /// Save the current samples as text. A failure leaves them in memory.
    pub fn save_samples(&self, path: &Path) -> Result<(), VTError> {
        save_to_file(path, &self.samples)
    }

    fn ensure_connected(&self) -> Result<(), VTError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(VTError::NotConnected)
        }
    }

    async fn write_command(&mut self, command: Command) -> Result<(), VTError> {
        if !self.transport.is_open() {
            return Err(SerialErrorKind::NotOpen.into());
        }
        // A reply holds only what arrives after the write
        if !self.inbox.is_empty() {
            debug!(bytes = hex::encode(&self.inbox), "Dropping unread bytes");
            self.inbox.clear();
        }
        if let Err(kind) = self.transport.discard_input() {
            return Err(self.transport_failure(kind));
        }

        debug!(?command, "Sending command");
        if let Err(kind) = self.transport.write(&[u8::from(command)]).await {
            return Err(self.transport_failure(kind));
        }
        Ok(())
    }

    /// Next status byte, or `None` when `limit` expires first.
    async fn wait_for_status(&mut self, limit: Option<Duration>) -> Result<Option<u8>, VTError> {
        if self.inbox.is_empty() {
            let received = match limit {
                Some(limit) => match timeout(limit, self.transport.read_chunk()).await {
                    Ok(received) => received,
                    Err(_) => return Ok(None),
                },
                None => self.transport.read_chunk().await,
            };
            match received {
                Ok(chunk) => self.inbox.extend_from_slice(&chunk),
                Err(kind) => return Err(self.transport_failure(kind)),
            }
        }

        if !self.inbox.has_remaining() {
            return Ok(None);
        }
        let status = self.inbox.get_u8();
        debug!(status = format_args!("{status:#04x}"), "Status byte");
        Ok(Some(status))
    }

    fn transport_failure(&mut self, kind: SerialErrorKind) -> VTError {
        error!(code = kind.code(), error = %kind, "Serial port error");
        if kind.is_fatal() && self.state != ConnectionState::Disconnected {
            self.disconnect();
        }
        kind.into()
    }
}
