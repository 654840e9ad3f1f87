use super::Transport;
use crate::constants::{DEFAULT_BAUD_RATE, READ_CHUNK_SIZE};
use crate::error::SerialErrorKind;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Line settings applied every time the port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// [`Transport`] over a system serial port (8N1, no flow control).
///
/// The same instance is reopened on every connect.
#[derive(Default)]
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<SerialStream>,
    port_name: Option<String>,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            port_name: None,
        }
    }

    pub fn settings(&self) -> SerialSettings {
        self.settings
    }

    /// Name of the currently open port
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream, SerialErrorKind> {
        self.port.as_mut().ok_or(SerialErrorKind::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, port_name: &str) -> Result<(), SerialErrorKind> {
        if self.port.is_some() {
            return Err(SerialErrorKind::AlreadyOpen);
        }

        let port = tokio_serial::new(port_name, self.settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                warn!(port = port_name, error = %e, "Failed to open serial port");
                SerialErrorKind::from(&e)
            })?;

        info!(port = port_name, baud = self.settings.baud_rate, "Serial port opened");
        self.port = Some(port);
        self.port_name = Some(port_name.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = self.port_name.as_deref().unwrap_or_default(), "Serial port closed");
        }
        self.port_name = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<(), SerialErrorKind> {
        self.port_mut()?
            .write_data_terminal_ready(level)
            .map_err(SerialErrorKind::from)
    }

    fn discard_input(&mut self) -> Result<(), SerialErrorKind> {
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(SerialErrorKind::from)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialErrorKind> {
        let port = self.port_mut()?;
        debug!(bytes = hex::encode(data), "Serial Write");
        port.write_all(data)
            .await
            .map_err(|e| SerialErrorKind::from_write_error(&e))?;
        port.flush().await.map_err(|e| SerialErrorKind::from_write_error(&e))
    }

    async fn read_chunk(&mut self) -> Result<Bytes, SerialErrorKind> {
        let port = self.port_mut()?;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
        match port.read_buf(&mut buffer).await {
            Ok(0) => Err(SerialErrorKind::ResourceUnavailable),
            Ok(_) => {
                debug!(bytes = hex::encode(&buffer), "Serial Read");
                Ok(buffer.freeze())
            }
            Err(e) => Err(SerialErrorKind::from_read_error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let transport = SerialTransport::default();
        assert_eq!(transport.settings().baud_rate, 9600);
        assert!(!transport.is_open());
        assert_eq!(transport.port_name(), None);
    }

    #[tokio::test]
    async fn closed_port_reports_not_open() {
        let mut transport = SerialTransport::new(SerialSettings { baud_rate: 115_200 });
        assert_eq!(transport.write(&[0]).await, Err(SerialErrorKind::NotOpen));
        assert_eq!(transport.read_chunk().await, Err(SerialErrorKind::NotOpen));
        assert_eq!(transport.set_data_terminal_ready(true), Err(SerialErrorKind::NotOpen));
        assert_eq!(transport.discard_input(), Err(SerialErrorKind::NotOpen));
        transport.close();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn missing_device_fails_to_open() {
        let mut transport = SerialTransport::default();
        let result = transport.open("/dev/velotrack-does-not-exist");
        assert!(result.is_err());
        assert!(!transport.is_open());
    }
}
