use crate::error::{SerialErrorKind, VTError};
use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::debug;

/// A serial port the recorder may be attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Human-readable description of a port, `None` when the system has none.
pub fn describe(port_type: &SerialPortType) -> Option<String> {
    match port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .as_deref()
            .or(usb.manufacturer.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        SerialPortType::BluetoothPort => Some("Bluetooth serial port".to_string()),
        SerialPortType::PciPort => Some("PCI serial port".to_string()),
        SerialPortType::Unknown => None,
    }
}

/// Keep only ports that carry a description, in system order.
pub fn candidate_ports(ports: Vec<SerialPortInfo>) -> Vec<PortInfo> {
    ports
        .into_iter()
        .filter_map(|port| match describe(&port.port_type) {
            Some(description) => Some(PortInfo {
                name: port.port_name,
                description,
            }),
            None => {
                debug!(port = %port.port_name, "Skipping port without description");
                None
            }
        })
        .collect()
}

/// List the serial ports worth offering to the user.
pub fn available_ports() -> Result<Vec<PortInfo>, VTError> {
    let ports = tokio_serial::available_ports().map_err(SerialErrorKind::from)?;
    Ok(candidate_ports(ports))
}
