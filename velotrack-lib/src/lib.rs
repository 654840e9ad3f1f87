pub mod command;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod device;
pub mod error;
pub mod ports;
pub mod sink;
pub mod transport;

// Re-export the main types for easy access
pub use command::{Command, ConnectionState, StatusCode};
pub use config::DeviceConfig;
pub use decoder::{decode, parse_recording_interval, time_axis};
pub use device::{DownloadReport, VeloTrack};
pub use error::{SerialErrorKind, VTError};
pub use ports::{PortInfo, available_ports};
pub use sink::{SampleSink, TextFileSink};
pub use transport::{MockTransport, SerialSettings, SerialTransport, SimulatedDevice, Transport};
