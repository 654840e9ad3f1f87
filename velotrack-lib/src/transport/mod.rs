//! Byte-oriented, full-duplex links to the recorder.
//!
//! A [`Transport`] hands received bytes out in chunks as they arrive. The
//! protocol engine races [`Transport::read_chunk`] against its timers, so
//! implementations must not lose data when that future is dropped early.

pub mod mock;
pub mod serial;
pub mod simulator;

use crate::error::SerialErrorKind;
use bytes::Bytes;

pub use mock::{MockHandle, MockTransport, Reply, Responder, ScriptedResponder};
pub use serial::{SerialSettings, SerialTransport};
pub use simulator::SimulatedDevice;

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Open the named device for reading and writing.
    fn open(&mut self, port_name: &str) -> Result<(), SerialErrorKind>;

    /// Close the device. Closing a closed transport is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Drive the data-terminal-ready line, which the recorder reads as "host ready".
    fn set_data_terminal_ready(&mut self, level: bool) -> Result<(), SerialErrorKind>;

    /// Drop whatever has been received but not read yet.
    fn discard_input(&mut self) -> Result<(), SerialErrorKind>;

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialErrorKind>;

    /// Wait until at least one byte is available and return everything available.
    ///
    /// Must be cancel-safe.
    async fn read_chunk(&mut self) -> Result<Bytes, SerialErrorKind>;
}
