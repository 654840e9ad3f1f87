//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use std::time::Duration;
#[allow(unused_imports)]
pub use tokio::time::Instant;
#[allow(unused_imports)]
pub use velotrack_lib::transport::{MockHandle, MockTransport, Reply, ScriptedResponder};
#[allow(unused_imports)]
pub use velotrack_lib::{
    Command, ConnectionState, DeviceConfig, SampleSink, SerialErrorKind, SimulatedDevice, VTError, VeloTrack,
};

use std::sync::{Arc, Mutex};

pub const PORT: &str = "/dev/ttyVELO0";

/// Handshake byte followed by a 2000 µs time resolution
#[allow(dead_code)]
pub fn handshake_script() -> ScriptedResponder {
    handshake_with_interval([0xD0, 0x07])
}

#[allow(dead_code)]
pub fn handshake_with_interval(reply: [u8; 2]) -> ScriptedResponder {
    ScriptedResponder::new()
        .on_open(vec![Reply::bytes(Duration::from_millis(100), vec![0xCE])])
        .on_command(
            Command::TransferTimeResolution,
            vec![Reply::bytes(Duration::from_millis(3), reply.to_vec())],
        )
}

#[allow(dead_code)]
pub fn engine(responder: ScriptedResponder) -> (VeloTrack<MockTransport>, MockHandle) {
    engine_with_config(responder, DeviceConfig::default())
}

#[allow(dead_code)]
pub fn engine_with_config(responder: ScriptedResponder, config: DeviceConfig) -> (VeloTrack<MockTransport>, MockHandle) {
    init_tracing();
    let transport = MockTransport::new(responder);
    let handle = transport.handle();
    (VeloTrack::new(transport, config), handle)
}

/// Engine that has completed the handshake
#[allow(dead_code)]
pub async fn connected(responder: ScriptedResponder) -> (VeloTrack<MockTransport>, MockHandle) {
    let (mut device, handle) = engine(responder);
    device.connect(PORT).await.expect("handshake should succeed");
    (device, handle)
}

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sink that remembers everything it was handed
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CollectingSink {
    received: Arc<Mutex<Vec<(Vec<f64>, f64)>>>,
}

#[allow(dead_code)]
impl CollectingSink {
    pub fn received(&self) -> Vec<(Vec<f64>, f64)> {
        self.received.lock().unwrap().clone()
    }
}

impl SampleSink for CollectingSink {
    fn accept(&mut self, samples: &[f64], sample_interval_secs: f64) -> Result<(), VTError> {
        self.received
            .lock()
            .unwrap()
            .push((samples.to_vec(), sample_interval_secs));
        Ok(())
    }
}

#[allow(dead_code)]
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
