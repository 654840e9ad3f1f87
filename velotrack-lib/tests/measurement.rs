//! Measurement runs, buffer downloads and sample delivery

mod common;

use common::*;
use std::io;
use std::path::PathBuf;
use velotrack_lib::TextFileSink;
use velotrack_lib::transport::Responder;

// Encoder counts +1 and -1
const TWO_SAMPLES: [u8; 4] = [0x01, 0x00, 0xFF, 0xFF];

fn measuring_device() -> ScriptedResponder {
    handshake_script()
        .on_command(
            Command::StartMeasurement,
            vec![Reply::bytes(Duration::from_secs(1), vec![0xCF])],
        )
        .on_command(
            Command::TransferBuffer,
            vec![Reply::bytes(Duration::from_millis(10), TWO_SAMPLES.to_vec())],
        )
}

struct FailingSink;

impl SampleSink for FailingSink {
    fn accept(&mut self, _samples: &[f64], _sample_interval_secs: f64) -> Result<(), VTError> {
        Err(VTError::Persist {
            path: PathBuf::from("/full/run.txt"),
            source: io::Error::other("disk full"),
        })
    }
}

/// Sends a different buffer on every transfer request
struct GrowingBuffer {
    transfers: usize,
}

impl Responder for GrowingBuffer {
    fn on_open(&mut self) -> Vec<Reply> {
        vec![Reply::now(vec![0xCE])]
    }

    fn on_write(&mut self, data: &[u8]) -> Vec<Reply> {
        match Command::try_from(data[0]) {
            Ok(Command::TransferTimeResolution) => vec![Reply::now(vec![0xE8, 0x03])],
            Ok(Command::TransferBuffer) => {
                self.transfers += 1;
                let buffer: Vec<u8> = (0..self.transfers as i16).flat_map(|i| (i + 1).to_le_bytes()).collect();
                vec![Reply::now(buffer)]
            }
            _ => Vec::new(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn measurement_downloads_automatically() {
    let (mut device, handle) = connected(measuring_device()).await;
    let sink = CollectingSink::default();
    device.add_sink(sink.clone());
    let started = Instant::now();

    let report = device.start_measurement().await.unwrap().expect("auto download is on");

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(handle.written(), vec![3, 0, 2]);
    assert_eq!(report.sample_count, 2);
    assert!(report.sink_failures.is_empty());
    assert_eq!(device.raw_buffer().as_ref(), &TWO_SAMPLES);

    let samples = device.samples();
    assert_eq!(samples.len(), 2);
    assert_close(samples[0], 0.03725);
    assert_close(samples[1], -0.03725);

    let received = sink.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, samples);
    assert_close(received[0].1, 0.002);
}

#[tokio::test(start_paused = true)]
async fn measurement_without_auto_download() {
    let (mut device, handle) = connected(measuring_device()).await;
    device.set_auto_download(false);

    assert!(device.start_measurement().await.unwrap().is_none());
    assert_eq!(handle.written(), vec![3, 0]);
    assert!(device.samples().is_empty());

    let report = device.download_buffer().await.unwrap();
    assert_eq!(report.sample_count, 2);
    assert_eq!(handle.written(), vec![3, 0, 2]);
}

#[tokio::test(start_paused = true)]
async fn unexpected_confirmation_keeps_connection() {
    let script = handshake_script().on_command(Command::StartMeasurement, vec![Reply::now(vec![0xCE])]);
    let (mut device, handle) = connected(script).await;

    let result = device.start_measurement().await;

    assert!(matches!(result, Err(VTError::MeasurementNotConfirmed { actual: 0xCE })));
    assert!(device.is_connected());
    assert!(handle.is_open());
    assert_eq!(handle.written(), vec![3, 0]);
}

#[tokio::test(start_paused = true)]
async fn stale_bytes_are_flushed_before_start() {
    let (mut device, handle) = connected(measuring_device()).await;
    device.set_auto_download(false);

    handle.inject(vec![Reply::now(vec![0x42, 0x43])]);
    let result = device.start_measurement().await;

    assert!(matches!(result, Ok(None)));
    assert_eq!(handle.discarded(), 1);
}

#[tokio::test(start_paused = true)]
async fn configured_measurement_timeout() {
    let config = DeviceConfig::default().with_measurement_timeout(Some(Duration::from_secs(2)));
    let (mut device, handle) = engine_with_config(handshake_script(), config);
    device.connect(PORT).await.unwrap();

    let result = device.start_measurement().await;

    assert!(matches!(result, Err(VTError::MeasurementTimeout(t)) if t == Duration::from_secs(2)));
    assert!(device.is_connected());
    assert_eq!(handle.written(), vec![3, 0]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_measurement_can_still_be_downloaded() {
    let script = handshake_script()
        .on_command(
            Command::StartMeasurement,
            vec![Reply::bytes(Duration::from_secs(5), vec![0xCF])],
        )
        .on_command(
            Command::TransferBuffer,
            vec![Reply::bytes(Duration::from_millis(10), TWO_SAMPLES.to_vec())],
        );
    let (mut device, handle) = connected(script).await;

    let attempt = tokio::time::timeout(Duration::from_secs(1), device.start_measurement()).await;
    assert!(attempt.is_err());
    assert!(device.is_connected());

    device.stop_measurement().await.unwrap();
    let report = device.download_buffer().await.unwrap();

    assert_eq!(report.sample_count, 2);
    assert_eq!(handle.written(), vec![3, 0, 1, 2]);
    assert_close(device.samples()[0], 0.03725);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_does_not_lose_samples() {
    let (mut device, _handle) = connected(measuring_device()).await;
    let collector = CollectingSink::default();
    device.add_sink(FailingSink);
    device.add_sink(collector.clone());

    let report = device.start_measurement().await.unwrap().unwrap();

    assert_eq!(report.sink_failures.len(), 1);
    assert!(matches!(report.sink_failures[0], VTError::Persist { .. }));
    assert_eq!(device.samples().len(), 2);
    assert_eq!(collector.received().len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.txt");
    device.save_samples(&path).unwrap();
    let saved: Vec<f64> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect();
    assert_eq!(saved, device.samples());
}

#[tokio::test(start_paused = true)]
async fn file_sink_saves_each_download() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auto.txt");
    let (mut device, _handle) = connected(measuring_device()).await;
    device.add_sink(TextFileSink::new(&path));

    device.start_measurement().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.lines().nth(1).unwrap().starts_with('-'));
}

#[tokio::test(start_paused = true)]
async fn unwritable_save_path_is_reported() {
    let (mut device, _handle) = connected(measuring_device()).await;
    device.start_measurement().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("run.txt");
    let result = device.save_samples(&path);

    assert!(matches!(result, Err(VTError::Persist { path: ref p, .. }) if *p == path));
    assert_eq!(device.samples().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn each_download_replaces_the_last() {
    init_tracing();
    let transport = MockTransport::new(GrowingBuffer { transfers: 0 });
    let mut device = VeloTrack::new(transport, DeviceConfig::default());
    device.connect(PORT).await.unwrap();

    device.download_buffer().await.unwrap();
    assert_eq!(device.samples().len(), 1);

    device.download_buffer().await.unwrap();
    assert_eq!(device.samples().len(), 2);
    assert_eq!(device.raw_buffer().len(), 4);
    // 2 counts at 1000 µs
    assert_close(device.samples()[1], 0.149);
}

#[tokio::test(start_paused = true)]
async fn empty_download_clears_samples() {
    let script = measuring_device();
    let (mut device, _handle) = connected(script).await;
    device.start_measurement().await.unwrap();
    assert_eq!(device.samples().len(), 2);

    device.clear();
    assert!(device.samples().is_empty());
    assert!(device.raw_buffer().is_empty());

    // A silent buffer transfer yields no samples rather than an error
    let (mut silent, _handle) = connected(handshake_script()).await;
    let report = silent.download_buffer().await.unwrap();
    assert_eq!(report.sample_count, 0);
    assert!(silent.samples().is_empty());
}

#[tokio::test(start_paused = true)]
async fn simulated_recorder_end_to_end() {
    init_tracing();
    let simulator = SimulatedDevice::new().with_recording_interval(1000).with_sample_count(200);
    let expected = simulator.profile();
    let transport = MockTransport::new(simulator);
    let handle = transport.handle();
    let mut device = VeloTrack::new(transport, DeviceConfig::default());
    let sink = CollectingSink::default();
    device.add_sink(sink.clone());

    device.connect(PORT).await.unwrap();
    assert_eq!(device.recording_interval_us(), 1000);

    let report = device.start_measurement().await.unwrap().unwrap();

    assert_eq!(report.sample_count, 200);
    assert_eq!(device.raw_buffer().len(), 400);
    assert_eq!(handle.written(), vec![3, 0, 2]);
    for (speed, steps) in device.samples().iter().zip(&expected) {
        assert_close(*speed, f64::from(*steps) * 7.45e-5 * 1e6 / 1000.0);
    }
    assert_eq!(sink.received().len(), 1);
    assert_close(sink.received()[0].1, 0.001);

    device.disconnect();
    assert!(!handle.is_open());
}

#[tokio::test(start_paused = true)]
async fn late_confirmation_after_cancel_is_not_decoded() {
    let script = handshake_script()
        .on_command(
            Command::StartMeasurement,
            vec![Reply::bytes(Duration::from_millis(1500), vec![0xCF])],
        )
        .on_command(
            Command::TransferBuffer,
            vec![Reply::bytes(Duration::from_millis(10), vec![0x01, 0x00, 0x02, 0x00])],
        );
    let (mut device, _handle) = connected(script).await;

    let attempt = tokio::time::timeout(Duration::from_secs(1), device.start_measurement()).await;
    assert!(attempt.is_err());
    // The confirmation shows up while nobody is reading
    tokio::time::sleep(Duration::from_secs(1)).await;

    device.download_buffer().await.unwrap();

    assert_eq!(device.raw_buffer().as_ref(), &[0x01, 0x00, 0x02, 0x00]);
    assert_eq!(device.samples().len(), 2);
    assert_close(device.samples()[0], 0.03725);
    assert_close(device.samples()[1], 0.0745);
}

#[tokio::test(start_paused = true)]
async fn device_lost_during_measurement_disconnects() {
    let script = handshake_script().on_command(
        Command::StartMeasurement,
        vec![Reply::error(Duration::from_secs(3), SerialErrorKind::ResourceUnavailable)],
    );
    let (mut device, handle) = connected(script).await;

    let result = device.start_measurement().await;

    assert_eq!(result.unwrap_err().serial_kind(), Some(SerialErrorKind::ResourceUnavailable));
    assert_eq!(device.state(), ConnectionState::Disconnected);
    assert!(!handle.is_open());
    assert!(device.samples().is_empty());
}
