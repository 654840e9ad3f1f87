use super::mock::{Reply, Responder};
use crate::command::{Command, StatusCode};
use crate::constants::DEFAULT_RECORDING_INTERVAL_US;
use bytes::{BufMut, Bytes, BytesMut};
use std::f64::consts::PI;
use std::time::Duration;
use tracing::debug;

/// [`Responder`] that behaves like a VeloTrack recorder.
///
/// After a measurement the buffer holds a single smooth run: the encoder
/// count per interval rises to `peak_steps` and falls back to zero.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub recording_interval_us: u16,
    pub boot_delay: Duration,
    pub measurement_duration: Duration,
    pub sample_count: usize,
    pub peak_steps: i16,
    /// Bytes per chunk during a buffer transfer
    pub chunk_size: usize,
    pub chunk_gap: Duration,
    buffer: Bytes,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            recording_interval_us: DEFAULT_RECORDING_INTERVAL_US,
            boot_delay: Duration::from_millis(200),
            measurement_duration: Duration::from_secs(2),
            sample_count: 1000,
            peak_steps: 80,
            chunk_size: 64,
            chunk_gap: Duration::from_millis(5),
            buffer: Bytes::new(),
        }
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recording_interval(mut self, us: u16) -> Self {
        self.recording_interval_us = us;
        self
    }

    pub fn with_measurement_duration(mut self, duration: Duration) -> Self {
        self.measurement_duration = duration;
        self
    }

    pub fn with_sample_count(mut self, count: usize) -> Self {
        self.sample_count = count;
        self
    }

    /// Raw encoder counts of one simulated run
    pub fn profile(&self) -> Vec<i16> {
        let n = self.sample_count.max(1) as f64;
        (0..self.sample_count)
            .map(|i| {
                let phase = PI * (i as f64 + 0.5) / n;
                (f64::from(self.peak_steps) * phase.sin()).round() as i16
            })
            .collect()
    }

    fn record(&mut self) {
        let mut buffer = BytesMut::with_capacity(self.sample_count * 2);
        for steps in self.profile() {
            buffer.put_i16_le(steps);
        }
        self.buffer = buffer.freeze();
    }

    fn transfer(&self) -> Vec<Reply> {
        self.buffer
            .chunks(self.chunk_size.max(1))
            .enumerate()
            .map(|(i, chunk)| Reply::bytes(self.chunk_gap * (i as u32 + 1), Bytes::copy_from_slice(chunk)))
            .collect()
    }
}

impl Responder for SimulatedDevice {
    fn on_open(&mut self) -> Vec<Reply> {
        vec![Reply::bytes(
            self.boot_delay,
            vec![u8::from(StatusCode::ConnectionEstablished)],
        )]
    }

    fn on_write(&mut self, data: &[u8]) -> Vec<Reply> {
        let mut replies = Vec::new();
        for &byte in data {
            match Command::try_from(byte) {
                Ok(Command::StartMeasurement) => {
                    self.record();
                    replies.push(Reply::bytes(
                        self.measurement_duration,
                        vec![u8::from(StatusCode::MeasurementTaken)],
                    ));
                }
                Ok(Command::StopMeasurement) => {}
                Ok(Command::TransferBuffer) => replies.extend(self.transfer()),
                Ok(Command::TransferTimeResolution) => replies.push(Reply::bytes(
                    Duration::from_millis(2),
                    self.recording_interval_us.to_le_bytes().to_vec(),
                )),
                Err(_) => debug!(byte, "Simulated device ignoring unknown command"),
            }
        }
        replies
    }
}
