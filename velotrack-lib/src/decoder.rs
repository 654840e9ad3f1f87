//! Conversion of downloaded buffers into calibrated velocities.
//!
//! The recorder stores one signed 16-bit little-endian encoder count per
//! recording interval. Each count is turned into a speed in m/s assuming the
//! steps were taken within one interval.

use crate::constants::{METERS_PER_STEP, MICROS_PER_SECOND, SAMPLE_SIZE, TIME_RESOLUTION_SIZE};
use crate::error::VTError;
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{I16, U16};

/// Decode a raw buffer into speeds (m/s), one per complete 2-byte sample.
///
/// A trailing odd byte is ignored. `recording_interval_us` must be non-zero.
pub fn decode(raw: &[u8], recording_interval_us: u16) -> Vec<f64> {
    debug_assert!(recording_interval_us > 0, "recording interval must be non-zero");
    let count = raw.len() / SAMPLE_SIZE;
    let steps = match <[I16]>::ref_from_prefix_with_elems(raw, count) {
        Ok((steps, _)) => steps,
        Err(_) => return Vec::new(),
    };

    let interval = f64::from(recording_interval_us);
    steps
        .iter()
        .map(|step| f64::from(step.get()) * METERS_PER_STEP * MICROS_PER_SECOND / interval)
        .collect()
}

/// Parse the reply to a time-resolution request.
pub fn parse_recording_interval(reply: &[u8]) -> Result<u16, VTError> {
    let (interval, _) = U16::read_from_prefix(reply).map_err(|_| {
        VTError::InvalidTimeResolution(format!(
            "expected {} bytes, got {}",
            TIME_RESOLUTION_SIZE,
            reply.len()
        ))
    })?;

    match interval.get() {
        0 => Err(VTError::InvalidTimeResolution("recording interval is zero".to_string())),
        us => Ok(us),
    }
}

/// Elapsed time in seconds of each sample, the first one ending after one interval.
pub fn time_axis(len: usize, recording_interval_us: u16) -> Vec<f64> {
    let interval = f64::from(recording_interval_us);
    (1..=len).map(|i| i as f64 * interval / MICROS_PER_SECOND).collect()
}

/// Smallest and largest value of a sample sequence, `None` when empty.
pub fn value_range(samples: &[f64]) -> Option<(f64, f64)> {
    samples.iter().fold(None, |range, &v| match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
