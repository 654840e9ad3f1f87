//! Consumers of decoded sample sequences.

use crate::error::VTError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives every freshly downloaded sample sequence.
///
/// Implementations must accept empty and all-zero sequences.
pub trait SampleSink {
    fn accept(&mut self, samples: &[f64], sample_interval_secs: f64) -> Result<(), VTError>;
}

/// Write one value per line, no header.
pub fn write_samples<W: Write>(mut writer: W, samples: &[f64]) -> std::io::Result<()> {
    for value in samples {
        writeln!(writer, "{value}")?;
    }
    writer.flush()
}

/// Write samples to `path`, replacing any existing file.
pub fn save_to_file(path: &Path, samples: &[f64]) -> Result<(), VTError> {
    let persist_error = |source| VTError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(persist_error)?;
    write_samples(BufWriter::new(file), samples).map_err(persist_error)?;
    info!(path = %path.display(), samples = samples.len(), "Samples saved");
    Ok(())
}

/// Sink that saves every download to the same text file.
#[derive(Debug, Clone)]
pub struct TextFileSink {
    path: PathBuf,
}

impl TextFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for TextFileSink {
    fn accept(&mut self, samples: &[f64], _sample_interval_secs: f64) -> Result<(), VTError> {
        save_to_file(&self.path, samples)
    }
}
