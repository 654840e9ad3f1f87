use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use velotrack_lib::decoder::value_range;
use velotrack_lib::{
    DeviceConfig, MockTransport, SampleSink, SerialSettings, SimulatedDevice, TextFileSink, Transport, VTError,
    VeloTrack, available_ports, time_axis,
};

/// Port name reported for the built-in simulated recorder
const SIMULATED_PORT: &str = "simulated";

/// Command-line front end for the VeloTrack speed recorder.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports a recorder may be attached to
    Ports,
    /// Record a run, download it and save the speeds
    Measure(MeasureArgs),
    /// Download the run currently stored on the recorder
    Download(DownloadArgs),
    /// Connect and show the recorder's time resolution
    Info(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Serial port the recorder is attached to (e.g. /dev/ttyACM0 or COM3)
    #[arg(short, long, required_unless_present = "simulate", conflicts_with = "simulate")]
    port: Option<String>,
    /// Talk to a simulated recorder instead of real hardware
    #[arg(long)]
    simulate: bool,
    #[arg(short, long, default_value_t = SerialSettings::default().baud_rate)]
    baud: u32,
}

#[derive(Args, Debug)]
struct MeasureArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Where to save the speeds; defaults to a timestamped file
    #[arg(short, long, conflicts_with_all = ["no_save", "no_auto_download"])]
    output: Option<PathBuf>,
    /// Do not save the speeds
    #[arg(long)]
    no_save: bool,
    /// Only record; fetch the buffer later with `download`
    #[arg(long)]
    no_auto_download: bool,
    /// Give up waiting for the measurement after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(short, long, conflicts_with = "no_save")]
    output: Option<PathBuf>,
    #[arg(long)]
    no_save: bool,
}

impl Commands {
    fn target(&self) -> Option<&TargetArgs> {
        match self {
            Commands::Ports => None,
            Commands::Measure(args) => Some(&args.target),
            Commands::Download(args) => Some(&args.target),
            Commands::Info(target) => Some(target),
        }
    }

    fn device_config(&self) -> DeviceConfig {
        match self {
            Commands::Measure(args) => DeviceConfig::default()
                .with_auto_download(!args.no_auto_download)
                .with_measurement_timeout(args.timeout.map(Duration::from_secs)),
            _ => DeviceConfig::default(),
        }
    }
}

/// Prints a short summary of every download.
struct SummarySink {
    recording_interval_us: u16,
}

impl SampleSink for SummarySink {
    fn accept(&mut self, samples: &[f64], _sample_interval_secs: f64) -> Result<(), VTError> {
        let duration = time_axis(samples.len(), self.recording_interval_us)
            .last()
            .copied()
            .unwrap_or_default();
        println!("Samples:    {}", samples.len());
        println!("Duration:   {:.3} s", duration);
        match value_range(samples) {
            Some((min, max)) => println!("Speed:      {:.3} .. {:.3} m/s", min, max),
            None => println!("Speed:      no data"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = dispatch(&cli.command).await {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}

async fn dispatch(command: &Commands) -> Result<()> {
    let Some(target) = command.target() else {
        return list_ports();
    };
    let config = command.device_config();

    if target.simulate {
        let device = VeloTrack::new(MockTransport::new(SimulatedDevice::new()), config);
        run(device, SIMULATED_PORT, command).await
    } else {
        let port = target.port.as_deref().context("No serial port given")?;
        let settings = SerialSettings {
            baud_rate: target.baud,
        };
        run(VeloTrack::serial(settings, config), port, command).await
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<20} {}", port.name, port.description);
    }
    Ok(())
}

async fn run<T: Transport>(mut device: VeloTrack<T>, port: &str, command: &Commands) -> Result<()> {
    device
        .connect(port)
        .await
        .with_context(|| format!("Failed to connect to {port}"))?;

    let result = match command {
        Commands::Measure(args) => measure(&mut device, args).await,
        Commands::Download(args) => download(&mut device, args.output.clone(), args.no_save).await,
        Commands::Info(_) => {
            println!("Port:               {port}");
            println!("Recording interval: {} µs", device.recording_interval_us());
            println!("Sample rate:        {:.1} Hz", 1.0 / device.sample_interval_secs());
            Ok(())
        }
        Commands::Ports => Ok(()),
    };

    device.disconnect();
    result
}

async fn measure<T: Transport>(device: &mut VeloTrack<T>, args: &MeasureArgs) -> Result<()> {
    if !args.no_auto_download {
        add_sinks(device, args.output.clone(), args.no_save);
    }

    println!("Measuring, press Ctrl+C to cancel...");
    let outcome = tokio::select! {
        result = device.start_measurement() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(result) = outcome else {
        warn!("Measurement cancelled");
        if let Err(e) = device.stop_measurement().await {
            warn!(error = %e, "Could not stop the measurement");
        }
        return Ok(());
    };

    match result.context("Measurement failed")? {
        Some(report) => check_sinks(report.sink_failures),
        None => {
            info!("Measurement stored on the device, fetch it with `velotrack download`");
            Ok(())
        }
    }
}

async fn download<T: Transport>(device: &mut VeloTrack<T>, output: Option<PathBuf>, no_save: bool) -> Result<()> {
    add_sinks(device, output, no_save);
    let report = device.download_buffer().await.context("Download failed")?;
    check_sinks(report.sink_failures)
}

fn add_sinks<T: Transport>(device: &mut VeloTrack<T>, output: Option<PathBuf>, no_save: bool) {
    let recording_interval_us = device.recording_interval_us();
    device.add_sink(SummarySink { recording_interval_us });
    if !no_save {
        let path = output.unwrap_or_else(default_output_path);
        info!("Saving samples to {:?}", path);
        device.add_sink(TextFileSink::new(path));
    }
}

fn check_sinks(failures: Vec<VTError>) -> Result<()> {
    let count = failures.len();
    for failure in failures {
        error!("{}", failure);
    }
    if count > 0 {
        bail!("{count} sample sink(s) failed; the download was kept in memory only");
    }
    Ok(())
}

fn default_output_path() -> PathBuf {
    PathBuf::from(chrono::Local::now().format("velotrack-%Y%m%d-%H%M%S.txt").to_string())
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG still wins
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}
