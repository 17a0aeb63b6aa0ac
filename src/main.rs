//! dynpick_daq: stream calibrated force/torque readings as JSON lines.
//!
//! Frames go to stdout, one JSON object per line; logs go to stderr.
//! `SIGUSR1` requests an offset reset, Ctrl-C stops acquisition.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dynpick_daq::adapters::{ByteChannel, MockAdapter};
use dynpick_daq::config::Settings;
use dynpick_daq::error_recovery::RetryPolicy;
use dynpick_daq::instrument::CalibrationHandshake;
use dynpick_daq::measurement::CalibratedFrame;
use dynpick_daq::reset::ResetState;
use dynpick_daq::sampling::SamplingLoop;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const FRAME_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "dynpick_daq", version, about = "Force/torque sensor acquisition driver")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Frame id stamped on every reading
    #[arg(long)]
    frame_id: Option<String>,

    /// Sampling rate in Hz
    #[arg(long)]
    rate: Option<f64>,

    /// Skip querying the sensor for calibration factors
    #[arg(long)]
    no_calibration: bool,

    /// Frequency divider (1, 2, 4 or 8)
    #[arg(long)]
    frequency_divider: Option<u8>,

    /// Reset commands sent per offset reset request
    #[arg(long)]
    reset_count: Option<u32>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Use the built-in sensor simulator instead of a serial port
    #[arg(long)]
    simulate: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(device) = &self.device {
            settings.device.path = device.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            settings.device.baud_rate = baud_rate;
        }
        if let Some(frame_id) = &self.frame_id {
            settings.device.frame_id = frame_id.clone();
        }
        if let Some(rate) = self.rate {
            settings.device.rate_hz = rate;
        }
        if self.no_calibration {
            settings.device.acquire_calibration = false;
        }
        if let Some(divider) = self.frequency_divider {
            settings.device.frequency_divider = divider;
        }
        if let Some(count) = self.reset_count {
            settings.reset.command_count = count;
        }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_channel(settings: &Settings, simulate: bool) -> Result<Box<dyn ByteChannel + Send>> {
    if simulate {
        info!("Using simulated sensor");
        return Ok(Box::new(MockAdapter::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        let adapter = dynpick_daq::adapters::SerialAdapter::open(
            &settings.device.path,
            settings.device.baud_rate,
        )
        .with_context(|| format!("could not open {}", settings.device.path))?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = settings;
        Err(anyhow!(
            "Serial support not enabled. Rebuild with --features instrument_serial or pass --simulate"
        ))
    }
}

async fn print_frames(mut frames: broadcast::Receiver<CalibratedFrame>) {
    loop {
        match frames.recv().await {
            Ok(frame) => match serde_json::to_string(&frame) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize frame"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Frame output lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn spawn_reset(reset: Arc<ResetState>) {
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || reset.request_reset()).await {
            Ok(Ok(ack)) => info!(success = ack.success, "{}", ack.message),
            Ok(Err(e)) => warn!(error = %e, "Offset reset failed"),
            Err(e) => error!(error = %e, "Offset reset task panicked"),
        }
    });
}

/// Serve reset requests until Ctrl-C.
async fn wait_for_shutdown(reset: Arc<ResetState>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut reset_signal = signal(SignalKind::user_defined1())
            .context("Failed to install SIGUSR1 handler")?;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result.context("Failed to listen for Ctrl-C")?;
                    info!("Shutdown requested");
                    return Ok(());
                }
                Some(()) = reset_signal.recv() => {
                    info!("Offset reset requested");
                    spawn_reset(Arc::clone(&reset));
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = reset;
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Shutdown requested");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    init_tracing(&settings.log_level, cli.log_json);

    let mut channel = open_channel(&settings, cli.simulate)?;
    info!(
        "Sampling time = {:.3} ms",
        settings.device.period().as_secs_f64() * 1000.0
    );
    info!(
        "Read timeout = {:.3} ms",
        RetryPolicy::from(&settings.retry)
            .worst_case_wait()
            .as_secs_f64()
            * 1000.0
    );

    let report = CalibrationHandshake::from_settings(&settings).run(&mut channel);
    info!(
        calibrated = report.calibrated,
        divider = ?report.divider,
        primed = report.primed,
        "Handshake finished"
    );

    let (frames_tx, frames_rx) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let reset = Arc::new(ResetState::from_settings(&settings.reset));
    let shutdown = Arc::new(AtomicBool::new(false));

    let printer = tokio::spawn(print_frames(frames_rx));

    let sampler = {
        let reset = Arc::clone(&reset);
        let shutdown = Arc::clone(&shutdown);
        let calibration = report.calibration;
        std::thread::Builder::new()
            .name("sampling".to_string())
            .spawn(move || {
                let mut sampling =
                    SamplingLoop::new(channel, frames_tx, reset, calibration, &settings);
                sampling.run(&shutdown)
            })
            .context("Failed to spawn sampling thread")?
    };

    wait_for_shutdown(reset).await?;
    shutdown.store(true, Ordering::Relaxed);

    let ticks = tokio::task::spawn_blocking(move || sampler.join())
        .await
        .context("Failed to join sampling thread")?
        .map_err(|_| anyhow!("Sampling thread panicked"))?;
    printer.await.context("Frame printer failed")?;

    info!(ticks, "Stopped");
    Ok(())
}
