//! `looney`: console front end for the looney pitch detector.

mod display;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use looney_core::{
    EstimatorKind, SyntheticSource, TunerConfig, TunerEvent, TunerSession, Window,
};
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "looney",
    version,
    about = "Real-time pitch detector and guitar tuner"
)]
struct Args {
    /// JSON configuration file (missing keys use defaults)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed a sine of this frequency instead of the microphone
    #[arg(long, value_name = "HZ")]
    simulate: Option<f32>,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,

    /// Print the N strongest spectral peaks of every analysis
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "3")]
    spectrum: Option<usize>,

    /// Samples per analysed block
    #[arg(long)]
    block_size: Option<usize>,

    /// Milliseconds between analyses
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Pitch estimation algorithm
    #[arg(long, value_enum)]
    estimator: Option<EstimatorArg>,

    /// Frequency of A4 in Hz
    #[arg(long, value_name = "HZ")]
    reference: Option<f32>,

    /// Remove DC and apply a Hann window before the FFT
    #[arg(long)]
    hann: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EstimatorArg {
    PeakPicking,
    Yin,
    FastYin,
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::PeakPicking => EstimatorKind::PeakPicking,
            EstimatorArg::Yin => EstimatorKind::Yin,
            EstimatorArg::FastYin => EstimatorKind::FastYin,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = build_config(&args)?;
    let run_for = args
        .duration
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--duration must be a non-negative number of seconds")?;

    let mut session = match args.simulate {
        Some(hz) => {
            log::info!("[CLI] Simulating a {} Hz tone", hz);
            let provider = SyntheticSource::provider(&config, hz);
            TunerSession::new(config, provider)
        }
        None => TunerSession::with_default_device(config),
    }
    .context("failed to create tuner session")?;

    let active = session.config();
    println!(
        "Tuner ready: {} Hz, {} samples per block, A4 = {} Hz",
        active.sample_rate, active.block_size, active.reference_pitch
    );

    let events = session.subscribe();
    let peaks = args.spectrum.unwrap_or(0);
    let printer = thread::Builder::new()
        .name("looney-printer".into())
        .spawn(move || print_events(events, peaks))
        .context("failed to spawn printer thread")?;

    if run_for.is_none() {
        println!("Press Enter to start the tuner...");
        wait_for_enter()?;
    }
    session.start().context("failed to start listening")?;

    match run_for {
        Some(duration) => thread::sleep(duration),
        None => {
            println!("Press Enter to stop.");
            wait_for_enter()?;
        }
    }

    session.stop();
    // Dropping the session closes the event channel and ends the printer.
    drop(session);
    printer
        .join()
        .map_err(|_| anyhow!("printer thread panicked"))?;
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Defaults, then the config file, then command-line overrides.
fn build_config(args: &Args) -> anyhow::Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => TunerConfig::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TunerConfig::default(),
    };

    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.analysis_interval_ms = interval_ms;
    }
    if let Some(estimator) = args.estimator {
        config.estimator.kind = estimator.into();
    }
    if let Some(reference) = args.reference {
        config.reference_pitch = reference;
    }
    if args.hann {
        config.window = Window::Hann;
    }
    if let Some(hz) = args.simulate {
        if !(hz.is_finite() && hz > 0.0) {
            bail!("--simulate needs a positive frequency, got {}", hz);
        }
    }

    config.validate().context("invalid tuner configuration")?;
    Ok(config)
}

fn print_events(events: Receiver<TunerEvent>, peaks: usize) {
    for event in events.iter() {
        for line in display::render_event(&event, peaks) {
            println!("{line}");
        }
    }
}

fn wait_for_enter() -> anyhow::Result<()> {
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(())
}
