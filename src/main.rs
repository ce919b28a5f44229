// NEURO-METASURFACE: attention-steered beam demo
// Synthetic EEG in, beam state out. Status goes to stderr so stdout stays clean
// for the final actuator grid (--emit-grid).

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use neuro_metasurface::{
    peak_direction, ControlLoop, ControlState, Controller, ControllerConfig, MetasurfaceResult,
    SignalProfile, SyntheticSource, Trend,
};

/// Drive a simulated metasurface from a synthetic attention signal.
#[derive(Parser, Debug)]
#[command(name = "neuro-metasurface")]
#[command(about = "Attention-steered metasurface control loop (synthetic EEG)")]
struct Args {
    /// JSON configuration file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    rows: Option<usize>,

    #[arg(long)]
    cols: Option<usize>,

    /// Control loop rate in Hz.
    #[arg(long)]
    rate: Option<f64>,

    /// How long to run, in seconds.
    #[arg(long, default_value = "12")]
    seconds: f64,

    /// Seconds spent in each synthetic mental state.
    #[arg(long, default_value = "4")]
    dwell: f64,

    /// RNG seed for the synthetic source.
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Print the final (phase, amplitude) grid as JSON on stdout.
    #[arg(long)]
    emit_grid: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn build_config(args: &Args) -> MetasurfaceResult<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(rows) = args.rows {
        config.rows = rows;
    }
    if let Some(cols) = args.cols {
        config.cols = cols;
    }
    if let Some(rate) = args.rate {
        config.update_rate = rate;
    }
    config.validate()?;
    Ok(config)
}

fn paint(state: Option<ControlState>) -> &'static str {
    match state {
        Some(ControlState::Low) => "\x1b[94mLOW   \x1b[0m",
        Some(ControlState::Medium) => "\x1b[93mMEDIUM\x1b[0m",
        Some(ControlState::High) => "\x1b[92mHIGH  \x1b[0m",
        None => "------",
    }
}

fn run(args: &Args) -> MetasurfaceResult<()> {
    let config = build_config(args)?;

    // One frame per tick, sized to the tick period.
    let frame_len = ((config.sample_rate / config.update_rate).round() as usize).max(1);
    let source = SyntheticSource::new(config.sample_rate, config.channels, frame_len, args.seed)?
        .with_schedule(
            vec![
                SignalProfile::drowsy(),
                SignalProfile::relaxed(),
                SignalProfile::focused(),
            ],
            args.dwell,
        );

    eprintln!(
        "NEURO-METASURFACE | {}x{} array @ {:.1} GHz",
        config.rows,
        config.cols,
        config.carrier_frequency / 1e9
    );
    eprintln!(
        "Loop {:.0} Hz | EEG {:.0} Hz x {} ch",
        config.update_rate, config.sample_rate, config.channels
    );
    eprintln!("─────────────────────────────────────────────────────");

    let control = ControlLoop::new(Controller::new(config, Box::new(source))?);
    control.start()?;

    let started = Instant::now();
    let run_for = Duration::from_secs_f64(args.seconds.max(0.0));
    while started.elapsed() < run_for {
        thread::sleep(Duration::from_millis(500));
        let status = control.status();
        let score = status.attention.map_or(f64::NAN, |a| a.value);
        let trend = match status.trend.trend {
            Trend::Increasing => "rising",
            Trend::Decreasing => "falling",
            Trend::Stable => "steady",
            Trend::InsufficientData => "warming up",
        };
        let beam = peak_direction(&status.surface)
            .map(|(theta, _)| format!("{theta:+.0}°"))
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "t={:5.1}s  attention {score:5.1}  {}  trend {trend:<10}  peak θ {beam}  errors {}",
            started.elapsed().as_secs_f64(),
            paint(status.state),
            status.errors
        );
    }

    if !control.stop() {
        eprintln!("worker still finishing its last tick");
    }

    if args.emit_grid {
        let grid = control.snapshot().grid(0);
        match serde_json::to_string(&grid) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "failed to encode grid"),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "neuro-metasurface failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
