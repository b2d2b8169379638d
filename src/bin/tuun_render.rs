use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tuun_render::engine::ManualBackend;
use tuun_render::telemetry::{self, PlaybackCounters};
use tuun_render::testing::ScriptedFactory;
use tuun_render::{AppConfig, PlaybackCoordinator, RenderEvent};

#[derive(Parser, Debug)]
#[command(
    name = "tuun_render",
    about = "Drive the streaming render core offline or through an output device"
)]
struct Cli {
    /// Config file (defaults to assets/render_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render an expression with a manual clock and report the event timeline
    Render {
        #[arg(long)]
        expr: String,
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Samples per render tick
        #[arg(long)]
        block_size: Option<usize>,
        /// Samples requested from the engine per batch
        #[arg(long)]
        batch: Option<usize>,
        #[arg(long, default_value_t = 10_000)]
        max_ticks: usize,
        /// Write the rendered mono stream as a 32-bit float WAV
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Play an expression through an output device
    #[cfg(feature = "cpal-backend")]
    Play {
        #[arg(long)]
        expr: String,
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// List output devices
    #[cfg(feature = "cpal-backend")]
    Devices,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    tuun_render::init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            expr,
            sample_rate,
            block_size,
            batch,
            max_ticks,
            wav,
        } => {
            let mut config = config;
            if let Some(block_size) = block_size {
                config.render.block_size = block_size;
            }
            if let Some(batch) = batch {
                config.render.generate_batch = batch;
            }
            config
                .validate()
                .map_err(anyhow::Error::msg)
                .context("validating render options")?;
            run_render(config, &expr, sample_rate, max_ticks, wav)
        }
        #[cfg(feature = "cpal-backend")]
        Commands::Play {
            expr,
            sample_rate,
            seconds,
        } => device::run_play(config, &expr, sample_rate, seconds),
        #[cfg(feature = "cpal-backend")]
        Commands::Devices => device::run_devices(),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("validating configuration")?;
    Ok(config)
}

fn run_render(
    config: AppConfig,
    expression: &str,
    sample_rate: Option<u32>,
    max_ticks: usize,
    wav: Option<PathBuf>,
) -> Result<ExitCode> {
    let sample_rate = sample_rate.unwrap_or(config.playback.default_sample_rate);
    let block_size = config.render.block_size;
    let generate_batch = config.render.generate_batch;

    let backend = ManualBackend::new();
    let clock = backend.clock();
    let coordinator = PlaybackCoordinator::shared(ScriptedFactory::new(), backend, config)
        .context("creating playback coordinator")?;
    let mut controller = tuun_render::PlaybackController::with_sample_rate(
        coordinator.clone(),
        sample_rate,
    );

    controller
        .play(expression)
        .with_context(|| format!("starting playback of {:?}", expression))?;

    let mut samples = Vec::new();
    let mut timeline = Vec::new();
    let mut outcome = RenderOutcome::TickLimit;

    for tick in 0..max_ticks {
        let block = clock
            .tick()
            .context("output stream closed while rendering")?;
        samples.extend_from_slice(&block);

        for event in controller.poll_events() {
            match &event {
                RenderEvent::Ended => outcome = RenderOutcome::Ended,
                RenderEvent::Error { .. } => outcome = RenderOutcome::Failed,
                RenderEvent::Ready => {}
            }
            timeline.push(TimelineEntry { tick, event });
        }

        if outcome != RenderOutcome::TickLimit {
            break;
        }
    }

    if let Some(path) = wav.as_deref() {
        write_wav(path, sample_rate, &samples)?;
    }

    let report = RenderReport {
        expression,
        sample_rate,
        block_size,
        generate_batch,
        ticks: samples.len() / block_size,
        samples: samples.len(),
        outcome,
        timeline,
        wav: wav.as_deref().map(|path| path.display().to_string()),
        counters: telemetry::hub().counters(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    coordinator.shutdown().context("shutting down coordinator")?;

    Ok(match outcome {
        RenderOutcome::Ended => ExitCode::from(0),
        RenderOutcome::Failed => ExitCode::from(2),
        RenderOutcome::TickLimit => ExitCode::from(3),
    })
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for sample in samples {
        writer
            .write_sample(*sample)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum RenderOutcome {
    Ended,
    Failed,
    TickLimit,
}

#[derive(Serialize)]
struct TimelineEntry {
    tick: usize,
    event: RenderEvent,
}

#[derive(Serialize)]
struct RenderReport<'a> {
    expression: &'a str,
    sample_rate: u32,
    block_size: usize,
    generate_batch: usize,
    ticks: usize,
    samples: usize,
    outcome: RenderOutcome,
    timeline: Vec<TimelineEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wav: Option<String>,
    counters: PlaybackCounters,
}

#[cfg(feature = "cpal-backend")]
mod device {
    use std::process::ExitCode;
    use std::time::{Duration, Instant};

    use anyhow::{Context, Result};
    use tuun_render::engine::{list_output_devices, CpalBackend};
    use tuun_render::testing::ScriptedFactory;
    use tuun_render::{AppConfig, PlaybackController, PlaybackCoordinator, RenderEvent};

    pub fn run_play(
        config: AppConfig,
        expression: &str,
        sample_rate: Option<u32>,
        seconds: u64,
    ) -> Result<ExitCode> {
        let sample_rate = sample_rate.unwrap_or(config.playback.default_sample_rate);
        let ready_timeout = Duration::from_millis(config.playback.ready_timeout_ms);
        let backend = CpalBackend::new(config.output.device.clone());
        let coordinator = PlaybackCoordinator::shared(ScriptedFactory::new(), backend, config)
        .context("creating playback coordinator")?;
        let mut controller = PlaybackController::with_sample_rate(coordinator.clone(), sample_rate);

        controller
            .wait_ready(ready_timeout)
            .context("waiting for the output device")?;
        controller
            .play(expression)
            .with_context(|| format!("starting playback of {:?}", expression))?;

        let deadline = Instant::now() + Duration::from_secs(seconds);
        let mut code = ExitCode::from(3);
        'outer: while Instant::now() < deadline {
            for event in controller.poll_events() {
                println!("{}", serde_json::to_string(&event)?);
                match event {
                    RenderEvent::Ended => {
                        code = ExitCode::from(0);
                        break 'outer;
                    }
                    RenderEvent::Error { .. } => {
                        code = ExitCode::from(2);
                        break 'outer;
                    }
                    RenderEvent::Ready => {}
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        controller.stop().context("stopping playback")?;
        coordinator.shutdown().context("shutting down coordinator")?;
        Ok(code)
    }

    pub fn run_devices() -> Result<ExitCode> {
        let devices = list_output_devices().context("listing output devices")?;
        if devices.is_empty() {
            println!("No output devices found");
        }
        for name in devices {
            println!("{name}");
        }
        Ok(ExitCode::from(0))
    }
}
