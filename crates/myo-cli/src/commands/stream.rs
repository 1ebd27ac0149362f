//! Stream command implementation.
//!
//! Runs one session until the requested duration elapses or Ctrl-C is
//! pressed, printing a per-channel summary line while it streams.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use myo_core::{
    BleConnector, ChannelStreams, ConsumerAction, NoSetup, PipelineOptions, RetryConfig,
    RunnerConfig, SessionRunner, StopCondition,
};

use crate::cli::{OutputFormat, StreamArgs};
use crate::config::{Config, require_device};
use crate::format::{
    format_streams_csv, format_streams_json, format_streams_text, format_summary_line,
};
use crate::util::{connection_config, write_output};

/// Samples per channel used for the live RMS (about a quarter second of raw EMG).
const SUMMARY_WINDOW: usize = 50;

/// Prints a summary line at most once per interval.
struct SummaryPrinter {
    interval: Option<Duration>,
    last_print: Option<Instant>,
}

impl SummaryPrinter {
    fn new(interval_ms: u64, quiet: bool) -> Self {
        let interval = (!quiet && interval_ms > 0).then(|| Duration::from_millis(interval_ms));
        Self {
            interval,
            last_print: None,
        }
    }
}

impl ConsumerAction for SummaryPrinter {
    fn on_drain(&mut self, streams: &ChannelStreams) {
        let Some(interval) = self.interval else {
            return;
        };
        if streams.is_empty() {
            return;
        }
        if self.last_print.is_some_and(|last| last.elapsed() < interval) {
            return;
        }
        self.last_print = Some(Instant::now());
        eprintln!("{}", format_summary_line(streams, SUMMARY_WINDOW));
    }
}

fn runner_config(args: &StreamArgs, config: &Config) -> RunnerConfig {
    let mut mode = config.mode;
    if let Some(emg) = args.emg {
        mode.emg = emg.into();
    }
    if let Some(imu) = args.imu {
        mode.imu = imu.into();
    }

    let refresh_ms = args.refresh_ms.unwrap_or(config.stream.refresh_ms);
    let retries = args.retries.unwrap_or(config.connect_retries);

    RunnerConfig {
        mode,
        pipeline: PipelineOptions::builder()
            .refresh_interval(Duration::from_millis(refresh_ms))
            .build(),
        connect_retry: RetryConfig::new(retries),
    }
}

fn stream_duration(args: &StreamArgs, config: &Config) -> Result<Option<Duration>> {
    let Some(secs) = args.duration.or(config.stream.duration) else {
        return Ok(None);
    };
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(Some(duration)),
        _ => bail!("Duration must be a positive number of seconds, got {}", secs),
    }
}

pub async fn cmd_stream(args: StreamArgs, config: &Config, quiet: bool) -> Result<()> {
    let address = require_device(args.device.device.clone(), config)?;
    let timeout = args.device.timeout.unwrap_or(config.timeout_secs());
    let duration = stream_duration(&args, config)?;
    let runner = SessionRunner::new(
        BleConnector::with_config(connection_config(timeout)),
        runner_config(&args, config),
    );

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping...");
            ctrl_c.cancel();
        }
    });
    let stop = match duration {
        Some(limit) => StopCondition::AfterOrSignal(limit, token),
        None => StopCondition::Signal(token),
    };

    if !quiet {
        match duration {
            Some(limit) => info!("Streaming from {} for {:?}", address, limit),
            None => info!("Streaming from {} until Ctrl-C", address),
        }
    }

    let summary_ms = args.summary_ms.unwrap_or(config.stream.summary_ms);
    let mut printer = SummaryPrinter::new(summary_ms, quiet);
    let streams = runner
        .run(&address, &mut NoSetup, &mut printer, stop)
        .await
        .with_context(|| format!("Streaming from {} failed", address))?;

    if let Some(path) = &args.output {
        let content = match args.format {
            OutputFormat::Csv => format_streams_csv(&streams),
            OutputFormat::Json => format_streams_json(&streams)?,
            OutputFormat::Text => format_streams_text(&streams, &runner.stats()),
        };
        write_output(Some(path), &content)?;
        if !quiet {
            info!(
                "Wrote {} samples per channel to {}",
                streams.samples_per_channel(),
                path.display()
            );
        }
    }

    if !quiet {
        print!("{}", format_streams_text(&streams, &runner.stats()));
    }
    Ok(())
}
