//! Output formatting for the CLI.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;

use myo_core::{ChannelStreams, DeviceInfo, FirmwareVersion, PipelineStatsSnapshot};
use myo_types::EMG_CHANNELS;

/// Everything the info command reads from the armband.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub address: String,
    pub name: Option<String>,
    pub battery: Option<u8>,
    pub firmware: FirmwareVersion,
    pub info: DeviceInfo,
}

/// Activity summary of the most recent samples on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: usize,
    pub latest: i8,
    pub rms: f64,
}

/// Summarise the last `window` samples of every channel.
pub fn summarize(streams: &ChannelStreams, window: usize) -> Vec<ChannelSummary> {
    (0..EMG_CHANNELS)
        .map(|channel| {
            let tail = streams.tail(channel, window);
            let rms = if tail.is_empty() {
                0.0
            } else {
                let sum: f64 = tail.iter().map(|&v| f64::from(v).powi(2)).sum();
                (sum / tail.len() as f64).sqrt()
            };
            ChannelSummary {
                channel,
                latest: tail.last().copied().unwrap_or(0),
                rms,
            }
        })
        .collect()
}

/// One line of live progress: sample count and per-channel RMS.
pub fn format_summary_line(streams: &ChannelStreams, window: usize) -> String {
    let mut line = format!("{:>7} samples |", streams.samples_per_channel());
    for summary in summarize(streams, window) {
        let _ = write!(line, " {:>5.1}", summary.rms);
    }
    line
}

pub fn format_info_text(report: &InfoReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Address:      {}", report.address);
    if let Some(name) = &report.name {
        let _ = writeln!(out, "Name:         {}", name);
    }
    let _ = writeln!(out, "Serial:       {}", report.info.serial_string());
    let _ = writeln!(out, "Firmware:     {}", report.firmware);
    if let Some(battery) = report.battery {
        let _ = writeln!(out, "Battery:      {}%", battery);
    }
    let _ = writeln!(out, "SKU:          {}", report.info.sku);
    let _ = writeln!(out, "Unlock pose:  {}", report.info.unlock_pose);
    let _ = writeln!(
        out,
        "Classifier:   type {} index {}{}",
        report.info.classifier_type,
        report.info.classifier_index,
        if report.info.has_custom_classifier {
            " (custom)"
        } else {
            ""
        }
    );
    out
}

/// Escape a value for CSV output.
/// Values containing commas, quotes or line breaks are quoted, with inner
/// quotes doubled.
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn format_info_csv(report: &InfoReport) -> String {
    format!(
        "address,name,serial,firmware,battery,sku\n{},{},{},{}.{}.{},{},{}\n",
        csv_escape(&report.address),
        csv_escape(report.name.as_deref().unwrap_or("")),
        report.info.serial_string(),
        report.firmware.major,
        report.firmware.minor,
        report.firmware.patch,
        report.battery.map(|b| b.to_string()).unwrap_or_default(),
        report.info.sku,
    )
}

/// One row per sample index, one column per channel.
pub fn format_streams_csv(streams: &ChannelStreams) -> String {
    let mut out = String::from("sample");
    for channel in 0..EMG_CHANNELS {
        let _ = write!(out, ",ch{}", channel);
    }
    out.push('\n');

    for index in 0..streams.samples_per_channel() {
        let _ = write!(out, "{}", index);
        for channel in streams.channels() {
            let _ = write!(out, ",{}", channel[index]);
        }
        out.push('\n');
    }
    out
}

pub fn format_streams_text(streams: &ChannelStreams, stats: &PipelineStatsSnapshot) -> String {
    let mut out = format!(
        "Recorded {} samples per channel ({} frames, {} dropped, {} group gaps)\n",
        streams.samples_per_channel(),
        stats.frames_drained,
        stats.frames_malformed + stats.unknown_senders,
        stats.group_gaps
    );
    for summary in summarize(streams, streams.samples_per_channel()) {
        let _ = writeln!(out, "  ch{}: rms {:.2}", summary.channel, summary.rms);
    }
    out
}

#[derive(Serialize)]
struct StreamsDocument<'a> {
    samples_per_channel: usize,
    channels: &'a [Vec<i8>; EMG_CHANNELS],
}

pub fn format_streams_json(streams: &ChannelStreams) -> Result<String> {
    let document = StreamsDocument {
        samples_per_channel: streams.samples_per_channel(),
        channels: streams.channels(),
    };
    Ok(serde_json::to_string_pretty(&document)? + "\n")
}
