//! Producer/consumer pipeline for EMG notifications.
//!
//! The producer half ([`EmgProducer`]) runs on the transport's delivery path.
//! It decodes each notification, tags it with the group id of the sending
//! characteristic and pushes it onto an unbounded queue without ever
//! blocking. The consumer half ([`StreamingPipeline`]) drains the queue in
//! arrival order into eight per-channel buffers and hands them to a
//! [`ConsumerAction`] on every refresh.
//!
//! A malformed notification never aborts the session: it is dropped, counted
//! in [`PipelineStats`] and logged as a [`DecodeWarning`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use myo_types::uuid::EMG_DATA;
use myo_types::{EMG_CHANNELS, EmgFrame, ParseError};

use crate::error::{Error, Result};
use crate::traits::{ConsumerAction, NotificationHandler};

/// Number of EMG characteristics the armband streams on.
pub const EMG_GROUPS: usize = EMG_DATA.len();

/// Maps EMG sender characteristics to their group id (0..4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleTable {
    senders: [Uuid; EMG_GROUPS],
}

impl HandleTable {
    /// Build a table from four sender UUIDs, in group order.
    pub fn new(senders: [Uuid; EMG_GROUPS]) -> Self {
        Self { senders }
    }

    /// The armband's four EMG data characteristics.
    pub fn emg() -> Self {
        Self::new(EMG_DATA.map(|code| code.uuid()))
    }

    /// Resolve a sender to its group id.
    pub fn group_of(&self, sender: Uuid) -> Option<u8> {
        self.senders
            .iter()
            .position(|uuid| *uuid == sender)
            .map(|index| index as u8)
    }

    /// The sender UUIDs, in group order.
    pub fn senders(&self) -> &[Uuid; EMG_GROUPS] {
        &self.senders
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::emg()
    }
}

/// A decoded frame waiting in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedFrame {
    /// Group id of the characteristic that sent the frame.
    pub group: u8,
    pub frame: EmgFrame,
}

/// Why a notification was dropped instead of queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarningKind {
    /// The payload was not a valid EMG frame.
    Malformed(ParseError),
    /// The sender is not one of the EMG characteristics.
    UnknownSender,
}

/// A dropped notification, reported instead of failing the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub sender: Uuid,
    pub kind: DecodeWarningKind,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DecodeWarningKind::Malformed(err) => {
                write!(f, "dropped notification from {}: {}", self.sender, err)
            }
            DecodeWarningKind::UnknownSender => {
                write!(f, "dropped notification from unknown sender {}", self.sender)
            }
        }
    }
}

/// Counters shared between the producer and the consumer.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
    unknown_senders: AtomicU64,
    frames_drained: AtomicU64,
    group_gaps: AtomicU64,
}

impl PipelineStats {
    /// Take a point-in-time copy of the counters.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            unknown_senders: self.unknown_senders.load(Ordering::Relaxed),
            frames_drained: self.frames_drained.load(Ordering::Relaxed),
            group_gaps: self.group_gaps.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatsSnapshot {
    /// Frames decoded and queued.
    pub frames_received: u64,
    /// Notifications dropped because they did not decode.
    pub frames_malformed: u64,
    /// Notifications dropped because the sender was not recognised.
    pub unknown_senders: u64,
    /// Frames moved from the queue into the channel buffers.
    pub frames_drained: u64,
    /// Drained frames whose group id did not follow the previous one.
    pub group_gaps: u64,
}

impl PipelineStatsSnapshot {
    /// Frames queued but not yet drained.
    pub fn pending(&self) -> u64 {
        self.frames_received.saturating_sub(self.frames_drained)
    }
}

/// Per-channel sample buffers, in arrival order.
///
/// After `n` frames have been drained every channel holds exactly `2 * n`
/// samples: time-step 0 then time-step 1 of each frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStreams {
    channels: [Vec<i8>; EMG_CHANNELS],
}

impl ChannelStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append both time-steps of a frame.
    pub fn append(&mut self, frame: &EmgFrame) {
        for (channel, value) in frame.pairs() {
            self.channels[channel].push(value);
        }
    }

    /// Samples recorded on one channel. Panics if `channel >= 8`.
    pub fn channel(&self, channel: usize) -> &[i8] {
        &self.channels[channel]
    }

    /// All eight channel buffers.
    pub fn channels(&self) -> &[Vec<i8>; EMG_CHANNELS] {
        &self.channels
    }

    /// Number of samples on each channel.
    pub fn samples_per_channel(&self) -> usize {
        self.channels[0].len()
    }

    /// Number of frames appended so far.
    pub fn frame_count(&self) -> usize {
        self.samples_per_channel() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    /// The most recent `n` samples of a channel.
    pub fn tail(&self, channel: usize, n: usize) -> &[i8] {
        let samples = &self.channels[channel];
        &samples[samples.len().saturating_sub(n)..]
    }

    /// The newest sample on every channel.
    pub fn latest(&self) -> Option<[i8; EMG_CHANNELS]> {
        if self.is_empty() {
            return None;
        }
        let mut latest = [0i8; EMG_CHANNELS];
        for (slot, samples) in latest.iter_mut().zip(&self.channels) {
            *slot = *samples.last()?;
        }
        Some(latest)
    }

    pub fn into_inner(self) -> [Vec<i8>; EMG_CHANNELS] {
        self.channels
    }
}

/// Options for the consumer loop.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Pause between drains. Zero means yield to the scheduler only.
    /// Default: 10 ms.
    pub refresh_interval: Duration,
    /// Sender to group id mapping. Default: the four EMG characteristics.
    pub handles: HandleTable,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(10),
            handles: HandleTable::emg(),
        }
    }
}

impl PipelineOptions {
    pub fn builder() -> PipelineOptionsBuilder {
        PipelineOptionsBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that every sender in the handle table is distinct.
    pub fn validate(&self) -> Result<()> {
        let senders = self.handles.senders();
        for (i, sender) in senders.iter().enumerate() {
            if senders[i + 1..].contains(sender) {
                return Err(Error::invalid_config(format!(
                    "sender {} appears more than once in the handle table",
                    sender
                )));
            }
        }
        Ok(())
    }
}

/// Builder for PipelineOptions.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptionsBuilder {
    options: PipelineOptions,
}

impl PipelineOptionsBuilder {
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.options.refresh_interval = interval;
        self
    }

    #[must_use]
    pub fn handles(mut self, handles: HandleTable) -> Self {
        self.options.handles = handles;
        self
    }

    #[must_use]
    pub fn build(self) -> PipelineOptions {
        self.options
    }
}

/// Producer half of the pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EmgProducer {
    tx: mpsc::UnboundedSender<QueuedFrame>,
    handles: Arc<HandleTable>,
    stats: Arc<PipelineStats>,
}

impl EmgProducer {
    /// Decode and queue one notification.
    ///
    /// Never blocks. Returns the warning if the notification was dropped.
    pub fn push(&self, sender: Uuid, data: &[u8]) -> std::result::Result<(), DecodeWarning> {
        let Some(group) = self.handles.group_of(sender) else {
            self.stats.unknown_senders.fetch_add(1, Ordering::Relaxed);
            return Err(DecodeWarning {
                sender,
                kind: DecodeWarningKind::UnknownSender,
            });
        };

        let frame = EmgFrame::from_bytes(data).map_err(|err| {
            self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            DecodeWarning {
                sender,
                kind: DecodeWarningKind::Malformed(err),
            }
        })?;

        // The consumer may already be gone during teardown.
        if self.tx.send(QueuedFrame { group, frame }).is_err() {
            trace!("Pipeline closed, discarding frame from group {}", group);
            return Ok(());
        }
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl NotificationHandler for EmgProducer {
    fn on_notification(&self, sender: Uuid, data: &[u8]) {
        if let Err(warning) = self.push(sender, data) {
            warn!("{}", warning);
        }
    }
}

/// Consumer half of the pipeline.
///
/// Owns the queue receiver and the accumulated [`ChannelStreams`]. Producers
/// obtained from [`producer`](Self::producer) may run on any thread.
pub struct StreamingPipeline {
    rx: mpsc::UnboundedReceiver<QueuedFrame>,
    producer: EmgProducer,
    streams: ChannelStreams,
    stats: Arc<PipelineStats>,
    last_group: Option<u8>,
    options: PipelineOptions,
}

impl StreamingPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PipelineStats::default());
        let producer = EmgProducer {
            tx,
            handles: Arc::new(options.handles.clone()),
            stats: Arc::clone(&stats),
        };
        Self {
            rx,
            producer,
            streams: ChannelStreams::new(),
            stats,
            last_group: None,
            options,
        }
    }

    /// A producer feeding this pipeline.
    pub fn producer(&self) -> EmgProducer {
        self.producer.clone()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Move every currently queued frame into the channel buffers.
    ///
    /// Frames pushed while the drain runs are left for the next drain, so
    /// this always terminates. Returns the number of frames drained.
    pub fn drain_once(&mut self) -> usize {
        let pending = self.rx.len();
        let mut drained = 0;
        for _ in 0..pending {
            let Ok(queued) = self.rx.try_recv() else {
                break;
            };
            self.track_group(queued.group);
            self.streams.append(&queued.frame);
            drained += 1;
        }
        if drained > 0 {
            self.stats
                .frames_drained
                .fetch_add(drained as u64, Ordering::Relaxed);
            trace!("Drained {} frames", drained);
        }
        drained
    }

    // Arrival order stays authoritative; out-of-sequence groups are only counted.
    fn track_group(&mut self, group: u8) {
        if let Some(last) = self.last_group {
            let expected = (last + 1) % EMG_GROUPS as u8;
            if group != expected {
                self.stats.group_gaps.fetch_add(1, Ordering::Relaxed);
                debug!("EMG group gap: expected {}, got {}", expected, group);
            }
        }
        self.last_group = Some(group);
    }

    /// Drain, run `action`, pause; repeat until `cancel` fires.
    ///
    /// Cancellation is checked before every drain. The pause is a
    /// `refresh_interval` sleep that wakes early on cancellation, or a bare
    /// yield when the interval is zero.
    pub async fn run_consumer_loop<A>(&mut self, action: &mut A, cancel: &CancellationToken)
    where
        A: ConsumerAction + ?Sized,
    {
        let interval = self.options.refresh_interval;
        loop {
            if cancel.is_cancelled() {
                debug!("Consumer loop cancelled, stopping");
                break;
            }

            self.drain_once();
            action.on_drain(&self.streams);

            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
    }

    pub fn streams(&self) -> &ChannelStreams {
        &self.streams
    }

    pub fn into_streams(self) -> ChannelStreams {
        self.streams
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for StreamingPipeline {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

impl fmt::Debug for StreamingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingPipeline")
            .field("samples_per_channel", &self.streams.samples_per_channel())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
