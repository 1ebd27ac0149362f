//! BLE session layer for the Myo EMG armband.
//!
//! This crate connects to an armband, configures it through the command
//! characteristic and streams raw EMG from its four notification
//! characteristics into eight per-channel buffers.
//!
//! # Features
//!
//! - **Device session**: sequential command writes, characteristic reads,
//!   subscription bookkeeping and guaranteed teardown
//! - **Streaming pipeline**: a non-blocking producer on the notification
//!   path and a cooperative consumer loop that drains in arrival order
//! - **Session runner**: the whole connect, configure, stream and teardown
//!   lifecycle, with observable state and duration or signal based stops
//! - **Transport abstraction**: a btleplug transport for real hardware and
//!   an in-memory mock with failure injection for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use myo_core::{BleConnector, ChannelStreams, RunnerConfig, StopCondition, run_session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut print_latest = |streams: &ChannelStreams| {
//!         if let Some(latest) = streams.latest() {
//!             println!("{:?}", latest);
//!         }
//!     };
//!
//!     let streams = run_session(
//!         BleConnector::new(),
//!         "F3:F8:2E:FB:8C:3C",
//!         RunnerConfig::default(),
//!         &mut print_latest,
//!         StopCondition::After(Duration::from_secs(10)),
//!     )
//!     .await?;
//!
//!     println!("{} samples per channel", streams.samples_per_channel());
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod session;
pub mod traits;

pub use myo_types::uuid;

pub use ble::{BleConnector, BleTransport, ConnectionConfig};
pub use error::{DeviceNotFoundReason, Error, Result};
pub use pipeline::{
    ChannelStreams, DecodeWarning, DecodeWarningKind, EmgProducer, HandleTable, PipelineOptions,
    PipelineOptionsBuilder, PipelineStats, PipelineStatsSnapshot, StreamingPipeline,
};
pub use retry::{RetryConfig, with_retry};
pub use runner::{RunnerConfig, SessionRunner, SessionState, StopCondition, run_session, setup_error};
pub use session::DeviceSession;
pub use traits::{ConsumerAction, Connector, NoSetup, NotificationHandler, SetupHook, Transport};

pub use myo_types::{
    ClassifierMode, Command, DeviceInfo, EmgFrame, EmgMode, FirmwareVersion, ImuMode, ModeConfig,
    ParseError, SleepMode, UnlockMode,
};
