//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use myo_types::{EmgMode, ImuMode};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "myo")]
#[command(author, version, about = "Stream EMG from a Myo armband", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read serial, firmware, battery and name from the armband
    Info {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Stream raw EMG until the duration elapses or Ctrl-C
    Stream(StreamArgs),

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Reusable device selection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device address, or use MYO_DEVICE env var
    #[arg(short, long, env = "MYO_DEVICE")]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct StreamArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(short = 'D', long)]
    pub duration: Option<f64>,

    /// Milliseconds between drains of the sample queue
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Milliseconds between printed channel summaries (0 disables)
    #[arg(long)]
    pub summary_ms: Option<u64>,

    /// EMG mode to request
    #[arg(long, value_enum)]
    pub emg: Option<EmgModeArg>,

    /// IMU mode to request
    #[arg(long, value_enum)]
    pub imu: Option<ImuModeArg>,

    /// Connection attempts to retry before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Write every recorded sample to this file when done
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Format of the output file
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file location
    Path,
    /// Print the effective configuration
    Show,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmgModeArg {
    Raw,
    Filtered,
    Off,
}

impl From<EmgModeArg> for EmgMode {
    fn from(arg: EmgModeArg) -> Self {
        match arg {
            EmgModeArg::Raw => EmgMode::RecordRawEmg,
            EmgModeArg::Filtered => EmgMode::SendFiltered,
            EmgModeArg::Off => EmgMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImuModeArg {
    Off,
    Data,
    Events,
    All,
    Raw,
}

impl From<ImuModeArg> for ImuMode {
    fn from(arg: ImuModeArg) -> Self {
        match arg {
            ImuModeArg::Off => ImuMode::Off,
            ImuModeArg::Data => ImuMode::SendData,
            ImuModeArg::Events => ImuMode::SendEvents,
            ImuModeArg::All => ImuMode::SendAll,
            ImuModeArg::Raw => ImuMode::SendRaw,
        }
    }
}
