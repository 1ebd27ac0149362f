//! Command encoding for the Myo command characteristic.
//!
//! Every command is a frame of the form `[opcode, payload_len, payload...]`.
//! The payload length byte is always derived from the payload itself, so a
//! frame whose length byte disagrees with its fields cannot be built.

use core::fmt;

use bytes::{Buf, BufMut};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Set EMG, IMU and classifier modes.
/// Format: `[SET_MODE, 3, emg_mode, imu_mode, classifier_mode]`
pub const SET_MODE: u8 = 0x01;

/// Lock or unlock the device.
/// Format: `[UNLOCK, 1, unlock_mode]`
pub const UNLOCK: u8 = 0x02;

/// Set the sleep policy.
/// Format: `[SET_SLEEP, 1, sleep_mode]`
pub const SET_SLEEP: u8 = 0x09;

/// Size of the `[opcode, payload_len]` header.
pub const HEADER_LEN: usize = 2;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Every value of this mode, in wire order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire byte for this mode.
            pub const fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ParseError;

            fn try_from(value: u8) -> ParseResult<Self> {
                match value {
                    $( v if v == $value => Ok($name::$variant), )+
                    other => Err(ParseError::InvalidValue(format!(
                        "{} 0x{:02X} is not a known value",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// EMG streaming mode.
    EmgMode {
        /// Stream raw, unfiltered EMG samples.
        #[default]
        RecordRawEmg = 0x00,
        /// Stream filtered EMG samples.
        SendFiltered = 0x01,
        /// Do not stream EMG.
        Off = 0x02,
    }
}

wire_enum! {
    /// IMU streaming mode.
    ImuMode {
        /// Do not stream IMU data.
        #[default]
        Off = 0x00,
        /// Stream orientation, accelerometer and gyroscope data.
        SendData = 0x01,
        /// Stream motion events only.
        SendEvents = 0x02,
        /// Stream data and events.
        SendAll = 0x03,
        /// Stream raw IMU data.
        SendRaw = 0x04,
    }
}

wire_enum! {
    /// On-board gesture classifier mode.
    ClassifierMode {
        /// Classifier disabled.
        #[default]
        Disabled = 0x00,
        /// Classifier enabled.
        Enabled = 0x01,
    }
}

wire_enum! {
    /// Lock behaviour requested by an unlock command.
    UnlockMode {
        /// Re-lock immediately.
        Lock = 0x00,
        /// Unlock for a short fixed period.
        Timed = 0x01,
        /// Remain unlocked until an explicit lock command.
        #[default]
        Hold = 0x02,
    }
}

wire_enum! {
    /// Device sleep policy.
    SleepMode {
        /// Sleep after a period of inactivity.
        Normal = 0x00,
        /// Never sleep while connected.
        #[default]
        NeverSleep = 0x01,
    }
}

/// A command for the device's command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Configure EMG, IMU and classifier streaming.
    SetMode {
        emg: EmgMode,
        imu: ImuMode,
        classifier: ClassifierMode,
    },
    /// Lock or unlock the device.
    Unlock(UnlockMode),
    /// Set the device's sleep policy.
    SetSleep(SleepMode),
}

impl Command {
    /// The opcode byte of this command.
    pub const fn opcode(&self) -> u8 {
        match self {
            Command::SetMode { .. } => SET_MODE,
            Command::Unlock(_) => UNLOCK,
            Command::SetSleep(_) => SET_SLEEP,
        }
    }

    /// The payload fields of this command, in wire order.
    fn payload(&self) -> Vec<u8> {
        match *self {
            Command::SetMode {
                emg,
                imu,
                classifier,
            } => vec![emg.as_u8(), imu.as_u8(), classifier.as_u8()],
            Command::Unlock(mode) => vec![mode.as_u8()],
            Command::SetSleep(mode) => vec![mode.as_u8()],
        }
    }

    /// Serialize the command into its wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.put_u8(self.opcode());
        frame.put_u8(payload.len() as u8);
        frame.put_slice(&payload);
        frame
    }

    /// Parse a wire frame back into a command.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedPayload`] if the frame is shorter than
    /// its header says, and [`ParseError::InvalidValue`] for an unknown
    /// opcode, a length byte that does not match the opcode, or an
    /// out-of-range mode.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::truncated(HEADER_LEN, data.len()));
        }

        let mut buf = data;
        let opcode = buf.get_u8();
        let len = usize::from(buf.get_u8());
        if buf.remaining() < len {
            return Err(ParseError::truncated(HEADER_LEN + len, data.len()));
        }
        if buf.remaining() > len {
            return Err(ParseError::InvalidValue(format!(
                "frame has {} trailing bytes",
                buf.remaining() - len
            )));
        }

        let expected_len = match opcode {
            SET_MODE => 3,
            UNLOCK | SET_SLEEP => 1,
            other => {
                return Err(ParseError::InvalidValue(format!(
                    "unknown opcode 0x{:02X}",
                    other
                )));
            }
        };
        if len != expected_len {
            return Err(ParseError::InvalidValue(format!(
                "opcode 0x{:02X} carries {} payload bytes, got {}",
                opcode, expected_len, len
            )));
        }

        match opcode {
            SET_MODE => Ok(Command::SetMode {
                emg: EmgMode::try_from(buf.get_u8())?,
                imu: ImuMode::try_from(buf.get_u8())?,
                classifier: ClassifierMode::try_from(buf.get_u8())?,
            }),
            UNLOCK => Ok(Command::Unlock(UnlockMode::try_from(buf.get_u8())?)),
            _ => Ok(Command::SetSleep(SleepMode::try_from(buf.get_u8())?)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMode {
                emg,
                imu,
                classifier,
            } => write!(f, "set_mode(emg={:?}, imu={:?}, classifier={:?})", emg, imu, classifier),
            Command::Unlock(mode) => write!(f, "unlock({:?})", mode),
            Command::SetSleep(mode) => write!(f, "set_sleep({:?})", mode),
        }
    }
}

/// Encode a set-mode command.
pub fn encode_set_mode(emg: EmgMode, imu: ImuMode, classifier: ClassifierMode) -> Vec<u8> {
    Command::SetMode {
        emg,
        imu,
        classifier,
    }
    .encode()
}

/// Encode an unlock command.
pub fn encode_unlock(mode: UnlockMode) -> Vec<u8> {
    Command::Unlock(mode).encode()
}

/// Encode a set-sleep command.
pub fn encode_set_sleep(mode: SleepMode) -> Vec<u8> {
    Command::SetSleep(mode).encode()
}

/// The full operating-mode configuration applied when a session starts.
///
/// Defaults stream raw EMG with IMU and classifier off, keep the device
/// unlocked, and prevent it from sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ModeConfig {
    pub emg: EmgMode,
    pub imu: ImuMode,
    pub classifier: ClassifierMode,
    pub unlock: UnlockMode,
    pub sleep: SleepMode,
}

impl ModeConfig {
    /// The configuration commands in the order the device expects them:
    /// unlock, then sleep policy, then streaming mode.
    pub fn commands(&self) -> [Command; 3] {
        [
            Command::Unlock(self.unlock),
            Command::SetSleep(self.sleep),
            Command::SetMode {
                emg: self.emg,
                imu: self.imu,
                classifier: self.classifier,
            },
        ]
    }
}
