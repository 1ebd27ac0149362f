//! Protocol codec and types for the Myo EMG armband.
//!
//! This crate is pure encode/decode logic with no I/O, shared by the BLE
//! session layer (myo-core) and anything else that needs to speak the
//! armband's GATT protocol.
//!
//! # Features
//!
//! - Characteristic UUID derivation from four hex digit short codes
//! - Command frame encoding (set mode, unlock, set sleep)
//! - EMG notification decoding (2 time-steps x 8 channels)
//! - Basic-info and firmware-version decoding
//!
//! # Example
//!
//! ```
//! use myo_types::{Command, EmgFrame, EmgMode, ImuMode, ClassifierMode};
//!
//! let frame = Command::SetMode {
//!     emg: EmgMode::RecordRawEmg,
//!     imu: ImuMode::Off,
//!     classifier: ClassifierMode::Disabled,
//! }
//! .encode();
//! assert_eq!(frame, vec![0x01, 3, 0, 0, 0]);
//!
//! let emg = EmgFrame::from_bytes(&[0u8; 16]).unwrap();
//! assert_eq!(emg.channel(3), [0, 0]);
//! ```

pub mod command;
pub mod emg;
pub mod error;
pub mod types;
pub mod uuid;

pub use command::{
    ClassifierMode, Command, EmgMode, ImuMode, ModeConfig, SleepMode, UnlockMode,
    encode_set_mode, encode_set_sleep, encode_unlock,
};
pub use emg::{
    EMG_CHANNELS, EMG_FRAME_LEN, EmgFrame, EmgSample, SAMPLES_PER_FRAME, decode_emg_frame,
};
pub use error::{ParseError, ParseResult};
pub use types::{DeviceInfo, FirmwareVersion, decode_device_info, decode_firmware_version};
pub use uuid::{CharacteristicCode, expand_characteristic};
