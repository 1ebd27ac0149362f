//! Error types for myo-core.
//!
//! This module defines all error types that can occur while running a
//! session against a Myo armband.
//!
//! # Error Families
//!
//! | Family | Variants | Retry? |
//! |--------|----------|--------|
//! | Protocol | [`Error::Protocol`] | Never. A malformed payload or code is a programming error or a protocol-version mismatch |
//! | Transport | [`Error::TransportWrite`], [`Error::TransportRead`], [`Error::Subscription`], [`Error::Bluetooth`], [`Error::NotConnected`], [`Error::Timeout`] | Not automatically. The session is torn down and the error surfaced |
//! | Connection | [`Error::DeviceNotFound`] | Only at the runner boundary via [`crate::RetryConfig`] |
//! | Usage | [`Error::InvalidConfig`], [`Error::Setup`] | Never |
//!
//! GATT operations report a missing characteristic
//! ([`Error::CharacteristicNotFound`]) or an expired operation timeout as the
//! reason inside the write, read or subscription error for that operation.
//! [`Error::Timeout`] on its own comes from connection setup.
//!
//! A single malformed EMG notification is *not* an error: the pipeline drops
//! it and reports a [`crate::DecodeWarning`] instead, so one bad frame never
//! aborts a session.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use myo_types::ParseError;

/// Errors that can occur when communicating with a Myo armband.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed code, frame, or payload.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Writing to a characteristic failed.
    #[error("Write failed to characteristic {characteristic}: {reason}")]
    TransportWrite {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Reading a characteristic failed.
    #[error("Read failed from characteristic {characteristic}: {reason}")]
    TransportRead {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The transport rejected a notification (un)registration.
    #[error("Subscription failed for characteristic {characteristic}: {reason}")]
    Subscription {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found while connecting.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: Uuid,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied setup hook failed.
    #[error("Setup failed: {0}")]
    Setup(String),
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with the given address was not seen.
    NotFound { address: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { address } => write!(f, "device '{}' not found", address),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific address.
    pub fn device_not_found(address: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            address: address.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a write failure for a characteristic.
    pub fn write_failed(characteristic: Uuid, reason: impl ToString) -> Self {
        Self::TransportWrite {
            characteristic,
            reason: reason.to_string(),
        }
    }

    /// Create a read failure for a characteristic.
    pub fn read_failed(characteristic: Uuid, reason: impl ToString) -> Self {
        Self::TransportRead {
            characteristic,
            reason: reason.to_string(),
        }
    }

    /// Create a subscription failure for a characteristic.
    pub fn subscription_failed(characteristic: Uuid, reason: impl ToString) -> Self {
        Self::Subscription {
            characteristic,
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error belongs to the protocol family.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Whether this error came from the transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::TransportWrite { .. }
                | Error::TransportRead { .. }
                | Error::Subscription { .. }
                | Error::Bluetooth(_)
                | Error::NotConnected
                | Error::Timeout { .. }
        )
    }
}

/// Result type alias using myo-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use myo_types::uuid::COMMAND;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("F3:F8:2E:FB:8C:3C");
        assert!(err.to_string().contains("F3:F8:2E:FB:8C:3C"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::write_failed(COMMAND.uuid(), "gatt error");
        assert!(err.to_string().contains("d5060401"));
        assert!(err.to_string().contains("gatt error"));

        let err = Error::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::truncated(8, 2).into();
        assert!(err.is_protocol());
        assert!(!err.is_transport());
        assert!(err.to_string().contains("Protocol error"));
    }

    #[test]
    fn test_transport_classification() {
        let uuid = COMMAND.uuid();
        assert!(Error::write_failed(uuid, "x").is_transport());
        assert!(Error::read_failed(uuid, "x").is_transport());
        assert!(Error::subscription_failed(uuid, "x").is_transport());
        assert!(!Error::device_not_found("x").is_transport());
        assert!(!Error::Setup("x".into()).is_transport());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
