//! Connection retry with exponential backoff.
//!
//! Only establishing a connection is ever retried. Commands, reads and
//! subscriptions fail the session on the first error so that the device is
//! never left half-configured by a repeated write.
//!
//! # Example
//!
//! ```
//! use myo_core::{Error, RetryConfig, with_retry};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::for_connect();
//! let value = with_retry(&config, "connect", || async { Ok::<_, Error>(7) }).await?;
//! assert_eq!(value, 7);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{DeviceNotFoundReason, Error, Result};

/// Backoff settings for connection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first one (0 disables retrying).
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Stretch each delay by up to 25% at random.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryConfig {
    /// Retry up to `max_retries` times with the connect backoff curve.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::for_connect()
        }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::for_connect()
        }
    }

    /// Patient retries for a device that may still be waking up or held
    /// by another central.
    pub fn for_connect() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::invalid_config(
                "initial_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. The last error is returned on exhaustion.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries && is_retryable(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether another connection attempt could plausibly succeed.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Timeout { .. } | Error::Bluetooth(_) | Error::NotConnected => true,
        // Out of range or still advertising slowly.
        Error::DeviceNotFound(DeviceNotFoundReason::NotFound { .. }) => true,
        Error::DeviceNotFound(_) => false,
        Error::TransportWrite { .. }
        | Error::TransportRead { .. }
        | Error::Subscription { .. } => false,
        Error::Protocol(_)
        | Error::CharacteristicNotFound { .. }
        | Error::InvalidConfig(_)
        | Error::Setup(_) => false,
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
