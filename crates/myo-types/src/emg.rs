//! EMG notification frame decoding.
//!
//! Each EMG notification carries exactly 16 signed bytes: two consecutive
//! time-steps of all eight channels. Byte `i` in `0..8` is channel `i` at
//! time-step 0, byte `i` in `8..16` is channel `i - 8` at time-step 1.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Number of EMG channels (electrode pods) on the armband.
pub const EMG_CHANNELS: usize = 8;

/// Number of time-steps carried by one notification.
pub const SAMPLES_PER_FRAME: usize = 2;

/// Exact size in bytes of an EMG notification payload.
pub const EMG_FRAME_LEN: usize = EMG_CHANNELS * SAMPLES_PER_FRAME;

/// One decoded EMG sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmgSample {
    /// Channel index, `0..8`.
    pub channel: usize,
    /// Time-step within the frame, `0` or `1`.
    pub time_step: usize,
    /// Raw sample value.
    pub value: i8,
}

/// A decoded 16-byte EMG notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmgFrame {
    samples: [i8; EMG_FRAME_LEN],
}

impl EmgFrame {
    /// Decode an EMG notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidFrameLength`] unless `data` is exactly
    /// [`EMG_FRAME_LEN`] bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let raw: &[u8; EMG_FRAME_LEN] =
            data.try_into().map_err(|_| ParseError::InvalidFrameLength {
                expected: EMG_FRAME_LEN,
                actual: data.len(),
            })?;
        Ok(Self {
            samples: raw.map(|b| b as i8),
        })
    }

    /// Build a frame from two time-steps of channel values.
    pub fn from_time_steps(first: [i8; EMG_CHANNELS], second: [i8; EMG_CHANNELS]) -> Self {
        let mut samples = [0i8; EMG_FRAME_LEN];
        samples[..EMG_CHANNELS].copy_from_slice(&first);
        samples[EMG_CHANNELS..].copy_from_slice(&second);
        Self { samples }
    }

    /// The raw samples in wire order.
    pub fn as_slice(&self) -> &[i8; EMG_FRAME_LEN] {
        &self.samples
    }

    /// All channel values for one time-step.
    ///
    /// # Panics
    ///
    /// Panics if `time_step >= SAMPLES_PER_FRAME`.
    pub fn time_step(&self, time_step: usize) -> &[i8] {
        let start = time_step * EMG_CHANNELS;
        &self.samples[start..start + EMG_CHANNELS]
    }

    /// The samples of one channel, oldest first.
    pub fn channel(&self, channel: usize) -> [i8; SAMPLES_PER_FRAME] {
        [self.samples[channel], self.samples[channel + EMG_CHANNELS]]
    }

    /// Iterate over `(channel, value)` pairs in wire order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, i8)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .map(|(i, &value)| (i % EMG_CHANNELS, value))
    }

    /// Iterate over fully annotated samples in wire order.
    pub fn samples(&self) -> impl Iterator<Item = EmgSample> + '_ {
        self.samples.iter().enumerate().map(|(i, &value)| EmgSample {
            channel: i % EMG_CHANNELS,
            time_step: i / EMG_CHANNELS,
            value,
        })
    }
}

/// Decode an EMG notification into its 16 ordered `(channel, value)` pairs.
///
/// ```
/// use myo_types::emg::decode_emg_frame;
///
/// let pairs = decode_emg_frame(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]).unwrap();
/// assert_eq!(pairs[0], (0, 1));
/// assert_eq!(pairs[8], (0, 9));
/// assert_eq!(pairs[15], (7, 16));
/// ```
///
/// # Errors
///
/// Returns [`ParseError::InvalidFrameLength`] unless `data` is exactly 16 bytes.
pub fn decode_emg_frame(data: &[u8]) -> ParseResult<[(usize, i8); EMG_FRAME_LEN]> {
    let frame = EmgFrame::from_bytes(data)?;
    let mut pairs = [(0usize, 0i8); EMG_FRAME_LEN];
    for (slot, pair) in pairs.iter_mut().zip(frame.pairs()) {
        *slot = pair;
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const COUNTING: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

    #[test]
    fn test_channel_mapping() {
        let frame = EmgFrame::from_bytes(&COUNTING).unwrap();
        assert_eq!(frame.channel(0), [1, 9]);
        assert_eq!(frame.channel(7), [8, 16]);
        assert_eq!(frame.time_step(0), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.time_step(1), &[9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn test_values_are_signed() {
        let mut data = [0u8; 16];
        data[0] = 0xFF;
        data[15] = 0x80;
        let frame = EmgFrame::from_bytes(&data).unwrap();
        assert_eq!(frame.channel(0), [-1, 0]);
        assert_eq!(frame.channel(7), [0, -128]);
    }

    #[test]
    fn test_samples_annotate_time_step() {
        let frame = EmgFrame::from_bytes(&COUNTING).unwrap();
        let samples: Vec<EmgSample> = frame.samples().collect();
        assert_eq!(samples.len(), 16);
        assert_eq!(
            samples[9],
            EmgSample {
                channel: 1,
                time_step: 1,
                value: 10
            }
        );
    }

    #[test]
    fn test_from_time_steps_matches_wire_layout() {
        let frame = EmgFrame::from_time_steps(
            [1, 2, 3, 4, 5, 6, 7, 8],
            [9, 10, 11, 12, 13, 14, 15, 16],
        );
        assert_eq!(frame, EmgFrame::from_bytes(&COUNTING).unwrap());
    }

    #[test]
    fn test_rejects_wrong_lengths() {
        for len in [0, 1, 8, 15, 17, 20, 32] {
            let data = vec![0u8; len];
            assert_eq!(
                decode_emg_frame(&data),
                Err(ParseError::InvalidFrameLength {
                    expected: 16,
                    actual: len
                })
            );
        }
    }

    proptest! {
        #[test]
        fn prop_decode_is_order_preserving(data in proptest::array::uniform16(any::<u8>())) {
            let pairs = decode_emg_frame(&data).unwrap();
            for (i, (channel, value)) in pairs.iter().enumerate() {
                prop_assert_eq!(*channel, i % 8);
                prop_assert_eq!(*value, data[i] as i8);
            }
        }

        #[test]
        fn prop_non_sixteen_lengths_fail(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(data.len() != EMG_FRAME_LEN);
            let is_length_error = matches!(
                decode_emg_frame(&data),
                Err(ParseError::InvalidFrameLength { .. })
            );
            prop_assert!(is_length_error);
        }
    }
}
