//! PCM stream format description.
//!
//! [`AudioFormat`] is compared field by field by the filter chain to decide
//! which conversion stages a stream needs on its way to the output device.

/// Description of an interleaved PCM stream.
///
/// Immutable value type. Two formats are "the same stream layout" exactly when
/// all four fields are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// Width of a single channel sample in bytes (1 or 2 for the integer
    /// conversion kernels; the device target is always 2).
    pub bytes_per_channel: u8,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Whether samples are signed integers.
    pub is_signed: bool,
}

impl AudioFormat {
    /// 16-bit signed interleaved PCM, the pipeline's device-facing layout.
    pub fn signed16(channels: u16, rate: u32) -> Self {
        Self {
            bytes_per_channel: 2,
            channels,
            rate,
            is_signed: true,
        }
    }

    /// Bytes per interleaved frame (all channels of one sample instant).
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_channel as usize * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_counts_all_channels() {
        let fmt = AudioFormat::signed16(2, 44_100);
        assert_eq!(fmt.frame_bytes(), 4);
        let mono8 = AudioFormat {
            bytes_per_channel: 1,
            channels: 1,
            rate: 22_050,
            is_signed: false,
        };
        assert_eq!(mono8.frame_bytes(), 1);
    }

    #[test]
    fn equality_is_field_by_field() {
        let a = AudioFormat::signed16(2, 44_100);
        let mut b = a;
        assert_eq!(a, b);
        b.rate = 48_000;
        assert_ne!(a, b);
    }
}
