//! Channel-count conversion kernels.
//!
//! Selected by a small dispatch table keyed on (source channels, destination
//! channels). All kernels operate on 16-bit signed samples in place; the
//! averaging paths widen to 32 bits so the sum cannot overflow, then divide
//! by two. Integer division truncates toward zero, matching the behavior
//! this pipeline inherited (see DESIGN.md).

use super::{read_i16, write_i16};
use crate::buffer::AudioBuffer;
use crate::format::AudioFormat;

#[derive(Clone, Copy, Debug)]
enum MixKind {
    /// Duplicate the single channel into both outputs.
    OneToTwo,
    /// Average left and right.
    TwoToOne,
    /// Fold the first two of N channels down to one.
    ManyToOne,
    /// Keep the first two of N channels.
    ManyToTwo,
}

/// In-place channel mixing stage.
#[derive(Debug)]
pub struct ChannelMixFilter {
    src: AudioFormat,
    dst: AudioFormat,
    kind: MixKind,
}

impl ChannelMixFilter {
    /// Pick a kernel for the channel pair, or `None` when source equals
    /// destination or the destination layout is unsupported.
    pub fn create(src: AudioFormat, dst: AudioFormat) -> Option<Self> {
        let kind = match (src.channels, dst.channels) {
            (1, 1) | (2, 2) => return None,
            (2, 1) => MixKind::TwoToOne,
            (_, 1) => MixKind::ManyToOne,
            (1, 2) => MixKind::OneToTwo,
            (_, 2) => MixKind::ManyToTwo,
            _ => return None,
        };
        Some(Self { src, dst, kind })
    }

    pub fn dst_format(&self) -> AudioFormat {
        self.dst
    }

    pub fn required_output_bytes(&self, input_bytes: usize) -> usize {
        input_bytes * self.dst.channels as usize / self.src.channels as usize
    }

    pub(super) fn run(&self, buf: &mut AudioBuffer) {
        let samples = buf.samples();
        let src_ch = self.src.channels as usize;
        let data = buf.storage_mut();
        match self.kind {
            MixKind::OneToTwo => {
                // Expand back to front so reads stay ahead of writes.
                for i in (0..samples).rev() {
                    let s = read_i16(data, i * 2);
                    write_i16(data, i * 4, s);
                    write_i16(data, i * 4 + 2, s);
                }
            }
            MixKind::TwoToOne => {
                for i in 0..samples {
                    let left = read_i16(data, i * 4) as i32;
                    let right = read_i16(data, i * 4 + 2) as i32;
                    write_i16(data, i * 2, ((left + right) / 2) as i16);
                }
            }
            MixKind::ManyToOne => {
                for i in 0..samples {
                    let frame = i * src_ch * 2;
                    let a = read_i16(data, frame) as i32;
                    let b = read_i16(data, frame + 2) as i32;
                    write_i16(data, i * 2, ((a + b) / 2) as i16);
                }
            }
            MixKind::ManyToTwo => {
                for i in 0..samples {
                    let frame = i * src_ch * 2;
                    let a = read_i16(data, frame);
                    let b = read_i16(data, frame + 2);
                    write_i16(data, i * 4, a);
                    write_i16(data, i * 4 + 2, b);
                }
            }
        }
        let (bpc, ch) = (self.dst.bytes_per_channel, self.dst.channels);
        buf.set_layout(bpc, ch, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(channels: u16) -> AudioFormat {
        AudioFormat::signed16(channels, 44_100)
    }

    fn buffer_from(samples: &[i16], channels: u16) -> AudioBuffer {
        let frames = samples.len() / channels as usize;
        let mut buf = AudioBuffer::alloc(2, channels, frames);
        let data = buf.storage_mut();
        for (i, &s) in samples.iter().enumerate() {
            write_i16(data, i * 2, s);
        }
        buf
    }

    fn collect(buf: &AudioBuffer) -> Vec<i16> {
        buf.bytes()
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn identity_pairs_yield_no_stage() {
        assert!(ChannelMixFilter::create(fmt(1), fmt(1)).is_none());
        assert!(ChannelMixFilter::create(fmt(2), fmt(2)).is_none());
        // Unsupported destination layouts also decay to identity.
        assert!(ChannelMixFilter::create(fmt(2), fmt(6)).is_none());
    }

    #[test]
    fn mono_to_stereo_duplicates_bit_identically() {
        let filter = ChannelMixFilter::create(fmt(1), fmt(2)).unwrap();
        let mut buf = buffer_from(&[5, -7, i16::MIN], 1);
        buf.ensure_byte_capacity(filter.required_output_bytes(buf.byte_len()));
        filter.run(&mut buf);
        assert_eq!(collect(&buf), vec![5, 5, -7, -7, i16::MIN, i16::MIN]);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.samples(), 3);
    }

    #[test]
    fn stereo_to_mono_averages_without_overflow() {
        let filter = ChannelMixFilter::create(fmt(2), fmt(1)).unwrap();
        let mut buf = buffer_from(&[100, -100, 32_767, 32_767, -32_768, -32_768], 2);
        filter.run(&mut buf);
        assert_eq!(collect(&buf), vec![0, 32_767, -32_768]);
        assert_eq!(buf.channels(), 1);
    }

    #[test]
    fn stereo_to_mono_truncates_toward_zero() {
        let filter = ChannelMixFilter::create(fmt(2), fmt(1)).unwrap();
        let mut buf = buffer_from(&[1, 2, -1, -2], 2);
        filter.run(&mut buf);
        // (1+2)/2 = 1, (-1-2)/2 = -1 with truncating division.
        assert_eq!(collect(&buf), vec![1, -1]);
    }

    #[test]
    fn many_to_one_folds_first_two_channels() {
        let filter = ChannelMixFilter::create(fmt(4), fmt(1)).unwrap();
        let mut buf = buffer_from(&[10, 20, 999, 999, -10, -20, 999, 999], 4);
        filter.run(&mut buf);
        assert_eq!(collect(&buf), vec![15, -15]);
    }

    #[test]
    fn many_to_two_keeps_first_two_channels() {
        let filter = ChannelMixFilter::create(fmt(3), fmt(2)).unwrap();
        let mut buf = buffer_from(&[1, 2, 999, 3, 4, 999], 3);
        filter.run(&mut buf);
        assert_eq!(collect(&buf), vec![1, 2, 3, 4]);
    }

    #[test]
    fn required_output_bytes_scales_by_channel_ratio() {
        let up = ChannelMixFilter::create(fmt(1), fmt(2)).unwrap();
        assert_eq!(up.required_output_bytes(100), 200);
        let down = ChannelMixFilter::create(fmt(2), fmt(1)).unwrap();
        assert_eq!(down.required_output_bytes(100), 50);
    }
}
