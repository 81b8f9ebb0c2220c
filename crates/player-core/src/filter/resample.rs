//! Sample-rate conversion stage.
//!
//! Wraps Rubato's streaming async sinc resampler. The stage converts the
//! buffer's 16-bit samples to `f32` at its boundary, resamples, and writes
//! 16-bit samples back in place. Variable-length decoder units are handled
//! with `partial_len` indexing; the resampler keeps its own history across
//! calls, which [`ResampleFilter::reset`] clears after a seek.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use super::{read_i16, write_i16};
use crate::buffer::AudioBuffer;
use crate::error::PlayerError;
use crate::format::AudioFormat;

const CHUNK_FRAMES: usize = 1024;

pub struct ResampleFilter {
    src: AudioFormat,
    dst: AudioFormat,
    ratio: f64,
    resampler: Box<dyn Resampler<f32>>,
    in_f32: Vec<f32>,
    out_f32: Vec<f32>,
}

impl std::fmt::Debug for ResampleFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResampleFilter")
            .field("src_rate", &self.src.rate)
            .field("dst_rate", &self.dst.rate)
            .finish()
    }
}

impl ResampleFilter {
    pub fn new(src: AudioFormat, dst: AudioFormat) -> Result<Self, PlayerError> {
        let channels = src.channels as usize;
        let f_ratio = dst.rate as f64 / src.rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let resampler: Box<dyn Resampler<f32>> = Box::new(
            Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                CHUNK_FRAMES,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| {
                PlayerError::UnsupportedConversion(format!(
                    "resampler init {} -> {} Hz: {e}",
                    src.rate, dst.rate
                ))
            })?,
        );

        let out_frames = resampler.output_frames_max().max(CHUNK_FRAMES);
        Ok(Self {
            src,
            dst,
            ratio: f_ratio,
            resampler,
            in_f32: Vec::new(),
            out_f32: vec![0.0; out_frames * channels],
        })
    }

    pub fn dst_format(&self) -> AudioFormat {
        self.dst
    }

    pub fn required_output_bytes(&self, input_bytes: usize) -> usize {
        let scaled = (input_bytes as f64 * self.ratio).ceil() as usize;
        scaled + self.dst.frame_bytes() * 64
    }

    /// Clear resampler history so no stale samples bleed across a seek.
    pub fn reset(&mut self) {
        self.resampler.reset();
    }

    pub(super) fn run(&mut self, buf: &mut AudioBuffer) {
        let channels = self.src.channels as usize;
        let total_frames = buf.samples();
        let values = total_frames * channels;

        self.in_f32.clear();
        self.in_f32.reserve(values);
        for i in 0..values {
            self.in_f32.push(read_i16(buf.bytes(), i * 2) as f32 / 32_768.0);
        }

        let mut indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };

        let mut produced: Vec<f32> = Vec::with_capacity(self.out_f32.len());
        let mut offset = 0;
        while offset < total_frames {
            let n = (total_frames - offset).min(CHUNK_FRAMES);
            let input = &self.in_f32[offset * channels..(offset + n) * channels];

            let input_adapter = match InterleavedSlice::new(input, channels, n) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("interleaved slice (input) error: {e:#}");
                    break;
                }
            };
            let out_capacity_frames = self.out_f32.len() / channels;
            let mut output_adapter =
                match InterleavedSlice::new_mut(&mut self.out_f32, channels, out_capacity_frames) {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::error!("interleaved slice (output) error: {e:#}");
                        break;
                    }
                };

            indexing.input_offset = 0;
            indexing.output_offset = 0;
            indexing.partial_len = if n < CHUNK_FRAMES { Some(n) } else { None };

            let (_nbr_in, nbr_out) = match self.resampler.process_into_buffer(
                &input_adapter,
                &mut output_adapter,
                Some(&indexing),
            ) {
                Ok(x) => x,
                Err(e) => {
                    tracing::error!("resampler process error: {e:#}");
                    break;
                }
            };

            produced.extend_from_slice(&self.out_f32[..nbr_out * channels]);
            offset += n;
        }

        let out_frames = produced.len() / channels;
        buf.ensure_byte_capacity(out_frames * channels * 2);
        let data = buf.storage_mut();
        for (i, &s) in produced.iter().enumerate() {
            let clamped = (s * 32_768.0).round().clamp(-32_768.0, 32_767.0);
            write_i16(data, i * 2, clamped as i16);
        }
        buf.set_layout(2, self.src.channels, out_frames);
        buf.set_position_scale(self.src.rate as f64 / self.dst.rate as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(rate: u32) -> AudioFormat {
        AudioFormat::signed16(2, rate)
    }

    #[test]
    fn construction_succeeds_for_common_ratios() {
        assert!(ResampleFilter::new(fmt(44_100), fmt(48_000)).is_ok());
        assert!(ResampleFilter::new(fmt(48_000), fmt(44_100)).is_ok());
        assert!(ResampleFilter::new(fmt(22_050), fmt(96_000)).is_ok());
    }

    #[test]
    fn required_output_bytes_scales_with_ratio() {
        let up = ResampleFilter::new(fmt(24_000), fmt(48_000)).unwrap();
        assert!(up.required_output_bytes(1000) >= 2000);
        let down = ResampleFilter::new(fmt(48_000), fmt(24_000)).unwrap();
        assert!(down.required_output_bytes(1000) >= 500);
    }

    #[test]
    fn silence_in_is_silence_out() {
        let mut filter = ResampleFilter::new(fmt(44_100), fmt(48_000)).unwrap();
        let mut buf = AudioBuffer::alloc(2, 2, 2048);
        buf.ensure_byte_capacity(filter.required_output_bytes(buf.byte_len()));
        filter.run(&mut buf);
        assert_eq!(buf.channels(), 2);
        assert!(buf.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn output_cursor_maps_back_to_source_rate() {
        let mut filter = ResampleFilter::new(fmt(44_100), fmt(88_200)).unwrap();
        let mut buf = AudioBuffer::alloc(2, 2, 1024);
        buf.ensure_byte_capacity(filter.required_output_bytes(buf.byte_len()));
        filter.run(&mut buf);
        assert!((buf.position_scale() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reset_does_not_disturb_subsequent_runs() {
        let mut filter = ResampleFilter::new(fmt(48_000), fmt(44_100)).unwrap();
        let mut buf = AudioBuffer::alloc(2, 2, 512);
        buf.ensure_byte_capacity(filter.required_output_bytes(buf.byte_len()));
        filter.run(&mut buf);
        filter.reset();
        let mut again = AudioBuffer::alloc(2, 2, 512);
        again.ensure_byte_capacity(filter.required_output_bytes(again.byte_len()));
        filter.run(&mut again);
        assert!(again.bytes().iter().all(|&b| b == 0));
    }
}
