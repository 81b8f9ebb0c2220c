//! Format-conversion filter chain.
//!
//! Converts decoded buffers from a decoder's native format to the output
//! device format through an ordered sequence of stages. Stage order is
//! load-bearing and fixed by priority: signedness, then bit width, then
//! channel mixing, then gain, then resampling. A chain holds at most one
//! stage per slot, and a stage is only present when the corresponding format
//! field actually differs between source and destination.
//!
//! The chain sizes one scratch buffer for a whole pass up front (the maximum
//! byte requirement across all stages) and runs every stage in place.

mod channel_mix;
mod resample;

pub use channel_mix::ChannelMixFilter;
pub use resample::ResampleFilter;

use crate::buffer::AudioBuffer;
use crate::decoder::Decoder;
use crate::error::PlayerError;
use crate::format::AudioFormat;

/// Priority slot of a conversion stage. The derived ordering is the
/// execution order of the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterSlot {
    Signedness,
    BitShift,
    ChannelMix,
    Gain,
    Resample,
}

/// Read one native-endian i16 sample at a byte offset.
pub(crate) fn read_i16(bytes: &[u8], off: usize) -> i16 {
    i16::from_ne_bytes([bytes[off], bytes[off + 1]])
}

/// Write one native-endian i16 sample at a byte offset.
pub(crate) fn write_i16(bytes: &mut [u8], off: usize, value: i16) {
    bytes[off..off + 2].copy_from_slice(&value.to_ne_bytes());
}

/// Flips the sign convention of every sample word by toggling the high bit.
#[derive(Debug)]
pub struct SignednessFilter {
    src: AudioFormat,
    dst: AudioFormat,
}

impl SignednessFilter {
    fn run(&self, buf: &mut AudioBuffer) {
        let width = self.src.bytes_per_channel as usize;
        let len = buf.byte_len();
        let data = buf.storage_mut();
        match width {
            1 => {
                for b in &mut data[..len] {
                    *b ^= 0x80;
                }
            }
            _ => {
                // 16-bit words: the sign bit lives in the high byte.
                let mut off = if cfg!(target_endian = "little") { 1 } else { 0 };
                while off < len {
                    data[off] ^= 0x80;
                    off += 2;
                }
            }
        }
        let (bpc, ch) = (self.dst.bytes_per_channel, buf.channels());
        let samples = buf.samples();
        buf.set_layout(bpc, ch, samples);
    }
}

/// Widens or narrows the per-channel sample width by shifting.
#[derive(Debug)]
pub struct BitShiftFilter {
    src: AudioFormat,
    dst: AudioFormat,
}

impl BitShiftFilter {
    fn run(&self, buf: &mut AudioBuffer) {
        let samples = buf.samples();
        let channels = buf.channels() as usize;
        let values = samples * channels;
        let signed = self.dst.is_signed;
        let data = buf.storage_mut();
        match (self.src.bytes_per_channel, self.dst.bytes_per_channel) {
            (1, 2) => {
                // Expand in place back to front so reads stay ahead of writes.
                for i in (0..values).rev() {
                    let wide = if signed {
                        (data[i] as i8 as i16) << 8
                    } else {
                        ((data[i] as u16) << 8) as i16
                    };
                    write_i16(data, i * 2, wide);
                }
            }
            (2, 1) => {
                for i in 0..values {
                    let narrow = (read_i16(data, i * 2) >> 8) as u8;
                    data[i] = narrow;
                }
            }
            _ => {}
        }
        let (bpc, ch) = (self.dst.bytes_per_channel, buf.channels());
        buf.set_layout(bpc, ch, samples);
    }
}

/// Scales every sample by a constant factor, saturating at the sample range
/// of the format flowing through its slot.
#[derive(Debug)]
pub struct GainFilter {
    format: AudioFormat,
    factor: f64,
}

impl GainFilter {
    pub fn factor(&self) -> f64 {
        self.factor
    }

    fn run(&self, buf: &mut AudioBuffer) {
        let len = buf.byte_len();
        let data = buf.storage_mut();
        match (self.format.bytes_per_channel, self.format.is_signed) {
            (1, true) => {
                for b in &mut data[..len] {
                    let scaled = (*b as i8 as f64 * self.factor)
                        .clamp(i8::MIN as f64, i8::MAX as f64);
                    *b = scaled as i8 as u8;
                }
            }
            (1, false) => {
                // Unsigned samples scale around the 0x80 midpoint.
                for b in &mut data[..len] {
                    let scaled =
                        ((*b as f64 - 128.0) * self.factor + 128.0).clamp(0.0, 255.0);
                    *b = scaled as u8;
                }
            }
            _ => {
                let mut off = 0;
                while off + 2 <= len {
                    let scaled = (read_i16(data, off) as f64 * self.factor)
                        .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                    write_i16(data, off, scaled);
                    off += 2;
                }
            }
        }
    }
}

/// One conversion stage. The set is closed; dispatch goes through the fixed
/// priority table rather than dynamic polymorphism.
#[derive(Debug)]
pub enum FilterStage {
    Signedness(SignednessFilter),
    BitShift(BitShiftFilter),
    ChannelMix(ChannelMixFilter),
    Gain(GainFilter),
    Resample(Box<ResampleFilter>),
}

impl FilterStage {
    pub fn slot(&self) -> FilterSlot {
        match self {
            FilterStage::Signedness(_) => FilterSlot::Signedness,
            FilterStage::BitShift(_) => FilterSlot::BitShift,
            FilterStage::ChannelMix(_) => FilterSlot::ChannelMix,
            FilterStage::Gain(_) => FilterSlot::Gain,
            FilterStage::Resample(_) => FilterSlot::Resample,
        }
    }

    /// Format of the stream leaving this stage.
    pub fn dst_format(&self) -> AudioFormat {
        match self {
            FilterStage::Signedness(f) => f.dst,
            FilterStage::BitShift(f) => f.dst,
            FilterStage::ChannelMix(f) => f.dst_format(),
            FilterStage::Gain(f) => f.format,
            FilterStage::Resample(f) => f.dst_format(),
        }
    }

    /// Worst-case output size for `input_bytes` of input.
    pub fn required_output_bytes(&self, input_bytes: usize) -> usize {
        match self {
            FilterStage::Signedness(_) | FilterStage::Gain(_) => input_bytes,
            FilterStage::BitShift(f) => {
                input_bytes * f.dst.bytes_per_channel as usize
                    / f.src.bytes_per_channel as usize
            }
            FilterStage::ChannelMix(f) => f.required_output_bytes(input_bytes),
            FilterStage::Resample(f) => f.required_output_bytes(input_bytes),
        }
    }

    fn run(&mut self, buf: &mut AudioBuffer) {
        match self {
            FilterStage::Signedness(f) => f.run(buf),
            FilterStage::BitShift(f) => f.run(buf),
            FilterStage::ChannelMix(f) => f.run(buf),
            FilterStage::Gain(f) => f.run(buf),
            FilterStage::Resample(f) => f.run(buf),
        }
    }
}

/// Ordered conversion pipeline from a decoder's native format to the device
/// format, with one decoded unit of look-ahead.
pub struct FilterChain {
    stages: Vec<FilterStage>,
    dst_format: AudioFormat,
    src_format: Option<AudioFormat>,
    multiplier: f64,
    passthrough: bool,
    allocated: bool,
    saved: Option<AudioBuffer>,
}

impl FilterChain {
    /// Build a chain for `decoder`'s native format.
    ///
    /// When the decoder reports lazy filter allocation, stage construction is
    /// deferred until after the first decoded buffer.
    pub fn new(
        decoder: &dyn Decoder,
        dst_format: AudioFormat,
        multiplier: f64,
    ) -> Result<Self, PlayerError> {
        let mut chain = Self {
            stages: Vec::new(),
            dst_format,
            src_format: None,
            multiplier,
            passthrough: true,
            allocated: false,
            saved: None,
        };
        if !decoder.lazy_filter_allocation() {
            chain.allocate(decoder.audio_format())?;
        }
        Ok(chain)
    }

    fn allocate(&mut self, src: AudioFormat) -> Result<(), PlayerError> {
        for fmt in [&src, &self.dst_format] {
            if !matches!(fmt.bytes_per_channel, 1 | 2) {
                return Err(PlayerError::UnsupportedConversion(format!(
                    "{} bytes per channel",
                    fmt.bytes_per_channel
                )));
            }
        }

        let dst = self.dst_format;
        let mut cur = src;

        if cur.is_signed != dst.is_signed {
            let stage_dst = AudioFormat { is_signed: dst.is_signed, ..cur };
            self.stages.push(FilterStage::Signedness(SignednessFilter {
                src: cur,
                dst: stage_dst,
            }));
            cur = stage_dst;
        }
        if cur.bytes_per_channel != dst.bytes_per_channel {
            let stage_dst = AudioFormat {
                bytes_per_channel: dst.bytes_per_channel,
                ..cur
            };
            self.stages.push(FilterStage::BitShift(BitShiftFilter {
                src: cur,
                dst: stage_dst,
            }));
            cur = stage_dst;
        }
        if cur.channels != dst.channels {
            let stage_dst = AudioFormat { channels: dst.channels, ..cur };
            if let Some(filter) = ChannelMixFilter::create(cur, stage_dst) {
                self.stages.push(FilterStage::ChannelMix(filter));
            }
            cur = stage_dst;
        }
        if self.multiplier != 1.0 {
            self.stages.push(FilterStage::Gain(GainFilter {
                format: cur,
                factor: self.multiplier,
            }));
        }
        if cur.rate != dst.rate {
            let stage = ResampleFilter::new(cur, dst)?;
            self.stages.push(FilterStage::Resample(Box::new(stage)));
        }

        self.passthrough = self.stages.is_empty();
        self.src_format = Some(src);
        self.allocated = true;
        tracing::debug!(
            stages = self.stages.len(),
            passthrough = self.passthrough,
            "filter chain built"
        );
        Ok(())
    }

    /// `true` when the chain performs no conversion and `read` hands decoder
    /// buffers through untouched.
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Slots currently present, in execution order.
    pub fn stage_slots(&self) -> Vec<FilterSlot> {
        self.stages.iter().map(FilterStage::slot).collect()
    }

    /// Decode one unit and convert it to the destination format.
    ///
    /// Returns the empty sentinel at end of stream. The chain keeps one
    /// decoded unit of look-ahead across calls; [`flush`](Self::flush) drops
    /// it after a discontinuity.
    pub fn read(&mut self, decoder: &mut dyn Decoder) -> Result<AudioBuffer, PlayerError> {
        let mut first = self.saved.take();
        if first.is_none() {
            let buf = decoder.read();
            if !buf.is_empty() {
                first = Some(buf);
            }
        }
        if !self.allocated && decoder.lazy_filter_allocation() {
            self.allocate(decoder.audio_format())?;
        }
        if first.is_some() {
            let ahead = decoder.read();
            if !ahead.is_empty() {
                self.saved = Some(ahead);
            }
        }

        let Some(mut buf) = first else {
            return Ok(AudioBuffer::empty());
        };
        if self.passthrough {
            return Ok(buf);
        }

        let mut required = buf.byte_len();
        let mut max_bytes = required;
        for stage in &self.stages {
            required = stage.required_output_bytes(required);
            max_bytes = max_bytes.max(required);
        }
        buf.ensure_byte_capacity(max_bytes);

        for stage in &mut self.stages {
            stage.run(&mut buf);
        }
        Ok(buf)
    }

    /// Insert a gain stage at its priority slot.
    ///
    /// Idempotent: if a gain stage already exists, this is a no-op. The new
    /// stage's format is inferred from whichever stage precedes the slot, or
    /// the decoder's native format when none does.
    pub fn add_gain_filter(&mut self, factor: f64) {
        if !self.allocated {
            // Stages do not exist yet; fold into the pending allocation.
            self.multiplier = factor;
            return;
        }

        let mut insert_at = 0;
        let mut preceding = None;
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.slot() == FilterSlot::Gain {
                return;
            }
            if stage.slot() > FilterSlot::Gain {
                break;
            }
            insert_at = i + 1;
            preceding = Some(stage);
        }

        let format = preceding
            .map(FilterStage::dst_format)
            .or(self.src_format)
            .unwrap_or(self.dst_format);
        self.stages.insert(
            insert_at,
            FilterStage::Gain(GainFilter { format, factor }),
        );
        self.passthrough = false;
    }

    /// Drop look-ahead and internal resampler history after a seek.
    pub fn flush(&mut self) {
        self.saved = None;
        for stage in &mut self.stages {
            if let FilterStage::Resample(f) = stage {
                f.reset();
            }
        }
    }
}
