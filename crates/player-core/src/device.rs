//! Output device abstraction and the CPAL implementation.
//!
//! [`OutputDevice`] is the seam the control loop drives: open negotiates the
//! device format the pipeline must convert into, start/pause gate the
//! hardware callback, close tears the stream down. The CPAL implementation
//! builds a type-specialized stream per physical sample format and converts
//! the pipeline's 16-bit samples at the last moment.

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::PlayerError;
use crate::filter::read_i16;
use crate::format::AudioFormat;
use crate::render::SharedRender;

/// Hardware output seam.
///
/// Implementations are not required to be `Send`; the control loop constructs
/// its device on its own thread via a factory closure.
pub trait OutputDevice {
    /// Open the device and wire the callback to `render`. Returns the
    /// negotiated format the pipeline must produce. The stream starts paused.
    fn open(&mut self, render: SharedRender) -> Result<AudioFormat, PlayerError>;

    /// Tear the stream down. Safe to call when not open.
    fn close(&mut self);

    /// Resume the hardware callback.
    fn start(&mut self);

    /// Suspend the hardware callback. The queue and in-flight buffer are left
    /// untouched.
    fn pause(&mut self);
}

/// CPAL-backed output.
pub struct CpalOutput {
    needle: Option<String>,
    preferred_rate: Option<u32>,
    stream: Option<cpal::Stream>,
}

impl CpalOutput {
    pub fn new(needle: Option<String>, preferred_rate: Option<u32>) -> Self {
        Self {
            needle,
            preferred_rate,
            stream: None,
        }
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self, render: SharedRender) -> Result<AudioFormat, PlayerError> {
        let init_err = |e: anyhow::Error| PlayerError::DeviceInit(format!("{e:#}"));

        let host = cpal::default_host();
        let device = pick_device(&host, self.needle.as_deref()).map_err(init_err)?;
        let supported =
            pick_output_config(&device, self.preferred_rate).map_err(init_err)?;
        let sample_format = supported.sample_format();
        let buffer_size = pick_buffer_size(&supported).unwrap_or(cpal::BufferSize::Default);

        // The pipeline only mixes down to mono or stereo.
        let channels = supported.channels().min(2).max(1);
        let config = cpal::StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size,
        };

        let name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        tracing::info!(
            device = %name,
            rate = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "opening output stream"
        );

        let stream =
            build_output_stream(&device, &config, sample_format, render).map_err(init_err)?;
        stream.pause().map_err(|e| init_err(anyhow!(e)))?;
        self.stream = Some(stream);

        Ok(AudioFormat::signed16(config.channels, config.sample_rate))
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn start(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                tracing::warn!("stream play failed: {e}");
            }
        }
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                tracing::warn!("stream pause failed: {e}");
            }
        }
    }
}

/// Pick the first output device matching `needle` (case-insensitive), or the
/// default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> anyhow::Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| anyhow!("no output devices: {e}"))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("no output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Choose the best output config for a preferred sample rate (or the highest
/// supported rate if unset). Prefers rates at or below the preference.
pub fn pick_output_config(
    device: &cpal::Device,
    preferred_rate: Option<u32>,
) -> anyhow::Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| anyhow!("supported configs: {e}"))?
        .collect();
    if ranges.is_empty() {
        return Err(anyhow!("no supported output configs"));
    }

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let min = range.min_sample_rate();
        let max = range.max_sample_rate();
        let rate = pick_rate_for_range(min, max, preferred_rate);
        let below = preferred_rate.map(|t| rate <= t).unwrap_or(true);
        let format_rank = sample_format_rank(range.sample_format());
        let cfg = range.with_sample_rate(rate);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, cfg));
        }
    }

    match best {
        Some((_, _, _, cfg)) => Ok(cfg),
        None => Err(anyhow!("no supported output configs")),
    }
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Log available output devices for the current host.
pub fn list_devices(host: &cpal::Host) -> anyhow::Result<()> {
    let devices = host
        .output_devices()
        .map_err(|e| anyhow!("no output devices: {e}"))?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    render: SharedRender,
) -> anyhow::Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, render),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, render),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, render),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, render),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder. The callback drains the shared render
/// state into a byte scratch buffer and converts 16-bit samples into the
/// physical sample type.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    render: SharedRender,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let err_fn = |err| tracing::warn!("stream error: {err}");

    // Pre-size the scratch so steady-state callbacks never allocate.
    let mut scratch: Vec<u8> = Vec::with_capacity(16_384 * config.channels as usize * 2);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let need = data.len() * 2;
            scratch.resize(need, 0);
            if let Ok(mut state) = render.lock() {
                state.fill(&mut scratch[..need]);
            } else {
                scratch[..need].fill(0);
            }
            for (i, out) in data.iter_mut().enumerate() {
                let s = read_i16(&scratch, i * 2);
                *out = <T as cpal::Sample>::from_sample::<i16>(s);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

fn pick_rate_for_range(min: u32, max: u32, preferred_rate: Option<u32>) -> u32 {
    match preferred_rate {
        Some(target) => {
            if target >= min && target <= max {
                target
            } else if target < min {
                min
            } else {
                max
            }
        }
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_higher_rate() {
        assert!(is_better_candidate(true, 96_000, 2, true, 48_000, 2));
    }

    #[test]
    fn is_better_candidate_prefers_native_sixteen_bit() {
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }
}
