//! Decoder contract and the Symphonia-backed implementation.
//!
//! The pipeline only ever sees [`Decoder`]: one decoded unit per `read`, an
//! empty buffer as the end-of-stream / decode-gap sentinel, and a fallible
//! frame-accurate `seek`. Codec and container parsing live entirely behind
//! Symphonia.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::buffer::AudioBuffer;
use crate::error::PlayerError;
use crate::events::TrackMetadata;
use crate::filter::write_i16;
use crate::format::AudioFormat;

/// Source of decoded PCM for the control loop.
pub trait Decoder: Send {
    /// Decode one unit. An empty buffer signals end of stream or a decode
    /// gap; both cause the control loop to advance.
    fn read(&mut self) -> AudioBuffer;

    /// Native format of the decoded stream.
    fn audio_format(&self) -> AudioFormat;

    /// Reposition to an absolute frame. Returns `false` when the source
    /// cannot seek there.
    fn seek(&mut self, frame: u64) -> bool;

    /// Total stream length in frames, once known. Unknown-length streams may
    /// start returning `Some` only after decoding has progressed.
    fn total_frames(&self) -> Option<u64>;

    /// `true` when the native format is only known after the first decoded
    /// unit, deferring filter-chain construction.
    fn lazy_filter_allocation(&self) -> bool {
        false
    }

    /// Tags for this stream, when the container provides them.
    fn metadata(&self) -> Option<TrackMetadata> {
        None
    }
}

/// Decoder over any format/codec Symphonia can probe.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    audio_format: AudioFormat,
    total_frames: Option<u64>,
    metadata: Option<TrackMetadata>,
    /// Absolute frame offset of the next decoded unit.
    next_position: u64,
}

impl SymphoniaDecoder {
    /// Probe and open `path`. Failures here are per-track: the control loop
    /// skips to the next playlist entry.
    pub fn open(path: &Path) -> Result<Self, PlayerError> {
        let fail = |reason: String| PlayerError::DecoderInit {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| fail(e.to_string()))?;

        let track = probed
            .format
            .default_track()
            .ok_or_else(|| fail("no default audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let channels = params
            .channels
            .ok_or_else(|| fail("unknown channel count".into()))?
            .count() as u16;
        let rate = params
            .sample_rate
            .ok_or_else(|| fail("unknown sample rate".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| fail(e.to_string()))?;

        let metadata = probed
            .format
            .metadata()
            .current()
            .map(|rev| tags_to_metadata(rev.tags()))
            .or_else(|| {
                probed
                    .metadata
                    .get()
                    .as_ref()
                    .and_then(|m| m.current())
                    .map(|rev| tags_to_metadata(rev.tags()))
            });

        Ok(Self {
            format: probed.format,
            decoder,
            track_id,
            audio_format: AudioFormat::signed16(channels, rate),
            total_frames: params.n_frames,
            metadata,
            next_position: 0,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn read(&mut self) -> AudioBuffer {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(_) => return AudioBuffer::empty(), // EOF
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    // Corrupt packet; skip it rather than ending the stream.
                    tracing::debug!("packet decode error: {e}");
                    continue;
                }
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            let mut sample_buf = SampleBuffer::<i16>::new(frames as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);

            let channels = self.audio_format.channels;
            let mut buf = AudioBuffer::alloc(2, channels, frames);
            buf.set_position(self.next_position);
            let data = buf.storage_mut();
            for (i, &s) in sample_buf.samples().iter().enumerate() {
                write_i16(data, i * 2, s);
            }
            self.next_position += frames as u64;
            return buf;
        }
    }

    fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    fn seek(&mut self, frame: u64) -> bool {
        let rate = self.audio_format.rate as u64;
        let time = Time::new(frame / rate, (frame % rate) as f64 / rate as f64);
        match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                self.decoder.reset();
                self.next_position = seeked.actual_ts;
                true
            }
            Err(e) => {
                tracing::warn!(frame, "seek failed: {e}");
                false
            }
        }
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn metadata(&self) -> Option<TrackMetadata> {
        self.metadata.clone()
    }
}

fn tags_to_metadata(tags: &[symphonia::core::meta::Tag]) -> TrackMetadata {
    let mut meta = TrackMetadata::default();
    for tag in tags {
        let value = || Some(tag.value.to_string());
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => meta.title = value(),
            Some(StandardTagKey::Artist) => meta.artist = value(),
            Some(StandardTagKey::Album) => meta.album = value(),
            Some(StandardTagKey::TrackNumber) => meta.track_number = value(),
            Some(StandardTagKey::Date) => meta.date = value(),
            _ => {}
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::meta::{Tag, Value};

    #[test]
    fn open_rejects_missing_file() {
        let err = SymphoniaDecoder::open(Path::new("/nonexistent/file.flac"));
        assert!(matches!(err, Err(PlayerError::DecoderInit { .. })));
    }

    #[test]
    fn tags_map_to_track_metadata() {
        let tags = vec![
            Tag::new(
                Some(StandardTagKey::TrackTitle),
                "TITLE",
                Value::from("Song"),
            ),
            Tag::new(Some(StandardTagKey::Artist), "ARTIST", Value::from("Band")),
            Tag::new(None, "CUSTOM", Value::from("ignored")),
        ];
        let meta = tags_to_metadata(&tags);
        assert_eq!(meta.title.as_deref(), Some("Song"));
        assert_eq!(meta.artist.as_deref(), Some("Band"));
        assert!(meta.album.is_none());
    }
}
