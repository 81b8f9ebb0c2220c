//! Decoded sample storage.
//!
//! [`AudioBuffer`] owns the bytes for one decoded unit of interleaved PCM,
//! together with the absolute stream position of its first frame and a read
//! cursor used by the output callback for partial consumption.
//!
//! Ownership replaces the reference counting of classic player designs:
//! moving a buffer into the element queue transfers it to the consumer side,
//! and dropping it after the callback drains it (or after a seek discards it)
//! is the single point of release.

/// One unit of interleaved PCM samples.
///
/// A buffer with `samples() == 0` is the universal end-of-stream / decode-gap
/// sentinel; consumers must check it before touching sample data.
#[derive(Debug)]
pub struct AudioBuffer {
    data: Vec<u8>,
    bytes_per_channel: u8,
    channels: u16,
    sample_count: usize,
    /// Absolute frame offset of the first sample within the source stream.
    position: u64,
    /// Read cursor in bytes, advanced by the output callback.
    consumed: usize,
    /// Source frames represented by one frame of the current layout; diverges
    /// from 1.0 once a rate-changing stage rewrites the payload.
    position_scale: f64,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            bytes_per_channel: 0,
            channels: 0,
            sample_count: 0,
            position: 0,
            consumed: 0,
            position_scale: 1.0,
        }
    }
}

impl AudioBuffer {
    /// Allocate zeroed storage for `sample_count` frames, all valid.
    pub fn alloc(bytes_per_channel: u8, channels: u16, sample_count: usize) -> Self {
        let bytes = sample_count * bytes_per_channel as usize * channels as usize;
        Self {
            data: vec![0; bytes],
            bytes_per_channel,
            channels,
            sample_count,
            position: 0,
            consumed: 0,
            position_scale: 1.0,
        }
    }

    /// The empty sentinel (no samples, no storage).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Valid frames in this buffer.
    pub fn samples(&self) -> usize {
        self.sample_count
    }

    /// `true` when this buffer carries no audio (end of stream / decode gap).
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn bytes_per_channel(&self) -> u8 {
        self.bytes_per_channel
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes of one interleaved frame under the current layout.
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_channel as usize * self.channels as usize
    }

    /// Valid payload length in bytes.
    pub fn byte_len(&self) -> usize {
        self.sample_count * self.frame_bytes()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn position_scale(&self) -> f64 {
        self.position_scale
    }

    /// Record how many source frames one frame of the current layout stands
    /// for, so the read cursor still maps back to source positions.
    pub fn set_position_scale(&mut self, scale: f64) {
        self.position_scale = scale;
    }

    /// Valid payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.byte_len()]
    }

    /// Full backing storage, including slack beyond the valid payload.
    ///
    /// Conversion stages write through this and then fix up the layout with
    /// [`set_layout`](Self::set_layout).
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record a new sample layout after an in-place conversion.
    ///
    /// The new `byte_len()` must fit the existing storage.
    pub fn set_layout(&mut self, bytes_per_channel: u8, channels: u16, sample_count: usize) {
        let bytes = sample_count * bytes_per_channel as usize * channels as usize;
        debug_assert!(bytes <= self.data.len());
        self.bytes_per_channel = bytes_per_channel;
        self.channels = channels;
        self.sample_count = sample_count;
    }

    /// Guarantee at least `min_bytes` of backing storage, keeping the valid
    /// payload.
    ///
    /// Reuses the current allocation when it already suffices; otherwise
    /// reallocates and copies the valid prefix. This is how the filter chain
    /// sizes one scratch buffer for a whole pass up front.
    pub fn ensure_byte_capacity(&mut self, min_bytes: usize) {
        if self.data.len() >= min_bytes {
            return;
        }
        let mut grown = vec![0u8; min_bytes];
        let valid = self.byte_len();
        grown[..valid].copy_from_slice(&self.data[..valid]);
        self.data = grown;
    }

    /// Bytes not yet consumed by the output callback.
    pub fn remaining_bytes(&self) -> &[u8] {
        &self.data[self.consumed..self.byte_len()]
    }

    /// Advance the read cursor by `n` bytes.
    pub fn consume(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.byte_len());
    }

    /// `true` once the callback has copied out every valid byte.
    pub fn is_drained(&self) -> bool {
        self.consumed >= self.byte_len()
    }

    /// Absolute source-frame position at the current read cursor.
    ///
    /// The cursor counts frames of the current layout; `position_scale`
    /// converts them back to source frames when the rates differ.
    pub fn position_at_cursor(&self) -> u64 {
        let frame = self.frame_bytes();
        if frame == 0 {
            return self.position;
        }
        let frames = (self.consumed / frame) as f64 * self.position_scale;
        self.position + frames as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_sized() {
        let buf = AudioBuffer::alloc(2, 2, 8);
        assert_eq!(buf.samples(), 8);
        assert_eq!(buf.byte_len(), 32);
        assert!(buf.bytes().iter().all(|&b| b == 0));
        assert!(!buf.is_empty());
    }

    #[test]
    fn empty_sentinel_has_no_samples() {
        let buf = AudioBuffer::empty();
        assert!(buf.is_empty());
        assert_eq!(buf.byte_len(), 0);
        assert!(buf.is_drained());
    }

    #[test]
    fn ensure_byte_capacity_reuses_sufficient_storage() {
        let mut buf = AudioBuffer::alloc(2, 1, 16);
        let ptr = buf.bytes().as_ptr();
        buf.ensure_byte_capacity(16);
        assert_eq!(buf.bytes().as_ptr(), ptr);
    }

    #[test]
    fn ensure_byte_capacity_grows_and_keeps_prefix() {
        let mut buf = AudioBuffer::alloc(2, 1, 2);
        buf.storage_mut().copy_from_slice(&[1, 2, 3, 4]);
        buf.ensure_byte_capacity(64);
        assert_eq!(&buf.bytes()[..4], &[1, 2, 3, 4]);
        assert!(buf.storage_mut().len() >= 64);
    }

    #[test]
    fn cursor_tracks_partial_consumption() {
        let mut buf = AudioBuffer::alloc(2, 2, 4);
        buf.set_position(1000);
        assert_eq!(buf.remaining_bytes().len(), 16);
        buf.consume(8);
        assert_eq!(buf.remaining_bytes().len(), 8);
        assert_eq!(buf.position_at_cursor(), 1002);
        buf.consume(100);
        assert!(buf.is_drained());
    }

    #[test]
    fn cursor_maps_back_to_source_frames_after_rate_change() {
        // 4 output frames stand for 2 source frames after a 2x upsample.
        let mut buf = AudioBuffer::alloc(2, 2, 4);
        buf.set_position(1000);
        buf.set_position_scale(0.5);
        buf.consume(8); // 2 output frames
        assert_eq!(buf.position_at_cursor(), 1001);
    }

    #[test]
    fn set_layout_changes_frame_accounting() {
        let mut buf = AudioBuffer::alloc(1, 1, 8);
        buf.ensure_byte_capacity(16);
        buf.set_layout(2, 1, 8);
        assert_eq!(buf.byte_len(), 16);
        assert_eq!(buf.frame_bytes(), 2);
    }
}
