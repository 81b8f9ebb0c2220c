//! Real-time output callback state.
//!
//! [`RenderState::fill`] is the body of the hardware callback: it copies
//! queued audio into the device buffer and fills any shortfall with silence.
//! It never blocks on the producer, never allocates on the common path, and
//! never panics. A single audio buffer may be drained across several
//! invocations; the in-flight buffer and its read cursor live here as local
//! refill state between invocations.
//!
//! The callback also forwards non-audio queue elements to the notification
//! channel and publishes the absolute stream position of each buffer it
//! begins consuming into a shared atomic slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::buffer::AudioBuffer;
use crate::events::Notification;
use crate::queue::{ElementQueue, QueueElement};

/// Last-known absolute playback position, in source frames.
///
/// A single scalar overwritten by the callback and read by the control
/// thread; relaxed ordering is sufficient because no read-modify-write ever
/// occurs concurrently.
#[derive(Debug, Default)]
pub struct PlaybackPosition(AtomicU64);

impl PlaybackPosition {
    pub fn store(&self, frame: u64) {
        self.0.store(frame, Ordering::Relaxed);
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// State shared between the hardware callback and the control thread.
///
/// The mutex is uncontended in steady state: the control thread only takes it
/// during the seek protocol, with the device already paused.
pub type SharedRender = Arc<Mutex<RenderState>>;

pub struct RenderState {
    queue: Arc<ElementQueue>,
    current: Option<AudioBuffer>,
    position: Arc<PlaybackPosition>,
    notify: Sender<Notification>,
    underrun_events: u64,
}

impl RenderState {
    pub fn new(
        queue: Arc<ElementQueue>,
        position: Arc<PlaybackPosition>,
        notify: Sender<Notification>,
    ) -> Self {
        Self {
            queue,
            current: None,
            position,
            notify,
            underrun_events: 0,
        }
    }

    pub fn shared(
        queue: Arc<ElementQueue>,
        position: Arc<PlaybackPosition>,
        notify: Sender<Notification>,
    ) -> SharedRender {
        Arc::new(Mutex::new(Self::new(queue, position, notify)))
    }

    /// Fill `out` with exactly `out.len()` bytes of audio, zero-filling any
    /// shortfall. Safe to call with any request length, including zero.
    pub fn fill(&mut self, out: &mut [u8]) {
        let mut filled = 0;

        while filled < out.len() {
            if let Some(buf) = self.current.as_mut() {
                let n = {
                    let remaining = buf.remaining_bytes();
                    let n = remaining.len().min(out.len() - filled);
                    out[filled..filled + n].copy_from_slice(&remaining[..n]);
                    n
                };
                buf.consume(n);
                filled += n;
                if buf.is_drained() {
                    self.current = None;
                }
                continue;
            }

            match self.queue.try_pop() {
                Some(QueueElement::Audio(buf)) => {
                    if buf.is_empty() {
                        continue;
                    }
                    self.position.store(buf.position());
                    self.current = Some(buf);
                }
                Some(QueueElement::Metadata(meta)) => {
                    let _ = self.notify.send(Notification::Metadata(meta));
                }
                Some(QueueElement::TotalTime(secs)) => {
                    let _ = self.notify.send(Notification::TotalTime(secs));
                }
                None => break,
            }
        }

        if filled < out.len() {
            if !out.is_empty() {
                self.underrun_events = self.underrun_events.saturating_add(1);
            }
            out[filled..].fill(0);
        }
    }

    /// Reclaim the partially consumed in-flight buffer.
    ///
    /// Used by the seek protocol while the device is paused, so discarded
    /// audio includes whatever the callback was in the middle of.
    pub fn take_current(&mut self) -> Option<AudioBuffer> {
        self.current.take()
    }

    /// `true` while a partially consumed buffer is held between invocations.
    pub fn is_draining(&self) -> bool {
        self.current.is_some()
    }

    /// Underrun incidents observed so far.
    pub fn underrun_events(&self) -> u64 {
        self.underrun_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TrackMetadata;
    use crossbeam_channel::unbounded;

    fn render_with_queue(capacity: usize) -> (RenderState, Arc<ElementQueue>, crossbeam_channel::Receiver<Notification>, Arc<PlaybackPosition>) {
        let queue = Arc::new(ElementQueue::new(capacity));
        let position = Arc::new(PlaybackPosition::default());
        let (tx, rx) = unbounded();
        let render = RenderState::new(queue.clone(), position.clone(), tx);
        (render, queue, rx, position)
    }

    fn audio(position: u64, samples: usize, fill: u8) -> QueueElement {
        let mut buf = AudioBuffer::alloc(2, 2, samples);
        buf.set_position(position);
        buf.storage_mut().fill(fill);
        QueueElement::Audio(buf)
    }

    #[test]
    fn underrun_fills_request_with_silence() {
        let (mut render, _queue, _rx, _pos) = render_with_queue(4);
        let mut out = vec![0xAAu8; 4096];
        render.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(render.underrun_events(), 1);
    }

    #[test]
    fn partial_buffer_drains_across_invocations() {
        let (mut render, queue, _rx, pos) = render_with_queue(4);
        // 8 frames of 4 bytes = 32 bytes total.
        queue.try_push(audio(1000, 8, 0x11)).unwrap();

        let mut first = vec![0u8; 12];
        render.fill(&mut first);
        assert!(first.iter().all(|&b| b == 0x11));
        assert_eq!(pos.load(), 1000);

        let mut second = vec![0u8; 20];
        render.fill(&mut second);
        assert!(second.iter().all(|&b| b == 0x11));

        // Buffer exhausted; next request underruns.
        let mut third = vec![0xFFu8; 8];
        render.fill(&mut third);
        assert!(third.iter().all(|&b| b == 0));
    }

    #[test]
    fn copies_exactly_min_of_buffer_and_request() {
        let (mut render, queue, _rx, _pos) = render_with_queue(4);
        queue.try_push(audio(0, 2, 0x22)).unwrap(); // 8 bytes
        queue.try_push(audio(2, 2, 0x33)).unwrap(); // 8 bytes

        let mut out = vec![0u8; 12];
        render.fill(&mut out);
        assert!(out[..8].iter().all(|&b| b == 0x22));
        assert!(out[8..].iter().all(|&b| b == 0x33));
    }

    #[test]
    fn non_audio_elements_are_forwarded_in_order() {
        let (mut render, queue, rx, _pos) = render_with_queue(8);
        let meta = TrackMetadata {
            title: Some("t".into()),
            ..TrackMetadata::default()
        };
        queue.try_push(QueueElement::Metadata(meta.clone())).unwrap();
        queue.try_push(QueueElement::TotalTime(120.0)).unwrap();
        queue.try_push(audio(0, 2, 0x44)).unwrap();

        let mut out = vec![0u8; 8];
        render.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0x44));
        assert_eq!(rx.try_recv().unwrap(), Notification::Metadata(meta));
        assert_eq!(rx.try_recv().unwrap(), Notification::TotalTime(120.0));
    }

    #[test]
    fn position_tracks_each_buffer_begun() {
        let (mut render, queue, _rx, pos) = render_with_queue(8);
        queue.try_push(audio(100, 2, 1)).unwrap();
        queue.try_push(audio(102, 2, 2)).unwrap();

        let mut out = vec![0u8; 8];
        render.fill(&mut out);
        assert_eq!(pos.load(), 100);
        render.fill(&mut out);
        assert_eq!(pos.load(), 102);
    }

    #[test]
    fn take_current_reclaims_in_flight_audio() {
        let (mut render, queue, _rx, _pos) = render_with_queue(4);
        queue.try_push(audio(500, 8, 0x55)).unwrap();
        let mut out = vec![0u8; 8]; // 2 of 8 frames
        render.fill(&mut out);
        assert!(render.is_draining());

        let reclaimed = render.take_current().unwrap();
        assert_eq!(reclaimed.position_at_cursor(), 502);
        assert!(!render.is_draining());

        // Nothing left in flight; next fill underruns.
        let mut next = vec![0xEEu8; 4];
        render.fill(&mut next);
        assert!(next.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_sentinel_buffers_are_skipped() {
        let (mut render, queue, _rx, _pos) = render_with_queue(4);
        queue.try_push(QueueElement::Audio(AudioBuffer::empty())).unwrap();
        queue.try_push(audio(0, 2, 0x66)).unwrap();
        let mut out = vec![0u8; 8];
        render.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0x66));
    }
}
