//! Bounded element queue between the decode loop and the output callback.
//!
//! The control thread is the sole producer; the real-time callback is the
//! sole consumer. Elements are either decoded audio or inert notification
//! markers (metadata, total time) that ride along in FIFO order so observers
//! receive them in correct temporal order relative to the audio they
//! describe.
//!
//! Discipline: one [`Mutex`] around the deque plus a [`Condvar`] as a
//! general "state changed" signal, with the `closed` flag
//! stored under the same mutex to avoid races. The consumer side only ever
//! uses the non-blocking calls; the producer backs off via
//! [`ElementQueue::wait_for_space`] instead of busy-spinning.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::buffer::AudioBuffer;
use crate::events::TrackMetadata;

/// A single queued item.
#[derive(Debug)]
pub enum QueueElement {
    /// Decoded audio in the output device format.
    Audio(AudioBuffer),
    /// Tags for the track whose audio follows this marker.
    Metadata(TrackMetadata),
    /// Total stream time in seconds, resolved late for unknown-length streams.
    TotalTime(f64),
}

impl QueueElement {
    pub fn is_audio(&self) -> bool {
        matches!(self, QueueElement::Audio(_))
    }
}

struct Inner {
    queue: VecDeque<QueueElement>,
    closed: bool,
}

/// Bounded FIFO of [`QueueElement`]s.
///
/// Invariant: `len() <= capacity()` at all times. A full queue rejects the
/// pushed element back to the caller rather than dropping or growing.
pub struct ElementQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
    capacity: usize,
    low_watermark_ms: AtomicU64,
}

impl ElementQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current element count (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Mark the queue closed and wake all waiters. Idempotent.
    ///
    /// Closed queues still drain; pushes are silently dropped.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push without blocking.
    ///
    /// Returns the element back when the queue is full so the producer can
    /// back off and retry; a push to a closed queue drops the element.
    pub fn try_push(&self, element: QueueElement) -> Result<(), QueueElement> {
        let mut g = self.inner.lock().unwrap();
        if g.closed {
            return Ok(());
        }
        if g.queue.len() >= self.capacity {
            return Err(element);
        }
        g.queue.push_back(element);
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// Wait until the queue has room, is closed, or `timeout` elapses.
    ///
    /// Returns `true` when a retry is worthwhile (space available or closed).
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let g = self.inner.lock().unwrap();
        if g.closed || g.queue.len() < self.capacity {
            return true;
        }
        let (g, _) = self.cv.wait_timeout(g, timeout).unwrap();
        g.closed || g.queue.len() < self.capacity
    }

    /// Pop the front element without blocking.
    ///
    /// This is the only removal path the real-time callback uses.
    pub fn try_pop(&self) -> Option<QueueElement> {
        let mut g = self.inner.lock().unwrap();
        let element = g.queue.pop_front()?;
        let remaining = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(remaining);
        Some(element)
    }

    /// Inspect the front element without removing it.
    pub fn with_front<R>(&self, f: impl FnOnce(&QueueElement) -> R) -> Option<R> {
        let g = self.inner.lock().unwrap();
        g.queue.front().map(f)
    }

    /// Discard all buffered audio, keeping non-audio elements in their
    /// original relative order.
    ///
    /// Returns the absolute position of the earliest discarded audio buffer,
    /// which the seek protocol uses as its anchor.
    pub fn discard_audio(&self) -> Option<u64> {
        let mut g = self.inner.lock().unwrap();
        let mut earliest = None;
        g.queue.retain(|element| match element {
            QueueElement::Audio(buf) => {
                if earliest.is_none() {
                    earliest = Some(buf.position_at_cursor());
                }
                false
            }
            _ => true,
        });
        drop(g);
        self.cv.notify_all();
        earliest
    }

    /// Debounced low-buffer warning, at most once a second.
    fn log_low_watermark(&self, remaining: usize) {
        let threshold = (self.capacity / 8).max(1);
        if remaining == 0 || remaining >= threshold {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::info!(
                queued_elements = remaining,
                threshold_elements = threshold,
                "element queue low watermark"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn audio_at(position: u64, samples: usize) -> QueueElement {
        let mut buf = AudioBuffer::alloc(2, 2, samples);
        buf.set_position(position);
        QueueElement::Audio(buf)
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let q = ElementQueue::new(3);
        for i in 0..3 {
            assert!(q.try_push(audio_at(i, 4)).is_ok());
        }
        let rejected = q.try_push(audio_at(99, 4));
        assert!(rejected.is_err());
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn pop_preserves_fifo_order() {
        let q = ElementQueue::new(8);
        q.try_push(audio_at(0, 4)).unwrap();
        q.try_push(QueueElement::TotalTime(180.0)).unwrap();
        q.try_push(audio_at(4, 4)).unwrap();

        assert!(matches!(q.try_pop(), Some(QueueElement::Audio(_))));
        assert!(matches!(q.try_pop(), Some(QueueElement::TotalTime(_))));
        assert!(matches!(q.try_pop(), Some(QueueElement::Audio(_))));
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn discard_audio_keeps_notifications_and_reports_anchor() {
        let q = ElementQueue::new(8);
        q.try_push(audio_at(1000, 400)).unwrap();
        q.try_push(audio_at(1400, 400)).unwrap();
        q.try_push(QueueElement::TotalTime(240.0)).unwrap();
        q.try_push(audio_at(1800, 400)).unwrap();

        let anchor = q.discard_audio();
        assert_eq!(anchor, Some(1000));
        assert_eq!(q.len(), 1);
        assert!(matches!(q.try_pop(), Some(QueueElement::TotalTime(t)) if t == 240.0));
    }

    #[test]
    fn discard_audio_on_empty_queue_yields_no_anchor() {
        let q = ElementQueue::new(4);
        assert_eq!(q.discard_audio(), None);
    }

    #[test]
    fn wait_for_space_wakes_on_pop() {
        let q = Arc::new(ElementQueue::new(1));
        q.try_push(audio_at(0, 4)).unwrap();

        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q_pop.try_pop()
        });

        assert!(q.wait_for_space(Duration::from_millis(500)));
        handle.join().unwrap();
        assert!(q.try_push(audio_at(1, 4)).is_ok());
    }

    #[test]
    fn wait_for_space_times_out_when_full() {
        let q = ElementQueue::new(1);
        q.try_push(audio_at(0, 4)).unwrap();
        assert!(!q.wait_for_space(Duration::from_millis(10)));
    }

    #[test]
    fn close_drops_pushes_and_wakes_waiters() {
        let q = ElementQueue::new(1);
        q.try_push(audio_at(0, 4)).unwrap();
        q.close();
        assert!(q.try_push(audio_at(1, 4)).is_ok());
        assert_eq!(q.len(), 1);
        assert!(q.wait_for_space(Duration::from_millis(1)));
    }

    #[test]
    fn with_front_peeks_without_removal() {
        let q = ElementQueue::new(4);
        q.try_push(audio_at(7, 4)).unwrap();
        let is_audio = q.with_front(|e| e.is_audio());
        assert_eq!(is_audio, Some(true));
        assert_eq!(q.len(), 1);
    }
}
