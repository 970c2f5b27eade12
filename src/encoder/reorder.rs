//! Bounded reordering of jittery sample arrival
//!
//! Samples are held until the newest arrival is at least `window` ahead of
//! them, then released in presentation order. Lateness is judged per track:
//! a sample is rejected only when its own track already released something
//! newer, so a stream trailing another never loses samples to it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::data::{MediaSample, Track};

#[derive(Debug)]
struct Pending {
    pts: Duration,
    sequence: u64,
    sample: MediaSample,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .pts
            .cmp(&self.pts)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.pts == other.pts && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

/// Outcome of offering a sample
#[derive(Debug)]
pub enum Offer {
    Accepted,
    /// Older than what its track already released
    Late(MediaSample),
}

#[derive(Debug)]
pub struct ReorderBuffer {
    window: Duration,
    heap: BinaryHeap<Pending>,
    sequence: u64,
    newest: Duration,
    released: HashMap<Track, Duration>,
}

impl ReorderBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            heap: BinaryHeap::new(),
            sequence: 0,
            newest: Duration::ZERO,
            released: HashMap::new(),
        }
    }

    pub fn offer(&mut self, sample: MediaSample) -> Offer {
        let pts = sample.pts();
        if self
            .released
            .get(&sample.track())
            .map(|released| pts < *released)
            .unwrap_or(false)
        {
            return Offer::Late(sample);
        }

        self.newest = self.newest.max(pts);
        self.sequence = self.sequence.wrapping_add(1);
        self.heap.push(Pending {
            pts,
            sequence: self.sequence,
            sample,
        });
        Offer::Accepted
    }

    /// Next sample that is safely outside the reorder window
    pub fn pop_ready(&mut self) -> Option<MediaSample> {
        let ready = self
            .heap
            .peek()
            .map(|entry| entry.pts + self.window <= self.newest)
            .unwrap_or(false);
        if ready {
            self.pop()
        } else {
            None
        }
    }

    /// Next sample regardless of the window; used when flushing
    pub fn pop(&mut self) -> Option<MediaSample> {
        let entry = self.heap.pop()?;
        self.released.insert(entry.sample.track(), entry.pts);
        Some(entry.sample)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AudioChunk, FrameSample, PixelFormat, RawFrame};

    fn chunk(ms: u64) -> MediaSample {
        MediaSample::Audio(AudioChunk {
            pts: Duration::from_millis(ms),
            sample_rate: 1_000,
            channels: 1,
            samples: vec![0; 10],
        })
    }

    #[test]
    fn releases_in_order_once_outside_window() {
        let mut buffer = ReorderBuffer::new(Duration::from_millis(50));
        buffer.offer(chunk(20));
        buffer.offer(chunk(0));
        buffer.offer(chunk(10));
        assert!(buffer.pop_ready().is_none());

        buffer.offer(chunk(65));
        let released: Vec<Duration> = std::iter::from_fn(|| buffer.pop_ready())
            .map(|s| s.pts())
            .collect();
        assert_eq!(
            released,
            vec![Duration::from_millis(0), Duration::from_millis(10)]
        );
        assert_eq!(buffer.len(), 2);
    }

    fn frame(ms: u64) -> MediaSample {
        MediaSample::Video(FrameSample {
            pts: Duration::from_millis(ms),
            frame: RawFrame {
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
                data: vec![0; 4],
            },
        })
    }

    #[test]
    fn trailing_track_is_not_late_behind_another() {
        let mut buffer = ReorderBuffer::new(Duration::from_millis(100));
        let mut released = Vec::new();

        // Audio runs 150ms behind video but is in order on its own
        for tick in 0..100 {
            let ms = tick * 10;
            assert!(matches!(buffer.offer(frame(ms + 150)), Offer::Accepted));
            assert!(matches!(buffer.offer(chunk(ms)), Offer::Accepted));
            released.extend(std::iter::from_fn(|| buffer.pop_ready()));
        }
        released.extend(std::iter::from_fn(|| buffer.pop()));

        let audio: Vec<Duration> = released
            .iter()
            .filter(|s| s.track() == Track::Audio)
            .map(|s| s.pts())
            .collect();
        assert_eq!(audio.len(), 100);
        assert!(audio.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(released.len(), 200);
    }

    #[test]
    fn samples_behind_released_watermark_are_late() {
        let mut buffer = ReorderBuffer::new(Duration::ZERO);
        buffer.offer(chunk(100));
        assert!(buffer.pop_ready().is_some());

        assert!(matches!(buffer.offer(chunk(40)), Offer::Late(_)));
        assert!(matches!(buffer.offer(chunk(100)), Offer::Accepted));
        assert!(matches!(buffer.offer(frame(40)), Offer::Accepted));
    }
}
