//! Capture sources: frames, audio and the optional face cam
//!
//! Every sampler follows the same contract: `start` / `stop` report whether
//! anything changed, `capture` grabs from the host without blocking, and
//! `next` pulls buffered samples in order (`None` when nothing is new). When
//! the encoder falls behind, each sampler drops its oldest samples instead of
//! growing without bound.

mod audio;
mod clock;
mod facecam;
mod frame;
mod queue;

pub use audio::{AudioBackend, AudioSampler, AudioSource, PcmBuffer};
pub use clock::SessionClock;
pub use facecam::{CameraDevice, FaceCamSource};
pub use frame::{FrameSampler, FrameSurface};

/// Result of starting a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of stopping a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Per-session sampler settings
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Clock every stream of the session is stamped against
    pub clock: SessionClock,
    /// Samples buffered before the oldest are dropped
    pub max_buffered: usize,
}

impl SamplerConfig {
    pub fn new(clock: SessionClock, max_buffered: usize) -> Self {
        Self {
            clock,
            max_buffered,
        }
    }
}

/// Host lifecycle signals the controller reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    DidEnterBackground,
    WillEnterForeground,
    WillTerminate,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic host doubles shared by tests across the crate

    use super::*;
    use crate::data::{PixelFormat, RawFrame};
    use crate::error::CaptureError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Surface that always has a new frame of one flat color
    pub struct SolidSurface {
        width: u32,
        height: u32,
        pub grabs: AtomicUsize,
    }

    impl SolidSurface {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                grabs: AtomicUsize::new(0),
            }
        }

        pub fn grabs(&self) -> usize {
            self.grabs.load(Ordering::SeqCst)
        }
    }

    impl FrameSurface for SolidSurface {
        fn grab_frame(&self) -> Option<RawFrame> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            let shade = (n % 256) as u8;
            Some(RawFrame {
                width: self.width,
                height: self.height,
                format: PixelFormat::Rgba8,
                data: [shade, 0, 255 - shade, 255].repeat((self.width * self.height) as usize),
            })
        }
    }

    /// Audio source that yields a fixed-size silent buffer per read
    pub struct ToneSource {
        backend: AudioBackend,
        sample_rate: u32,
        channels: u16,
        frames_per_read: usize,
        // Reads left before reporting "no new data"; usize::MAX = one per capture
        pending: AtomicUsize,
        per_capture: AtomicBool,
    }

    impl ToneSource {
        pub fn new(
            backend: AudioBackend,
            sample_rate: u32,
            channels: u16,
            frames_per_read: usize,
        ) -> Self {
            Self {
                backend,
                sample_rate,
                channels,
                frames_per_read,
                pending: AtomicUsize::new(0),
                per_capture: AtomicBool::new(false),
            }
        }

        /// Yield exactly `n` buffers, then nothing
        pub fn set_pending(&self, n: usize) {
            self.per_capture.store(false, Ordering::SeqCst);
            self.pending.store(n, Ordering::SeqCst);
        }

        /// Yield one buffer each time the previous one was consumed by a capture call
        pub fn one_per_capture(&self) {
            self.per_capture.store(true, Ordering::SeqCst);
            self.pending.store(1, Ordering::SeqCst);
        }
    }

    impl AudioSource for ToneSource {
        fn backend(&self) -> AudioBackend {
            self.backend
        }

        fn read(&self) -> Option<PcmBuffer> {
            let left = self.pending.load(Ordering::SeqCst);
            if left == 0 {
                if self.per_capture.load(Ordering::SeqCst) {
                    // Re-arm for the next capture call
                    self.pending.store(1, Ordering::SeqCst);
                }
                return None;
            }
            self.pending.store(left - 1, Ordering::SeqCst);
            Some(PcmBuffer {
                sample_rate: self.sample_rate,
                channels: self.channels,
                samples: vec![0; self.frames_per_read * self.channels as usize],
            })
        }
    }

    /// Camera double with switchable permission
    pub struct FakeCamera {
        width: u32,
        height: u32,
        open: AtomicBool,
        denied: AtomicBool,
    }

    impl FakeCamera {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                open: AtomicBool::new(false),
                denied: AtomicBool::new(false),
            }
        }

        pub fn deny(&self) {
            self.denied.store(true, Ordering::SeqCst);
        }

        pub fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    impl CameraDevice for FakeCamera {
        fn open(&self) -> Result<(), CaptureError> {
            if self.denied.load(Ordering::SeqCst) {
                return Err(CaptureError::Unsupported);
            }
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn grab_frame(&self) -> Option<RawFrame> {
            if !self.is_open() {
                return None;
            }
            Some(RawFrame {
                width: self.width,
                height: self.height,
                format: PixelFormat::Bgra8,
                data: vec![128; (self.width * self.height * 4) as usize],
            })
        }
    }
}
