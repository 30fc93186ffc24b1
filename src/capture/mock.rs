//! Capture source backed by a fixed pool of plain-memory frames, for tests
//! and harnesses.
//!
//! Owns a bounded pool, injects frames into a [`FrameListener`], and takes
//! them back through the [`BufferOwner`] capability, counting both sides so
//! tests can assert the no-leak / no-double-free contract.

use super::{CaptureEvent, FrameListener, StreamKind};
use crate::buffer::format::{self, PixelFormat};
use crate::buffer::{BufferOwner, FrameDescriptor, FrameStatus};
use log::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub struct MockCaptureSource {
    free: Mutex<Vec<FrameDescriptor>>,
    injected: AtomicUsize,
    returned: AtomicUsize,
    frame_counter: AtomicU64,
}

impl MockCaptureSource {
    /// A pool of `count` frames of the given geometry.
    pub fn new(count: usize, fmt: PixelFormat, width: u32, height: u32) -> Arc<Self> {
        let size = format::frame_size(fmt, width as usize, height as usize);
        let free = (0..count)
            .map(|_| {
                FrameDescriptor::with_owned(fmt, width, height, vec![0u8; size].into_boxed_slice())
            })
            .collect();
        Arc::new(MockCaptureSource {
            free: Mutex::new(free),
            injected: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
            frame_counter: AtomicU64::new(0),
        })
    }

    /// Adopt externally provided buffers (e.g. a zero-copy loan from the
    /// preview pool) into the circulating set.
    pub fn adopt(&self, frames: Vec<FrameDescriptor>) {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).extend(frames);
    }

    /// Push one frame at `listener`. Returns false when the pool is dry,
    /// which is exactly the stall the capacity contract exists to prevent.
    pub fn inject(
        self: &Arc<Self>,
        listener: &dyn FrameListener,
        stream: StreamKind,
        status: FrameStatus,
    ) -> bool {
        let Some(mut frame) = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
        else {
            warn!("mock capture: pool dry, cannot inject");
            return false;
        };
        frame.status = status;
        frame.frame_counter = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let owner: Arc<dyn BufferOwner> = self.clone();
        let weak: Weak<dyn BufferOwner> = Arc::downgrade(&owner);
        frame.assign_owner(weak, "capture-source");
        self.injected.fetch_add(1, Ordering::SeqCst);
        listener.on_frame(frame, stream, CaptureEvent::Frame);
        true
    }

    pub fn injected_count(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn returned_count(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl BufferOwner for MockCaptureSource {
    fn return_buffer(&self, mut frame: FrameDescriptor) {
        self.returned.fetch_add(1, Ordering::SeqCst);
        frame.status = FrameStatus::NotApplicable;
        self.free.lock().unwrap_or_else(|e| e.into_inner()).push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BouncingListener;

    impl FrameListener for BouncingListener {
        fn on_frame(&self, frame: FrameDescriptor, _stream: StreamKind, _event: CaptureEvent) {
            frame.return_to_owner();
        }
    }

    #[test]
    fn injected_frames_come_home_and_recycle() {
        let source = MockCaptureSource::new(2, PixelFormat::Nv12, 16, 16);
        let listener = BouncingListener;
        for _ in 0..10 {
            assert!(source.inject(&listener, StreamKind::Preview, FrameStatus::Ok));
        }
        assert_eq!(source.injected_count(), 10);
        assert_eq!(source.returned_count(), 10);
        assert_eq!(source.available(), 2);
    }

    #[test]
    fn pool_exhaustion_reports_rather_than_blocks() {
        struct HoardingListener {
            held: Mutex<Vec<FrameDescriptor>>,
        }
        impl FrameListener for HoardingListener {
            fn on_frame(&self, frame: FrameDescriptor, _: StreamKind, _: CaptureEvent) {
                self.held.lock().unwrap().push(frame);
            }
        }

        let source = MockCaptureSource::new(2, PixelFormat::Nv12, 16, 16);
        let listener = HoardingListener {
            held: Mutex::new(Vec::new()),
        };
        assert!(source.inject(&listener, StreamKind::Video, FrameStatus::Ok));
        assert!(source.inject(&listener, StreamKind::Video, FrameStatus::Ok));
        assert!(!source.inject(&listener, StreamKind::Video, FrameStatus::Ok));

        // Release the hoard so the ledger balances.
        for frame in listener.held.lock().unwrap().drain(..) {
            frame.return_to_owner();
        }
        assert_eq!(source.returned_count(), 2);
    }
}
