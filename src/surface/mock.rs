//! In-memory display surface for tests and harnesses.
//!
//! Models the behaviors the circulator must survive: a minimum-undequeued
//! constraint, spurious dequeue failures, padded strides, and a compositor
//! that consumes and recycles displayed buffers. Each slab carries a busy
//! flag asserting that no two mappings of one buffer are ever live at
//! once - the observable form of the single-owner invariant.

use super::{DisplaySurface, MappedRegion, Mapping, Region, SurfaceError, SurfaceHandle, UsageFlags};
use crate::buffer::format::{self, PixelFormat};
use log::*;
use std::cell::UnsafeCell;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Operation counters observable from the test thread.
#[derive(Debug, Default)]
pub struct MockStats {
    pub dequeues: AtomicUsize,
    pub enqueues: AtomicUsize,
    pub cancels: AtomicUsize,
    /// Injected failures actually consumed.
    pub failed_dequeues: AtomicUsize,
    /// Buffers the fake compositor has consumed and recycled.
    pub displayed: AtomicUsize,
}

/// Failure-injection knobs, shared with the test thread.
#[derive(Debug, Default)]
pub struct MockControls {
    fail_next_dequeues: AtomicUsize,
}

impl MockControls {
    /// Make the next `n` dequeue calls fail with `Busy`.
    pub fn fail_next_dequeues(&self, n: usize) {
        self.fail_next_dequeues.store(n, Ordering::SeqCst);
    }
}

struct Slab {
    busy: AtomicBool,
    bytes: UnsafeCell<Box<[u8]>>,
}

// Access to `bytes` is serialized by the lock/unlock protocol; `busy`
// asserts the invariant rather than providing it.
unsafe impl Sync for Slab {}

struct MockMapping {
    slab: Arc<Slab>,
}

impl MappedRegion for MockMapping {
    fn len(&self) -> usize {
        unsafe { (&(*self.slab.bytes.get())).len() }
    }

    fn bytes(&self) -> &[u8] {
        unsafe { &*self.slab.bytes.get() }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { &mut *self.slab.bytes.get() }
    }
}

static HANDLE_BASE: AtomicU64 = AtomicU64::new(0x1000);

/// A display surface backed by plain memory slabs.
pub struct MockSurface {
    min_undequeued: usize,
    /// Extra stride padding in pixels, emulating provider alignment.
    stride_pad_px: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer_count: usize,
    handle_base: u64,
    slabs: Vec<Arc<Slab>>,
    free: VecDeque<usize>,
    dequeued: HashSet<usize>,
    queued: VecDeque<usize>,
    stats: Arc<MockStats>,
    controls: Arc<MockControls>,
}

impl MockSurface {
    pub fn new(min_undequeued: usize) -> Self {
        MockSurface {
            min_undequeued,
            stride_pad_px: 0,
            width: 0,
            height: 0,
            format: PixelFormat::Nv12,
            buffer_count: 0,
            handle_base: 0,
            slabs: Vec::new(),
            free: VecDeque::new(),
            dequeued: HashSet::new(),
            queued: VecDeque::new(),
            stats: Arc::new(MockStats::default()),
            controls: Arc::new(MockControls::default()),
        }
    }

    /// Like [`new`](MockSurface::new), also handing out the observation and
    /// injection handles for the test thread.
    pub fn with_probes(min_undequeued: usize) -> (Self, Arc<MockStats>, Arc<MockControls>) {
        let surface = Self::new(min_undequeued);
        let stats = surface.stats.clone();
        let controls = surface.controls.clone();
        (surface, stats, controls)
    }

    /// Pad buffer strides by `pad` pixels beyond the configured width.
    pub fn with_stride_pad(mut self, pad: usize) -> Self {
        self.stride_pad_px = pad;
        self
    }

    fn stride_px(&self) -> usize {
        self.width as usize + self.stride_pad_px
    }

    fn rebuild_pool(&mut self) {
        if self.buffer_count == 0 || self.width == 0 || self.height == 0 {
            return;
        }
        let size = format::frame_size(self.format, self.stride_px(), self.height as usize);
        self.handle_base = HANDLE_BASE.fetch_add(0x100, Ordering::Relaxed);
        self.slabs = (0..self.buffer_count)
            .map(|_| {
                Arc::new(Slab {
                    busy: AtomicBool::new(false),
                    bytes: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
                })
            })
            .collect();
        self.free = (0..self.buffer_count).collect();
        self.dequeued.clear();
        self.queued.clear();
        debug!(
            "mock surface: pool rebuilt, {} buffers of {} bytes",
            self.buffer_count, size
        );
    }

    fn index(&self, handle: SurfaceHandle) -> Option<usize> {
        let idx = handle.0.checked_sub(self.handle_base)? as usize;
        (idx < self.slabs.len()).then_some(idx)
    }

    fn handle(&self, idx: usize) -> SurfaceHandle {
        SurfaceHandle(self.handle_base + idx as u64)
    }

    fn surface_held(&self) -> usize {
        self.free.len() + self.queued.len()
    }
}

impl DisplaySurface for MockSurface {
    fn set_buffer_count(&mut self, count: usize) -> Result<(), SurfaceError> {
        self.buffer_count = count;
        self.rebuild_pool();
        Ok(())
    }

    fn min_undequeued(&self) -> Result<usize, SurfaceError> {
        Ok(self.min_undequeued)
    }

    fn set_geometry(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), SurfaceError> {
        self.width = width;
        self.height = height;
        self.format = format;
        self.rebuild_pool();
        Ok(())
    }

    fn dequeue(&mut self) -> Result<(SurfaceHandle, usize), SurfaceError> {
        if self.slabs.is_empty() {
            return Err(SurfaceError::Rejected(-22));
        }
        let pending_failures = self.controls.fail_next_dequeues.load(Ordering::SeqCst);
        if pending_failures > 0
            && self
                .controls
                .fail_next_dequeues
                .compare_exchange(
                    pending_failures,
                    pending_failures - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            self.stats.failed_dequeues.fetch_add(1, Ordering::SeqCst);
            return Err(SurfaceError::Busy);
        }
        // While streaming the surface keeps its minimum for itself; before
        // the first enqueue a client may drain the whole pool (pre-fetch).
        let streaming = self.stats.enqueues.load(Ordering::SeqCst) > 0;
        if streaming && self.surface_held() <= self.min_undequeued {
            return Err(SurfaceError::Busy);
        }
        let Some(idx) = self.free.pop_front() else {
            return Err(SurfaceError::Busy);
        };
        self.dequeued.insert(idx);
        self.stats.dequeues.fetch_add(1, Ordering::SeqCst);
        Ok((self.handle(idx), self.stride_px()))
    }

    fn enqueue(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError> {
        let idx = self.index(handle).ok_or(SurfaceError::Rejected(-2))?;
        if !self.dequeued.remove(&idx) {
            return Err(SurfaceError::Rejected(-1));
        }
        self.queued.push_back(idx);
        self.stats.enqueues.fetch_add(1, Ordering::SeqCst);
        // The compositor consumes displayed frames and recycles them,
        // always retaining the declared minimum in its queue.
        while self.queued.len() > self.min_undequeued {
            let done = self.queued.pop_front().expect("queued non-empty");
            self.free.push_back(done);
            self.stats.displayed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn cancel(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError> {
        let idx = self.index(handle).ok_or(SurfaceError::Rejected(-2))?;
        if !self.dequeued.remove(&idx) {
            return Err(SurfaceError::Rejected(-1));
        }
        self.free.push_back(idx);
        self.stats.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lock(
        &mut self,
        handle: SurfaceHandle,
        _usage: UsageFlags,
        _region: Region,
    ) -> Result<Mapping, SurfaceError> {
        let idx = self.index(handle).ok_or(SurfaceError::Rejected(-2))?;
        if !self.dequeued.contains(&idx) {
            return Err(SurfaceError::Rejected(-1));
        }
        let slab = &self.slabs[idx];
        assert!(
            !slab.busy.swap(true, Ordering::SeqCst),
            "buffer {:?} locked while already mapped - two concurrent holders",
            handle
        );
        Ok(Box::new(MockMapping { slab: slab.clone() }))
    }

    fn unlock(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError> {
        let idx = self.index(handle).ok_or(SurfaceError::Rejected(-2))?;
        if !self.slabs[idx].busy.swap(false, Ordering::SeqCst) {
            warn!("mock surface: unlock of {:?} without a mapping", handle);
        }
        Ok(())
    }
}
