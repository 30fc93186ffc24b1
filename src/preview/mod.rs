//! Preview worker - circulates frame buffers through the display surface.
//!
//! The most intricate consumer in the pipeline: it dequeues backing buffers
//! from the external display surface, tracks which of a bounded pool are
//! out with the surface versus held locally or loaned to the capture side,
//! copies or identity-forwards frame content into them, and re-enqueues
//! them, all under the surface's minimum-undequeued constraint.
//!
//! Threading model follows the worker contract: every public method on
//! [`PreviewWorker`] only builds a message and enqueues it. The single
//! exception is the preview state, which outside threads read through its
//! own lock via [`PreviewWorker::state`] without going through the mailbox.

mod pool;

use crate::buffer::format::{self, PixelFormat};
use crate::buffer::{BackingKind, BufferOwner, FrameData, FrameDescriptor, FrameStatus};
use crate::error::{OpResult, PipelineError};
use crate::mailbox::{MailMessage, Mailbox};
use crate::surface::{DisplaySurface, Mapping, Region, SurfaceHandle, UsageFlags};
use crate::worker::{self, ActiveObject, Flow, WorkerHandle};
use log::*;
use pool::{SlotHolder, WindowPool};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Retries per dequeue call before giving up on the surface; the surface
/// API may spuriously report busy under resize/teardown races.
const DEQUEUE_RETRY_COUNT: usize = 3;

/// Hard cap on the window pool; a surface demanding more than this is
/// misconfigured.
const MAX_WINDOW_BUFFERS: usize = 10;

/// Reply slots declared by the preview mailbox.
mod reply {
    pub const SET_SURFACE: usize = 0;
    pub const CONFIGURE: usize = 1;
    pub const FETCH_BUFFERS: usize = 2;
    pub const RETURN_POOL: usize = 3;
    pub const FLUSH: usize = 4;
    pub const COUNT: usize = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Stopped,
    NoSurface,
    Configured,
    Enabled,
    /// Streaming continues but frames are not displayed.
    Hidden,
}

/// Geometry and policy for one preview configuration.
#[derive(Debug, Clone)]
pub struct PreviewGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Requested pool size; raised to the surface minimum plus one if the
    /// surface demands more.
    pub buffer_count: usize,
    /// Loan pool buffers to the capture side instead of copying.
    pub zero_copy: bool,
}

pub enum PreviewMessage {
    Render(FrameDescriptor),
    /// A loaned or callback buffer coming back from a consumer.
    ReturnBuffer(FrameDescriptor),
    SetSurface(Option<Box<dyn DisplaySurface>>),
    Configure(PreviewGeometry),
    FetchBuffers(Arc<Mutex<Vec<FrameDescriptor>>>),
    ReturnPool,
    Flush,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Render,
    ReturnBuffer,
    SetSurface,
    Configure,
    FetchBuffers,
    ReturnPool,
    Flush,
    Exit,
}

impl MailMessage for PreviewMessage {
    type Kind = PreviewKind;
    fn kind(&self) -> PreviewKind {
        match self {
            PreviewMessage::Render(_) => PreviewKind::Render,
            PreviewMessage::ReturnBuffer(_) => PreviewKind::ReturnBuffer,
            PreviewMessage::SetSurface(_) => PreviewKind::SetSurface,
            PreviewMessage::Configure(_) => PreviewKind::Configure,
            PreviewMessage::FetchBuffers(_) => PreviewKind::FetchBuffers,
            PreviewMessage::ReturnPool => PreviewKind::ReturnPool,
            PreviewMessage::Flush => PreviewKind::Flush,
            PreviewMessage::Exit => PreviewKind::Exit,
        }
    }
}

/// Frame-rate meter logging achieved display rate while streaming.
struct FrameRateMeter {
    window_start: Instant,
    frames: u32,
}

impl FrameRateMeter {
    fn new() -> Self {
        FrameRateMeter {
            window_start: Instant::now(),
            frames: 0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(2) {
            debug!(
                "preview: {:.1} fps",
                f64::from(self.frames) / elapsed.as_secs_f64()
            );
            self.window_start = Instant::now();
            self.frames = 0;
        }
    }
}

/// The circulator state, touched only on the preview thread.
struct Circulator {
    mailbox: Arc<Mailbox<PreviewMessage>>,
    surface: Option<Box<dyn DisplaySurface>>,
    pool: WindowPool,
    geometry: Option<PreviewGeometry>,
    /// Expected stride of incoming capture frames; zero until configured.
    capture_stride: usize,
    state: Arc<Mutex<PreviewState>>,
    frames_done: u64,
    meter: FrameRateMeter,
}

impl Circulator {
    fn current_state(&self) -> PreviewState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: PreviewState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn reply_with(&self, slot: usize, status: OpResult) -> Result<Flow, PipelineError> {
        self.mailbox.reply(slot, status.clone());
        status.map(|()| Flow::Continue)
    }

    fn lock_usage(&self) -> UsageFlags {
        match self.geometry.as_ref() {
            Some(geo) if geo.zero_copy => UsageFlags::SW_READ | UsageFlags::HW_COMPOSER,
            _ => UsageFlags::SW_WRITE,
        }
    }

    /// Stream-time dequeue of one buffer from the display surface.
    ///
    /// Only attempted while the surface holds more than its declared
    /// minimum, retried a bounded number of times against spurious
    /// failures. Unknown handles are adopted until the pool is fully
    /// discovered, then defensively cancelled back.
    fn dequeue_from_surface(&mut self) -> Option<(usize, Mapping)> {
        let geo = self.geometry.as_ref()?.clone();
        let usage = self.lock_usage();
        let region = Region {
            width: geo.width,
            height: geo.height,
        };
        let surface = self.surface.as_mut()?;

        for _ in 0..DEQUEUE_RETRY_COUNT {
            // The surface legitimately keeps its minimum; below that there
            // is nothing to collect and previewDone must wait.
            if self.pool.in_surface <= self.pool.min_undequeued {
                trace!(
                    "preview: {} buffer(s) in surface, need more than {}",
                    self.pool.in_surface,
                    self.pool.min_undequeued
                );
                return None;
            }
            let (handle, stride_px) = match surface.dequeue() {
                Ok(dequeued) => dequeued,
                Err(e) => {
                    warn!("preview: error dequeuing display buffer: {}", e);
                    continue;
                }
            };
            let stride_bytes = format::pixels_to_bytes(geo.format, stride_px);

            if let Some(idx) = self.pool.find(handle) {
                self.pool.in_surface -= 1;
                match surface.lock(handle, usage, region) {
                    Ok(mapping) => {
                        let slot = self.pool.slot_mut(idx);
                        slot.holder = SlotHolder::Circulator;
                        slot.stride_bytes = stride_bytes;
                        return Some((idx, mapping));
                    }
                    Err(e) => {
                        error!("preview: failed to lock display buffer: {}", e);
                        if surface.cancel(handle).is_ok() {
                            self.pool.in_surface += 1;
                        }
                    }
                }
            } else if self.pool.discovered {
                // A stray handle after discovery points at a surface bug;
                // hand it straight back.
                warn!("preview: unknown display buffer dequeued, {:?}", handle);
                let _ = surface.cancel(handle);
            } else {
                // Stream-time discovery: adopt until the declared count.
                self.pool.in_surface -= 1;
                match surface.lock(handle, usage, region) {
                    Ok(mapping) => {
                        let idx = self.pool.adopt(handle, stride_bytes, SlotHolder::Circulator);
                        if self.pool.discovered {
                            debug!("preview: window pool fully discovered ({})", self.pool.len());
                        }
                        return Some((idx, mapping));
                    }
                    Err(e) => {
                        error!("preview: failed to lock adopted buffer: {}", e);
                        if surface.cancel(handle).is_ok() {
                            self.pool.in_surface += 1;
                        }
                    }
                }
            }
        }
        None
    }

    /// Unlock `handle` and enqueue it for display, falling back to cancel
    /// so a rejected enqueue degrades to a skipped frame.
    fn enqueue_slot(&mut self, idx: usize) {
        let handle = self.pool.slot(idx).handle;
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        if let Err(e) = surface.unlock(handle) {
            warn!("preview: unlocking {:?} failed: {}", handle, e);
        }
        match surface.enqueue(handle) {
            Ok(()) => self.pool.in_surface += 1,
            Err(e) => {
                warn!("preview: enqueue of {:?} failed, skipping frame: {}", handle, e);
                match surface.cancel(handle) {
                    Ok(()) => self.pool.in_surface += 1,
                    Err(e) => warn!("preview: cancel of {:?} also failed: {}", handle, e),
                }
            }
        }
        // Either way the buffer is back with the surface.
        self.pool.slot_mut(idx).holder = SlotHolder::Surface;
    }

    /// Copy path: the frame is not one of ours, so a pool buffer is
    /// dequeued, content repadded into it, and the input returned.
    fn render_copy_frame(&mut self, frame: FrameDescriptor) -> Result<(), PipelineError> {
        let Some(geo) = self.geometry.clone() else {
            frame.return_to_owner();
            return Err(PipelineError::InvalidState("preview not configured"));
        };
        if frame.width != geo.width || frame.height != geo.height {
            debug!(
                "preview: not displaying frame {}, conflicting geometry {}x{} vs {}x{}",
                frame.id, frame.width, frame.height, geo.width, geo.height
            );
            frame.return_to_owner();
            return Ok(());
        }
        match self.dequeue_from_surface() {
            Some((idx, mut mapping)) => {
                let dst_stride = self.pool.slot(idx).stride_bytes;
                if dst_stride < self.capture_stride {
                    // A narrower display buffer cannot take this frame.
                    warn!(
                        "preview: display stride {} below capture stride {}, skipping",
                        dst_stride, self.capture_stride
                    );
                    drop(mapping);
                    self.cancel_slot(idx);
                } else {
                    if let Some(src) = frame.bytes() {
                        let row_bytes = frame.stride_bytes.min(dst_stride);
                        let rows = frame.size_bytes / frame.stride_bytes.max(1);
                        format::copy_rows(
                            src,
                            frame.stride_bytes,
                            mapping.bytes_mut(),
                            dst_stride,
                            row_bytes,
                            rows,
                        );
                    }
                    drop(mapping);
                    self.enqueue_slot(idx);
                    self.frames_done += 1;
                }
            }
            None => {
                warn!("preview: failed to dequeue from display surface, skipping frame");
            }
        }
        frame.return_to_owner();
        Ok(())
    }

    /// Zero-copy path: the frame already lives in a pool buffer, so it is
    /// enqueued by identity and a replacement is dequeued and handed back
    /// to the frame's owner to keep the capture side fed.
    fn render_pool_frame(
        &mut self,
        mut frame: FrameDescriptor,
        handle: SurfaceHandle,
    ) -> Result<(), PipelineError> {
        let Some(idx) = self.pool.find(handle) else {
            warn!("preview: {:?} vanished from the pool", handle);
            frame.return_to_owner();
            return Err(PipelineError::InvalidArgument("unknown pool buffer"));
        };
        // The surface consumes this frame; the return obligation moves to
        // the replacement dequeued below.
        let owner = frame.take_owner();
        let status = frame.status;
        let frame_counter = frame.frame_counter;
        let aux = frame.aux.take();
        if let FrameData::Surface { mapping, .. } =
            std::mem::replace(&mut frame.data, FrameData::None)
        {
            drop(mapping);
        }
        drop(frame);

        self.pool.slot_mut(idx).queued_to_consumer = false;
        self.enqueue_slot(idx);
        self.frames_done += 1;

        let Some(owner) = owner else {
            if let Some(aux) = aux {
                (*aux).return_to_owner();
            }
            return Ok(());
        };

        match self.dequeue_from_surface() {
            Some((replacement_idx, mapping)) => {
                let mut replacement = self.loan_descriptor(replacement_idx, mapping);
                replacement.status = status;
                replacement.frame_counter = frame_counter;
                replacement.aux = aux;
                match owner.upgrade() {
                    Some(owner) => owner.return_buffer(replacement),
                    None => debug!("preview: frame owner gone, keeping replacement local"),
                }
            }
            None => {
                warn!("preview: no replacement buffer available for the capture side");
                if let Some(aux) = aux {
                    (*aux).return_to_owner();
                }
            }
        }
        Ok(())
    }

    fn cancel_slot(&mut self, idx: usize) {
        let handle = self.pool.slot(idx).handle;
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        if let Err(e) = surface.unlock(handle) {
            warn!("preview: unlocking {:?} failed: {}", handle, e);
        }
        match surface.cancel(handle) {
            Ok(()) => self.pool.in_surface += 1,
            Err(e) => warn!("preview: cancel of {:?} failed: {}", handle, e),
        }
        self.pool.slot_mut(idx).holder = SlotHolder::Surface;
    }

    /// Build the descriptor loaning pool slot `idx` out of the circulator.
    fn loan_descriptor(&mut self, idx: usize, mapping: Mapping) -> FrameDescriptor {
        let geo = self.geometry.as_ref().expect("loan requires configuration");
        let slot = self.pool.slot_mut(idx);
        slot.holder = SlotHolder::Client;
        let mut desc = FrameDescriptor::format_descriptor(geo.format, geo.width, geo.height);
        desc.stride_bytes = slot.stride_bytes;
        desc.size_bytes = mapping.len();
        desc.backing = BackingKind::DisplaySurface;
        desc.status = FrameStatus::NotApplicable;
        desc.data = FrameData::Surface {
            handle: slot.handle,
            mapping,
        };
        desc
    }

    fn handle_render(&mut self, frame: FrameDescriptor) -> Result<(), PipelineError> {
        if frame.fast_fail() {
            debug!(
                "preview: frame {} arrived {:?}, bouncing to owner",
                frame.id, frame.status
            );
            frame.return_to_owner();
            return Ok(());
        }
        let state = self.current_state();
        if state != PreviewState::Enabled {
            trace!("preview: frame received in state {:?}, skipping", state);
            frame.return_to_owner();
            return Ok(());
        }
        if self.surface.is_none() {
            frame.return_to_owner();
            return Ok(());
        }
        match frame.surface_handle() {
            Some(handle) if self.pool.find(handle).is_some() => {
                self.render_pool_frame(frame, handle)
            }
            _ => self.render_copy_frame(frame),
        }
    }

    fn handle_set_surface(
        &mut self,
        surface: Option<Box<dyn DisplaySurface>>,
    ) -> Result<(), PipelineError> {
        if self.surface.is_some() {
            debug!("preview: replacing display surface, releasing old pool");
            self.free_pool();
        }
        let attached = surface.is_some();
        self.surface = surface;
        self.geometry = None;
        self.set_state(if attached {
            PreviewState::Stopped
        } else {
            PreviewState::NoSurface
        });
        Ok(())
    }

    fn handle_configure(&mut self, geo: PreviewGeometry) -> Result<(), PipelineError> {
        let Some(surface) = self.surface.as_mut() else {
            warn!("preview: configure without a display surface");
            return Err(PipelineError::InvalidState("no display surface attached"));
        };
        let min_undequeued = surface.min_undequeued()?;
        debug!("preview: surface minimum undequeued {}", min_undequeued);

        // Never fewer than the surface's own minimum plus one, or the
        // surface will never hand a buffer back.
        let buffer_count = geo.buffer_count.max(min_undequeued + 1);
        if buffer_count > MAX_WINDOW_BUFFERS {
            error!(
                "preview: surface demands {} buffers, cap is {}",
                buffer_count, MAX_WINDOW_BUFFERS
            );
            return Err(PipelineError::NoMemory);
        }
        if !self.pool.is_empty() {
            warn!("preview: pool already allocated, releasing before reconfigure");
            self.free_pool();
        }
        let surface = self.surface.as_mut().expect("surface checked above");
        surface.set_buffer_count(buffer_count)?;
        surface.set_geometry(geo.width, geo.height, geo.format)?;

        self.pool.reset(buffer_count, min_undequeued);
        self.capture_stride = format::pixels_to_bytes(geo.format, geo.width as usize);
        info!(
            "preview: configured {}x{} {:?}, pool {} (min undequeued {})",
            geo.width, geo.height, geo.format, buffer_count, min_undequeued
        );
        self.geometry = Some(geo);
        self.set_state(PreviewState::Configured);
        Ok(())
    }

    /// Pre-fetch the whole pool and loan it out, the zero-copy prelude.
    fn handle_fetch_buffers(
        &mut self,
        out: &Mutex<Vec<FrameDescriptor>>,
    ) -> Result<(), PipelineError> {
        let Some(geo) = self.geometry.clone() else {
            return Err(PipelineError::InvalidState("preview not configured"));
        };
        if !self.pool.is_empty() {
            return Err(PipelineError::InvalidState("pool already fetched"));
        }
        let usage = self.lock_usage();
        let region = Region {
            width: geo.width,
            height: geo.height,
        };
        let mut fetched = Vec::new();
        for _ in 0..self.pool.target_count {
            let surface = self.surface.as_mut().expect("configured implies surface");
            let (handle, stride_px) = match surface.dequeue() {
                Ok(dequeued) => dequeued,
                Err(e) => {
                    error!("preview: pre-fetch dequeue failed: {}", e);
                    self.free_pool();
                    return Err(e.into());
                }
            };
            let stride_bytes = format::pixels_to_bytes(geo.format, stride_px);
            let mapping = match surface.lock(handle, usage, region) {
                Ok(mapping) => mapping,
                Err(e) => {
                    error!("preview: pre-fetch lock failed: {}", e);
                    let _ = surface.cancel(handle);
                    self.free_pool();
                    return Err(e.into());
                }
            };
            self.pool.in_surface -= 1;
            let idx = self.pool.adopt(handle, stride_bytes, SlotHolder::Client);
            fetched.push(self.loan_descriptor(idx, mapping));
        }
        debug!("preview: pre-fetched {} pool buffers", fetched.len());
        out.lock().unwrap_or_else(|e| e.into_inner()).extend(fetched);
        Ok(())
    }

    fn handle_return_buffer(&mut self, frame: FrameDescriptor) -> Result<(), PipelineError> {
        if let Some(handle) = frame.surface_handle() {
            if let Some(idx) = self.pool.find(handle) {
                self.pool.slot_mut(idx).queued_to_consumer = false;
            } else {
                warn!("preview: returned buffer {:?} is not from the pool", handle);
            }
        }
        // A consumer is done with it; display it like any other frame.
        self.handle_render(frame)
    }

    /// Release the window pool. Slots still held by the surface are left
    /// untouched - their disposition belongs to the surface, and cancelling
    /// them would desynchronize its bookkeeping.
    fn free_pool(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            for slot in self.pool.iter() {
                if slot.holder != SlotHolder::Surface {
                    if slot.queued_to_consumer {
                        warn!(
                            "preview: releasing {:?} while still queued to a consumer",
                            slot.handle
                        );
                    }
                    if let Err(e) = surface.unlock(slot.handle) {
                        warn!("preview: unlocking {:?} failed: {}", slot.handle, e);
                    }
                    if let Err(e) = surface.cancel(slot.handle) {
                        warn!("preview: cancelling {:?} failed: {}", slot.handle, e);
                    }
                }
            }
        }
        self.pool.clear();
    }
}

impl ActiveObject for Circulator {
    type Msg = PreviewMessage;

    fn on_message(&mut self, msg: PreviewMessage) -> Result<Flow, PipelineError> {
        match msg {
            PreviewMessage::Render(frame) => {
                let status = self.handle_render(frame);
                self.meter.tick();
                status.map(|()| Flow::Continue)
            }
            PreviewMessage::ReturnBuffer(frame) => {
                self.handle_return_buffer(frame).map(|()| Flow::Continue)
            }
            PreviewMessage::SetSurface(surface) => {
                let status = self.handle_set_surface(surface);
                self.reply_with(reply::SET_SURFACE, status)
            }
            PreviewMessage::Configure(geometry) => {
                let status = self.handle_configure(geometry);
                self.reply_with(reply::CONFIGURE, status)
            }
            PreviewMessage::FetchBuffers(out) => {
                let status = self.handle_fetch_buffers(&out);
                self.reply_with(reply::FETCH_BUFFERS, status)
            }
            PreviewMessage::ReturnPool => {
                self.free_pool();
                self.reply_with(reply::RETURN_POOL, Ok(()))
            }
            PreviewMessage::Flush => {
                // The queue was purged by the caller; this is the barrier.
                self.reply_with(reply::FLUSH, Ok(()))
            }
            PreviewMessage::Exit => {
                debug!("preview: exiting after {} frames", self.frames_done);
                self.free_pool();
                self.set_state(PreviewState::Stopped);
                Ok(Flow::Exit)
            }
        }
    }
}

/// Owner capability routing returned buffers back into the preview
/// mailbox, so consumers can hand buffers back without knowing the worker.
pub struct PreviewReturn {
    mailbox: Arc<Mailbox<PreviewMessage>>,
}

impl BufferOwner for PreviewReturn {
    fn return_buffer(&self, frame: FrameDescriptor) {
        self.mailbox.send(PreviewMessage::ReturnBuffer(frame));
    }
}

/// Front-end handle to the preview worker thread.
pub struct PreviewWorker {
    handle: WorkerHandle<PreviewMessage>,
    state: Arc<Mutex<PreviewState>>,
    return_capability: Arc<PreviewReturn>,
}

impl PreviewWorker {
    pub fn spawn() -> anyhow::Result<Self> {
        let mailbox = Arc::new(Mailbox::with_reply_slots("preview", reply::COUNT));
        let state = Arc::new(Mutex::new(PreviewState::Stopped));
        let actor = Circulator {
            mailbox: mailbox.clone(),
            surface: None,
            pool: WindowPool::default(),
            geometry: None,
            capture_stride: 0,
            state: state.clone(),
            frames_done: 0,
            meter: FrameRateMeter::new(),
        };
        let return_capability = Arc::new(PreviewReturn {
            mailbox: mailbox.clone(),
        });
        let handle = worker::spawn("preview", mailbox, actor)?;
        Ok(PreviewWorker {
            handle,
            state,
            return_capability,
        })
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<PreviewMessage>> {
        self.handle.mailbox()
    }

    /// Capability consumers use to hand buffers back to this worker.
    pub fn return_capability(&self) -> &Arc<PreviewReturn> {
        &self.return_capability
    }

    /// Current preview state, readable from any thread without a message
    /// round-trip (the documented lock-free-polling exception).
    pub fn state(&self) -> PreviewState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, state: PreviewState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Queue a frame for display. Fire-and-forget; ownership of the frame
    /// moves to the worker.
    pub fn render(&self, frame: FrameDescriptor) {
        self.handle.mailbox().send(PreviewMessage::Render(frame));
    }

    pub fn set_surface(&self, surface: Option<Box<dyn DisplaySurface>>) -> OpResult {
        self.handle
            .mailbox()
            .send_and_wait(PreviewMessage::SetSurface(surface), reply::SET_SURFACE)
    }

    pub fn configure(&self, geometry: PreviewGeometry) -> OpResult {
        self.handle
            .mailbox()
            .send_and_wait(PreviewMessage::Configure(geometry), reply::CONFIGURE)
    }

    /// Pre-fetch the window pool for zero-copy capture.
    pub fn fetch_buffers(&self) -> Result<Vec<FrameDescriptor>, PipelineError> {
        let out = Arc::new(Mutex::new(Vec::new()));
        self.handle
            .mailbox()
            .send_and_wait(PreviewMessage::FetchBuffers(out.clone()), reply::FETCH_BUFFERS)?;
        let mut fetched = out.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::take(&mut *fetched))
    }

    pub fn return_pool(&self) -> OpResult {
        self.handle
            .mailbox()
            .send_and_wait(PreviewMessage::ReturnPool, reply::RETURN_POOL)
    }

    /// Flush queued frames back to their owners, then synchronize with the
    /// worker so in-flight rendering has drained too.
    pub fn flush(&self) -> OpResult {
        for msg in self.handle.mailbox().remove_matching(PreviewKind::Render) {
            if let PreviewMessage::Render(frame) = msg {
                frame.return_to_owner();
            }
        }
        for msg in self
            .handle
            .mailbox()
            .remove_matching(PreviewKind::ReturnBuffer)
        {
            if let PreviewMessage::ReturnBuffer(frame) = msg {
                frame.return_to_owner();
            }
        }
        self.handle
            .mailbox()
            .send_and_wait(PreviewMessage::Flush, reply::FLUSH)
    }

    /// Exit protocol: the exit message is the last one processed, then the
    /// thread is joined.
    pub fn exit(&mut self) {
        self.handle.mailbox().send(PreviewMessage::Exit);
        self.handle.join();
    }
}
