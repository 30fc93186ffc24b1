//! Frame descriptors and the single-owner circulation protocol.
//!
//! A [`FrameDescriptor`] is the unit of work passed between pipeline
//! stages: geometry, pixel format, status, a reference to the backing
//! memory, and a back-pointer to the [`BufferOwner`] that must be notified
//! when the current holder is done.
//!
//! Ownership is a protocol, not a count. Whoever holds the descriptor is
//! the only party entitled to touch the backing memory, and must do exactly
//! one of two things with it: forward it to exactly one next holder, or
//! hand it back with [`FrameDescriptor::return_to_owner`]. Moving the
//! descriptor moves the backing access with it, so the compiler enforces
//! most of the discipline; the debug [`tracker`] ledger catches the rest
//! (a buffer returned twice, or never).

pub mod format;
pub mod tracker;

use crate::surface::{Mapping, SurfaceHandle};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

pub use format::PixelFormat;

/// Advisory status of the frame carried by a descriptor.
///
/// Every stage applies the same fast-fail rule: a `Corrupted` or `Skipped`
/// frame is returned to its owner immediately, without processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    Corrupted,
    Skipped,
    NotApplicable,
}

/// Which pool the backing memory was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// Allocated by the capture side; returned there when released.
    CapturePool,
    /// Dequeued from the display surface; the surface disposes of it.
    DisplaySurface,
}

/// Backing-memory reference carried by a descriptor.
///
/// Moving the descriptor moves this access; only the current holder can
/// reach the bytes.
pub enum FrameData {
    /// Bare format descriptor, no memory attached.
    None,
    /// Capture-pool memory owned outright by the descriptor.
    Owned(Box<[u8]>),
    /// A locked display-surface buffer; `mapping` is the live CPU window
    /// into it and is surrendered when the buffer is unlocked.
    Surface {
        handle: SurfaceHandle,
        mapping: Mapping,
    },
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::None => write!(f, "None"),
            FrameData::Owned(bytes) => write!(f, "Owned({} bytes)", bytes.len()),
            FrameData::Surface { handle, .. } => write!(f, "Surface({:?})", handle),
        }
    }
}

/// Capability for taking a buffer back when a holder is finished with it.
///
/// Implemented by every component that can be a terminal or intermediate
/// holder; this replaces reference counting with an explicit hand-back.
pub trait BufferOwner: Send + Sync {
    fn return_buffer(&self, frame: FrameDescriptor);
}

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique frame id.
pub fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

/// Value-type description of one circulating image buffer.
pub struct FrameDescriptor {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per line, which may exceed the payload width when a buffer
    /// provider pads for alignment.
    pub stride_bytes: usize,
    pub format: PixelFormat,
    pub size_bytes: usize,
    pub backing: BackingKind,
    pub status: FrameStatus,
    /// Monotonic counter stamped by the capture source.
    pub frame_counter: u64,
    /// Who must be notified when the current holder is finished. A weak
    /// back-reference: lifecycle bookkeeping only, never a second mutator.
    pub owner: Option<Weak<dyn BufferOwner>>,
    /// Optional side-channel buffer (postview image, codec metadata).
    pub aux: Option<Box<FrameDescriptor>>,
    pub data: FrameData,
}

impl std::fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("id", &self.id)
            .field("geometry", &format_args!("{}x{}", self.width, self.height))
            .field("stride_bytes", &self.stride_bytes)
            .field("format", &self.format)
            .field("status", &self.status)
            .field("backing", &self.backing)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl FrameDescriptor {
    /// A bare format descriptor: geometry only, no memory, no owner.
    pub fn format_descriptor(format: PixelFormat, width: u32, height: u32) -> Self {
        let stride_bytes = format::pixels_to_bytes(format, width as usize);
        FrameDescriptor {
            id: next_frame_id(),
            width,
            height,
            stride_bytes,
            format,
            size_bytes: format::frame_size(format, width as usize, height as usize),
            backing: BackingKind::CapturePool,
            status: FrameStatus::NotApplicable,
            frame_counter: 0,
            owner: None,
            aux: None,
            data: FrameData::None,
        }
    }

    /// A capture-pool frame backed by `bytes`.
    pub fn with_owned(format: PixelFormat, width: u32, height: u32, bytes: Box<[u8]>) -> Self {
        let mut desc = Self::format_descriptor(format, width, height);
        desc.size_bytes = bytes.len();
        desc.status = FrameStatus::Ok;
        desc.data = FrameData::Owned(bytes);
        desc
    }

    /// Record `owner` as the party owed this buffer. `holder` names the
    /// component assuming the return obligation, for the debug ledger.
    pub fn assign_owner(&mut self, owner: Weak<dyn BufferOwner>, holder: &'static str) {
        if self.owner.is_some() {
            warn!("frame {}: owner reassigned while already owed", self.id);
        } else {
            tracker::claim(self.id, holder);
        }
        self.owner = Some(owner);
    }

    /// Take the owner back-reference and the return obligation with it.
    /// The caller must either discharge the obligation (return a stand-in
    /// buffer to this owner) or re-assign it.
    pub fn take_owner(&mut self) -> Option<Weak<dyn BufferOwner>> {
        let owner = self.owner.take();
        if owner.is_some() {
            tracker::release(self.id);
        }
        owner
    }

    /// True when downstream stages must bounce this frame straight back.
    pub fn fast_fail(&self) -> bool {
        matches!(self.status, FrameStatus::Corrupted | FrameStatus::Skipped)
    }

    /// Read access to the backing memory, if any is attached.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            FrameData::None => None,
            FrameData::Owned(bytes) => Some(bytes),
            FrameData::Surface { mapping, .. } => Some(mapping.bytes()),
        }
    }

    /// Write access to the backing memory, if any is attached.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            FrameData::None => None,
            FrameData::Owned(bytes) => Some(bytes),
            FrameData::Surface { mapping, .. } => Some(mapping.bytes_mut()),
        }
    }

    /// The display-surface handle backing this frame, when there is one.
    pub fn surface_handle(&self) -> Option<SurfaceHandle> {
        match &self.data {
            FrameData::Surface { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Hand the buffer back to its declared owner, discharging the return
    /// obligation. A dead or missing owner is logged and the backing memory
    /// dropped here - never leaked silently, never double-returned.
    pub fn return_to_owner(mut self) {
        match self.take_owner().and_then(|weak| weak.upgrade()) {
            Some(owner) => {
                trace!("frame {}: returned to owner", self.id);
                owner.return_buffer(self);
            }
            None => {
                debug!("frame {}: no live owner, dropping backing", self.id);
            }
        }
    }
}
