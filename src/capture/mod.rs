//! Capture-source boundary.
//!
//! The capture device is an external collaborator that pushes frames at
//! the pipeline through [`FrameListener::on_frame`]. The capacity contract
//! runs the other way: every `Ok` frame delivered must eventually be
//! returned to its owner exactly once, directly or through a forwarding
//! chain, or the capture source stalls for want of buffers.

pub mod mock;

use crate::buffer::FrameDescriptor;

/// Which stream a pushed frame belongs to; routing key for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Preview,
    Video,
    Snapshot,
}

/// What the capture source is announcing alongside a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A frame to process.
    Frame,
    /// The driver dropped a frame; the descriptor is a placeholder.
    FrameDropped,
    /// The capture device reported an error on this stream.
    Error,
}

/// Push-style frame consumer implemented by the pipeline front door.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: FrameDescriptor, stream: StreamKind, event: CaptureEvent);
}
