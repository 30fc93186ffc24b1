//! Client callback table.
//!
//! Event fan-out is a set of independently registered function references,
//! one per event kind, built once and shared immutably - no callback
//! interface for clients to inherit from, and nothing to re-register at
//! runtime. Unregistered events are dropped with a trace log.

use crate::buffer::FrameDescriptor;
use crate::error::PipelineError;
use crate::workers::still::EncodedImage;
use log::*;

type PictureDoneFn = Box<dyn Fn(EncodedImage) + Send + Sync>;
type PreviewFrameFn = Box<dyn Fn(&FrameDescriptor) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&PipelineError) + Send + Sync>;

/// Immutable callback table dispatched into by pipeline workers.
#[derive(Default)]
pub struct PipelineCallbacks {
    picture_done: Option<PictureDoneFn>,
    preview_frame: Option<PreviewFrameFn>,
    error: Option<ErrorFn>,
}

impl PipelineCallbacks {
    pub fn builder() -> PipelineCallbacksBuilder {
        PipelineCallbacksBuilder {
            callbacks: PipelineCallbacks::default(),
        }
    }

    /// Deliver a finished still image.
    pub fn picture_done(&self, image: EncodedImage) {
        match &self.picture_done {
            Some(callback) => callback(image),
            None => trace!("callbacks: picture_done not registered, dropping image"),
        }
    }

    /// Announce a preview frame about to be displayed.
    pub fn preview_frame(&self, frame: &FrameDescriptor) {
        if let Some(callback) = &self.preview_frame {
            callback(frame);
        }
    }

    /// Report a non-fatal pipeline error to the client.
    pub fn error(&self, error: &PipelineError) {
        match &self.error {
            Some(callback) => callback(error),
            None => trace!("callbacks: error not registered: {}", error),
        }
    }
}

pub struct PipelineCallbacksBuilder {
    callbacks: PipelineCallbacks,
}

impl PipelineCallbacksBuilder {
    pub fn on_picture_done(mut self, f: impl Fn(EncodedImage) + Send + Sync + 'static) -> Self {
        self.callbacks.picture_done = Some(Box::new(f));
        self
    }

    pub fn on_preview_frame(mut self, f: impl Fn(&FrameDescriptor) + Send + Sync + 'static) -> Self {
        self.callbacks.preview_frame = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&PipelineError) + Send + Sync + 'static) -> Self {
        self.callbacks.error = Some(Box::new(f));
        self
    }

    pub fn build(self) -> PipelineCallbacks {
        self.callbacks
    }
}
