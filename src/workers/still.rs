//! Still-picture worker - encodes snapshots and delivers them through the
//! callback table.

use crate::buffer::{FrameDescriptor, PixelFormat};
use crate::callbacks::PipelineCallbacks;
use crate::error::{OpResult, PipelineError};
use crate::mailbox::{MailMessage, Mailbox};
use crate::worker::{self, ActiveObject, Flow, WorkerHandle};
use log::*;
use std::sync::Arc;

/// A finished still image produced by the encoder collaborator.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// The still-encoder boundary (JPEG assembly and friends live behind it).
/// Invoked as a plain blocking call; must not retain the frame.
pub trait StillEncoder: Send {
    fn encode(&mut self, frame: &FrameDescriptor) -> Result<EncodedImage, PipelineError>;
}

pub enum StillMessage {
    Encode(FrameDescriptor),
    Flush,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillKind {
    Encode,
    Flush,
    Exit,
}

impl MailMessage for StillMessage {
    type Kind = StillKind;
    fn kind(&self) -> StillKind {
        match self {
            StillMessage::Encode(_) => StillKind::Encode,
            StillMessage::Flush => StillKind::Flush,
            StillMessage::Exit => StillKind::Exit,
        }
    }
}

mod reply {
    pub const FLUSH: usize = 0;
    pub const COUNT: usize = 1;
}

struct StillActor {
    mailbox: Arc<Mailbox<StillMessage>>,
    encoder: Box<dyn StillEncoder>,
    callbacks: Arc<PipelineCallbacks>,
    pictures_done: u64,
}

impl StillActor {
    fn handle_encode(&mut self, mut frame: FrameDescriptor) -> Result<(), PipelineError> {
        if frame.fast_fail() {
            debug!(
                "still: frame {} arrived {:?}, bouncing to owner",
                frame.id, frame.status
            );
            frame.return_to_owner();
            return Ok(());
        }
        // The postview rides along as the aux buffer; it goes back to its
        // own owner regardless of how encoding fares.
        let aux = frame.aux.take();
        let status = match self.encoder.encode(&frame) {
            Ok(image) => {
                self.pictures_done += 1;
                self.callbacks.picture_done(image);
                Ok(())
            }
            Err(e) => {
                warn!("still: encoder failed on frame {}: {}", frame.id, e);
                self.callbacks.error(&e);
                Err(e)
            }
        };
        if let Some(aux) = aux {
            (*aux).return_to_owner();
        }
        frame.return_to_owner();
        status
    }
}

impl ActiveObject for StillActor {
    type Msg = StillMessage;

    fn on_message(&mut self, msg: StillMessage) -> Result<Flow, PipelineError> {
        match msg {
            StillMessage::Encode(frame) => self.handle_encode(frame).map(|()| Flow::Continue),
            StillMessage::Flush => {
                self.mailbox.reply(reply::FLUSH, Ok(()));
                Ok(Flow::Continue)
            }
            StillMessage::Exit => {
                debug!("still: exiting after {} pictures", self.pictures_done);
                Ok(Flow::Exit)
            }
        }
    }
}

/// Front-end handle to the still-picture worker thread.
pub struct StillWorker {
    handle: WorkerHandle<StillMessage>,
}

impl StillWorker {
    pub fn spawn(
        encoder: Box<dyn StillEncoder>,
        callbacks: Arc<PipelineCallbacks>,
    ) -> anyhow::Result<Self> {
        let mailbox = Arc::new(Mailbox::with_reply_slots("still", reply::COUNT));
        let actor = StillActor {
            mailbox: mailbox.clone(),
            encoder,
            callbacks,
            pictures_done: 0,
        };
        let handle = worker::spawn("still", mailbox, actor)?;
        Ok(StillWorker { handle })
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<StillMessage>> {
        self.handle.mailbox()
    }

    /// Queue a snapshot for encoding; ownership moves to the worker.
    pub fn encode(&self, frame: FrameDescriptor) {
        self.handle.mailbox().send(StillMessage::Encode(frame));
    }

    /// Return all queued snapshots (and their postviews) to their owners,
    /// then synchronize.
    pub fn flush(&self) -> OpResult {
        for msg in self.handle.mailbox().remove_matching(StillKind::Encode) {
            if let StillMessage::Encode(mut frame) = msg {
                if let Some(aux) = frame.aux.take() {
                    (*aux).return_to_owner();
                }
                frame.return_to_owner();
            }
        }
        self.handle
            .mailbox()
            .send_and_wait(StillMessage::Flush, reply::FLUSH)
    }

    pub fn exit(&mut self) {
        self.handle.mailbox().send(StillMessage::Exit);
        self.handle.join();
    }
}
