//! Video worker - feeds capture frames to the video encoder.

use crate::buffer::FrameDescriptor;
use crate::error::{OpResult, PipelineError};
use crate::mailbox::{MailMessage, Mailbox};
use crate::worker::{self, ActiveObject, Flow, WorkerHandle};
use crate::workers::throttle::{ThrottleLevel, ThrottleListener};
use log::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The encoder boundary. Invoked as a plain blocking call from the video
/// thread; it must not retain the frame past the call.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &FrameDescriptor) -> Result<(), PipelineError>;
}

pub enum VideoMessage {
    Frame(FrameDescriptor),
    Flush,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoKind {
    Frame,
    Flush,
    Exit,
}

impl MailMessage for VideoMessage {
    type Kind = VideoKind;
    fn kind(&self) -> VideoKind {
        match self {
            VideoMessage::Frame(_) => VideoKind::Frame,
            VideoMessage::Flush => VideoKind::Flush,
            VideoMessage::Exit => VideoKind::Exit,
        }
    }
}

mod reply {
    pub const FLUSH: usize = 0;
    pub const COUNT: usize = 1;
}

struct VideoActor {
    mailbox: Arc<Mailbox<VideoMessage>>,
    encoder: Box<dyn VideoEncoder>,
    /// Encode one frame out of this many; thermal throttling raises it.
    /// Shared with the throttle listener, hence atomic.
    skip_interval: Arc<AtomicU32>,
    frames_seen: u64,
    frames_encoded: u64,
}

impl VideoActor {
    fn handle_frame(&mut self, frame: FrameDescriptor) -> Result<(), PipelineError> {
        if frame.fast_fail() {
            debug!(
                "video: frame {} arrived {:?}, bouncing to owner",
                frame.id, frame.status
            );
            frame.return_to_owner();
            return Ok(());
        }
        self.frames_seen += 1;
        let interval = self.skip_interval.load(Ordering::Relaxed).max(1) as u64;
        if self.frames_seen % interval != 0 {
            trace!("video: throttled, skipping frame {}", frame.id);
            frame.return_to_owner();
            return Ok(());
        }
        let status = self.encoder.encode(&frame);
        if let Err(ref e) = status {
            warn!("video: encoder rejected frame {}: {}", frame.id, e);
        } else {
            self.frames_encoded += 1;
        }
        frame.return_to_owner();
        status
    }
}

impl ActiveObject for VideoActor {
    type Msg = VideoMessage;

    fn on_message(&mut self, msg: VideoMessage) -> Result<Flow, PipelineError> {
        match msg {
            VideoMessage::Frame(frame) => self.handle_frame(frame).map(|()| Flow::Continue),
            VideoMessage::Flush => {
                self.mailbox.reply(reply::FLUSH, Ok(()));
                Ok(Flow::Continue)
            }
            VideoMessage::Exit => {
                debug!(
                    "video: exiting, {} of {} frames encoded",
                    self.frames_encoded, self.frames_seen
                );
                Ok(Flow::Exit)
            }
        }
    }
}

/// Front-end handle to the video worker thread.
pub struct VideoWorker {
    handle: WorkerHandle<VideoMessage>,
    skip_interval: Arc<AtomicU32>,
}

impl VideoWorker {
    pub fn spawn(encoder: Box<dyn VideoEncoder>) -> anyhow::Result<Self> {
        let mailbox = Arc::new(Mailbox::with_reply_slots("video", reply::COUNT));
        let skip_interval = Arc::new(AtomicU32::new(1));
        let actor = VideoActor {
            mailbox: mailbox.clone(),
            encoder,
            skip_interval: skip_interval.clone(),
            frames_seen: 0,
            frames_encoded: 0,
        };
        let handle = worker::spawn("video", mailbox, actor)?;
        Ok(VideoWorker {
            handle,
            skip_interval,
        })
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<VideoMessage>> {
        self.handle.mailbox()
    }

    /// Queue a frame for encoding; ownership moves to the worker.
    pub fn encode(&self, frame: FrameDescriptor) {
        self.handle.mailbox().send(VideoMessage::Frame(frame));
    }

    /// Return all queued frames to their owners, then synchronize.
    pub fn flush(&self) -> OpResult {
        for msg in self.handle.mailbox().remove_matching(VideoKind::Frame) {
            if let VideoMessage::Frame(frame) = msg {
                frame.return_to_owner();
            }
        }
        self.handle
            .mailbox()
            .send_and_wait(VideoMessage::Flush, reply::FLUSH)
    }

    /// Throttle listener adjusting the encode skip interval; registered
    /// with the thermal worker at pipeline construction.
    pub fn throttle_listener(&self) -> Arc<dyn ThrottleListener> {
        Arc::new(VideoThrottle {
            skip_interval: self.skip_interval.clone(),
        })
    }

    pub fn exit(&mut self) {
        self.handle.mailbox().send(VideoMessage::Exit);
        self.handle.join();
    }
}

struct VideoThrottle {
    skip_interval: Arc<AtomicU32>,
}

impl ThrottleListener for VideoThrottle {
    fn on_throttle(&self, level: ThrottleLevel) {
        let interval = match level {
            ThrottleLevel::None => 1,
            ThrottleLevel::Mild => 2,
            ThrottleLevel::Severe => 4,
        };
        info!("video: throttle level {:?}, encoding 1/{} frames", level, interval);
        self.skip_interval.store(interval, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferOwner, PixelFormat};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Weak;

    struct CountingOwner {
        accepted: AtomicUsize,
    }

    impl BufferOwner for CountingOwner {
        fn return_buffer(&self, _frame: FrameDescriptor) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingEncoder {
        encoded: Arc<AtomicUsize>,
    }

    impl VideoEncoder for CountingEncoder {
        fn encode(&mut self, _frame: &FrameDescriptor) -> Result<(), PipelineError> {
            self.encoded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame(owner: &Arc<CountingOwner>) -> FrameDescriptor {
        let mut frame = FrameDescriptor::with_owned(
            PixelFormat::Nv12,
            16,
            16,
            vec![0u8; 16 * 16 * 3 / 2].into_boxed_slice(),
        );
        let dyn_owner: Arc<dyn BufferOwner> = owner.clone();
        let weak: Weak<dyn BufferOwner> = Arc::downgrade(&dyn_owner);
        frame.assign_owner(weak, "video-test");
        frame
    }

    fn wait_for(counter: &AtomicUsize, target: usize) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < target {
            assert!(std::time::Instant::now() < deadline, "worker stalled");
            std::thread::yield_now();
        }
    }

    #[test]
    fn every_frame_is_returned_exactly_once() {
        let encoded = Arc::new(AtomicUsize::new(0));
        let mut worker = VideoWorker::spawn(Box::new(CountingEncoder {
            encoded: encoded.clone(),
        }))
        .unwrap();
        let owner = Arc::new(CountingOwner {
            accepted: AtomicUsize::new(0),
        });
        for _ in 0..10 {
            worker.encode(frame(&owner));
        }
        wait_for(&owner.accepted, 10);
        assert_eq!(encoded.load(Ordering::SeqCst), 10);
        worker.exit();
    }

    #[test]
    fn throttling_skips_frames_but_still_returns_them() {
        let encoded = Arc::new(AtomicUsize::new(0));
        let mut worker = VideoWorker::spawn(Box::new(CountingEncoder {
            encoded: encoded.clone(),
        }))
        .unwrap();
        worker.throttle_listener().on_throttle(ThrottleLevel::Severe);

        let owner = Arc::new(CountingOwner {
            accepted: AtomicUsize::new(0),
        });
        for _ in 0..8 {
            worker.encode(frame(&owner));
        }
        wait_for(&owner.accepted, 8);
        assert_eq!(encoded.load(Ordering::SeqCst), 2);
        worker.exit();
    }

    #[test]
    fn flush_returns_queued_frames_without_encoding() {
        let encoded = Arc::new(AtomicUsize::new(0));
        let mut worker = VideoWorker::spawn(Box::new(CountingEncoder {
            encoded: encoded.clone(),
        }))
        .unwrap();
        let owner = Arc::new(CountingOwner {
            accepted: AtomicUsize::new(0),
        });
        // Jam the mailbox faster than the worker drains, then flush; every
        // frame must still come back exactly once.
        for _ in 0..50 {
            worker.encode(frame(&owner));
        }
        worker.flush().unwrap();
        assert_eq!(owner.accepted.load(Ordering::SeqCst), 50);
        worker.exit();
    }
}
