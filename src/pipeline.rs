//! Pipeline assembly: one explicitly constructed, caller-owned object that
//! spawns every worker, wires the throttle fan-out, and routes capture
//! frames to their stages.
//!
//! There is deliberately no process-wide instance of anything here; the
//! pipeline (and every service it builds) is created by the caller, passed
//! by reference where needed, and torn down by the caller through the exit
//! protocol.

use crate::callbacks::PipelineCallbacks;
use crate::capture::{CaptureEvent, FrameListener, StreamKind};
use crate::buffer::FrameDescriptor;
use crate::config::PipelineConfig;
use crate::error::OpResult;
use crate::mailbox::Mailbox;
use crate::preview::{PreviewGeometry, PreviewMessage, PreviewState, PreviewWorker};
use crate::surface::DisplaySurface;
use crate::workers::still::{StillEncoder, StillMessage, StillWorker};
use crate::workers::throttle::{ThermalProbe, ThrottleThresholds, ThrottleWorker};
use crate::workers::video::{VideoEncoder, VideoMessage, VideoWorker};
use anyhow::{Context, Result};
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// The algorithm collaborators a pipeline is assembled around.
pub struct PipelineCollaborators {
    pub video_encoder: Box<dyn VideoEncoder>,
    pub still_encoder: Box<dyn StillEncoder>,
    pub thermal_probe: Box<dyn ThermalProbe>,
}

/// A running pipeline: preview, video, still and throttle workers.
pub struct CameraPipeline {
    config: PipelineConfig,
    preview: PreviewWorker,
    video: VideoWorker,
    still: StillWorker,
    throttle: ThrottleWorker,
}

impl CameraPipeline {
    pub fn new(
        config: PipelineConfig,
        callbacks: Arc<PipelineCallbacks>,
        collaborators: PipelineCollaborators,
    ) -> Result<Self> {
        let preview = PreviewWorker::spawn().context("spawning preview worker")?;
        let video =
            VideoWorker::spawn(collaborators.video_encoder).context("spawning video worker")?;
        let still = StillWorker::spawn(collaborators.still_encoder, callbacks)
            .context("spawning still worker")?;
        let throttle = ThrottleWorker::spawn(
            collaborators.thermal_probe,
            ThrottleThresholds {
                mild_c: config.thermal.mild_c,
                severe_c: config.thermal.severe_c,
                hysteresis_c: config.thermal.hysteresis_c,
            },
            Duration::from_millis(config.thermal.poll_interval_ms),
            vec![video.throttle_listener()],
        )
        .context("spawning throttle worker")?;

        info!("pipeline: all workers running");
        Ok(CameraPipeline {
            config,
            preview,
            video,
            still,
            throttle,
        })
    }

    pub fn preview(&self) -> &PreviewWorker {
        &self.preview
    }

    pub fn video(&self) -> &VideoWorker {
        &self.video
    }

    pub fn still(&self) -> &StillWorker {
        &self.still
    }

    pub fn throttle(&self) -> &ThrottleWorker {
        &self.throttle
    }

    /// Attach the display surface, size the window pool against its
    /// constraints, and start displaying frames. Pool-sizing failures are
    /// fatal setup errors and abort the start.
    pub fn start_preview(
        &self,
        surface: Box<dyn DisplaySurface>,
        width: u32,
        height: u32,
    ) -> OpResult {
        self.preview.set_surface(Some(surface))?;
        self.preview.configure(PreviewGeometry {
            width,
            height,
            format: self.config.preview.format,
            buffer_count: self.config.preview.buffer_count,
            zero_copy: self.config.preview.zero_copy,
        })?;
        self.preview.set_state(PreviewState::Enabled);
        Ok(())
    }

    /// Stop displaying: flush queued frames back to their owners, release
    /// the window pool, detach the surface.
    pub fn stop_preview(&self) -> OpResult {
        self.preview.set_state(PreviewState::Stopped);
        self.preview.flush()?;
        self.preview.return_pool()?;
        self.preview.set_surface(None)
    }

    /// Synchronous cancellation across all stages: queued work is removed
    /// and returned to its owners, then each worker is drained.
    pub fn flush(&self) -> OpResult {
        self.preview.flush()?;
        self.video.flush()?;
        self.still.flush()
    }

    /// The front door the capture source pushes frames at.
    pub fn sink(&self) -> Arc<PipelineSink> {
        Arc::new(PipelineSink {
            preview: self.preview.mailbox().clone(),
            video: self.video.mailbox().clone(),
            still: self.still.mailbox().clone(),
        })
    }

    /// Exit protocol: every worker gets its exit message as the last
    /// message, then is joined. Consumes the pipeline.
    pub fn shutdown(mut self) {
        info!("pipeline: shutting down");
        self.throttle.exit();
        self.video.exit();
        self.still.exit();
        self.preview.exit();
    }
}

/// Routes capture frames to the right worker mailbox.
///
/// Runs on the capture source's thread; it only applies the shared
/// fast-fail rule and enqueues, so the capture callback never blocks on
/// pipeline work.
pub struct PipelineSink {
    preview: Arc<Mailbox<PreviewMessage>>,
    video: Arc<Mailbox<VideoMessage>>,
    still: Arc<Mailbox<StillMessage>>,
}

impl FrameListener for PipelineSink {
    fn on_frame(&self, frame: FrameDescriptor, stream: StreamKind, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame => {}
            CaptureEvent::FrameDropped | CaptureEvent::Error => {
                debug!(
                    "pipeline: {:?} event on {:?} stream, returning frame {}",
                    event, stream, frame.id
                );
                frame.return_to_owner();
                return;
            }
        }
        if frame.fast_fail() {
            debug!(
                "pipeline: frame {} arrived {:?}, returning to owner",
                frame.id, frame.status
            );
            frame.return_to_owner();
            return;
        }
        match stream {
            StreamKind::Preview => self.preview.send(PreviewMessage::Render(frame)),
            StreamKind::Video => self.video.send(VideoMessage::Frame(frame)),
            StreamKind::Snapshot => self.still.send(StillMessage::Encode(frame)),
        }
    }
}
