//! Thermal throttle worker.
//!
//! Polls a thermal probe on its idle timeout and fans the computed level
//! out to listeners registered at construction time. The current level is
//! additionally readable from any thread through its own lock, the same
//! lock-free-polling exception the preview state uses.

use crate::error::{OpResult, PipelineError};
use crate::mailbox::{MailMessage, Mailbox};
use crate::worker::{self, ActiveObject, Flow, WorkerHandle};
use log::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Temperature source (platform sensor, firmware register). Invoked as a
/// plain blocking call from the throttle thread.
pub trait ThermalProbe: Send {
    fn read_celsius(&mut self) -> Result<f32, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThrottleLevel {
    None,
    Mild,
    Severe,
}

/// Registered per-listener at construction; no interface inheritance.
pub trait ThrottleListener: Send + Sync {
    fn on_throttle(&self, level: ThrottleLevel);
}

/// Temperature thresholds with a hysteresis band for stepping back down.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleThresholds {
    pub mild_c: f32,
    pub severe_c: f32,
    pub hysteresis_c: f32,
}

pub enum ThrottleMessage {
    /// Force an immediate probe read (tests, resume-from-suspend).
    Probe,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleKind {
    Probe,
    Exit,
}

impl MailMessage for ThrottleMessage {
    type Kind = ThrottleKind;
    fn kind(&self) -> ThrottleKind {
        match self {
            ThrottleMessage::Probe => ThrottleKind::Probe,
            ThrottleMessage::Exit => ThrottleKind::Exit,
        }
    }
}

mod reply {
    pub const PROBE: usize = 0;
    pub const COUNT: usize = 1;
}

struct ThrottleActor {
    mailbox: Arc<Mailbox<ThrottleMessage>>,
    probe: Box<dyn ThermalProbe>,
    thresholds: ThrottleThresholds,
    poll_interval: Duration,
    listeners: Vec<Arc<dyn ThrottleListener>>,
    level: Arc<Mutex<ThrottleLevel>>,
}

impl ThrottleActor {
    fn current(&self) -> ThrottleLevel {
        *self.level.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn classify(&self, celsius: f32) -> ThrottleLevel {
        let current = self.current();
        // Stepping down requires clearing the threshold by the hysteresis
        // band, so the level does not flap around a boundary.
        let slack = |level| {
            if current >= level {
                self.thresholds.hysteresis_c
            } else {
                0.0
            }
        };
        if celsius >= self.thresholds.severe_c - slack(ThrottleLevel::Severe) {
            ThrottleLevel::Severe
        } else if celsius >= self.thresholds.mild_c - slack(ThrottleLevel::Mild) {
            ThrottleLevel::Mild
        } else {
            ThrottleLevel::None
        }
    }

    fn sample(&mut self) -> Result<(), PipelineError> {
        let celsius = self.probe.read_celsius()?;
        let level = self.classify(celsius);
        if level != self.current() {
            info!(
                "throttle: {:.1}C, level {:?} -> {:?}",
                celsius,
                self.current(),
                level
            );
            *self.level.lock().unwrap_or_else(|e| e.into_inner()) = level;
            for listener in &self.listeners {
                listener.on_throttle(level);
            }
        }
        Ok(())
    }
}

impl ActiveObject for ThrottleActor {
    type Msg = ThrottleMessage;

    fn on_message(&mut self, msg: ThrottleMessage) -> Result<Flow, PipelineError> {
        match msg {
            ThrottleMessage::Probe => {
                let status = self.sample();
                self.mailbox.reply(reply::PROBE, status.clone());
                status.map(|()| Flow::Continue)
            }
            ThrottleMessage::Exit => Ok(Flow::Exit),
        }
    }

    fn idle_timeout(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }

    fn on_idle(&mut self) -> Result<(), PipelineError> {
        self.sample()
    }
}

/// Front-end handle to the throttle worker thread.
pub struct ThrottleWorker {
    handle: WorkerHandle<ThrottleMessage>,
    level: Arc<Mutex<ThrottleLevel>>,
}

impl ThrottleWorker {
    pub fn spawn(
        probe: Box<dyn ThermalProbe>,
        thresholds: ThrottleThresholds,
        poll_interval: Duration,
        listeners: Vec<Arc<dyn ThrottleListener>>,
    ) -> anyhow::Result<Self> {
        let mailbox = Arc::new(Mailbox::with_reply_slots("throttle", reply::COUNT));
        let level = Arc::new(Mutex::new(ThrottleLevel::None));
        let actor = ThrottleActor {
            mailbox: mailbox.clone(),
            probe,
            thresholds,
            poll_interval,
            listeners,
            level: level.clone(),
        };
        let handle = worker::spawn("throttle", mailbox, actor)?;
        Ok(ThrottleWorker { handle, level })
    }

    /// Current throttle level, readable without a message round-trip.
    pub fn current_level(&self) -> ThrottleLevel {
        *self.level.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Force a probe read now and wait for it.
    pub fn probe_now(&self) -> OpResult {
        self.handle
            .mailbox()
            .send_and_wait(ThrottleMessage::Probe, reply::PROBE)
    }

    pub fn exit(&mut self) {
        self.handle.mailbox().send(ThrottleMessage::Exit);
        self.handle.join();
    }
}
