//! Mailbox - typed FIFO message queue with optional synchronous replies.
//!
//! Every pipeline worker owns exactly one `Mailbox` and drains it from a
//! single thread. Senders enqueue tagged messages; a sender that needs a
//! synchronous answer parks on one of the mailbox's fixed reply slots until
//! the worker (or anyone else - replies are cross-cutting) completes it.
//!
//! Ordering: messages from one sender arrive in send order. Nothing is
//! guaranteed across senders; cross-component ordering must be expressed
//! with `send_and_wait`.

use crate::error::{OpResult, PipelineError};
use log::*;
use std::collections::VecDeque;
use std::sync::{Condvar, LockResult, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A tagged message deliverable through a [`Mailbox`].
///
/// Payloads are enum variants, so the tag and the payload cannot disagree;
/// `kind` exposes the discriminant for selective removal (flush).
pub trait MailMessage: Send {
    /// Discriminant type, used by [`Mailbox::remove_matching`].
    type Kind: Copy + Eq + std::fmt::Debug + Send;

    /// The tag of this message.
    fn kind(&self) -> Self::Kind;
}

/// Marker returned by [`Mailbox::recv_timeout`] when the wait elapsed.
///
/// A timeout removes nothing from the queue; the worker treats it as
/// "no work" and loops again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvTimeout;

struct Envelope<M> {
    msg: M,
    /// Reply slot the sender is parked on, recorded so a flush can
    /// complete it with `Cancelled` instead of leaving the sender hanging.
    reply_slot: Option<usize>,
}

struct ReplyState {
    /// Completions produced by `reply` and not yet consumed by a waiter.
    ready: usize,
    /// Bumped by `reply_broadcast`; releases every waiter that saw an
    /// earlier epoch.
    epoch: u64,
    last: OpResult,
}

struct ReplySlot {
    state: Mutex<ReplyState>,
    cond: Condvar,
}

impl ReplySlot {
    fn new() -> Self {
        ReplySlot {
            state: Mutex::new(ReplyState {
                ready: 0,
                epoch: 0,
                last: Ok(()),
            }),
            cond: Condvar::new(),
        }
    }
}

/// Thread-safe FIFO mailbox with a fixed set of synchronous reply slots.
///
/// Reply slots are declared at construction; by convention each slot serves
/// one outstanding request at a time (typically one slot per synchronous
/// message kind).
pub struct Mailbox<M: MailMessage> {
    name: &'static str,
    queue: Mutex<VecDeque<Envelope<M>>>,
    available: Condvar,
    slots: Vec<ReplySlot>,
}

/// A poisoned queue mutex means a handler panicked mid-send on some other
/// thread; the queue itself is still structurally sound, so we keep going
/// rather than letting one bad stage take the whole pipeline down.
fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|e| e.into_inner())
}

impl<M: MailMessage> Mailbox<M> {
    /// Create a mailbox with no reply slots.
    pub fn new(name: &'static str) -> Self {
        Self::with_reply_slots(name, 0)
    }

    /// Create a mailbox with `num_reply_slots` synchronous reply slots.
    pub fn with_reply_slots(name: &'static str, num_reply_slots: usize) -> Self {
        Mailbox {
            name,
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            slots: (0..num_reply_slots).map(|_| ReplySlot::new()).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        relock(self.queue.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        relock(self.queue.lock()).is_empty()
    }

    fn push(&self, env: Envelope<M>) {
        let mut queue = relock(self.queue.lock());
        queue.push_back(env);
        self.available.notify_one();
    }

    /// Enqueue a message. Never fails; the queue is unbounded.
    pub fn send(&self, msg: M) {
        trace!("{}: send {:?}", self.name, msg.kind());
        self.push(Envelope {
            msg,
            reply_slot: None,
        });
    }

    /// Enqueue a message and block until someone completes reply slot
    /// `slot`, returning the reply status.
    ///
    /// Naming a slot the mailbox was not built with is a usage error: the
    /// message is not enqueued and `InvalidReplySlot` is returned.
    pub fn send_and_wait(&self, msg: M, slot: usize) -> OpResult {
        if slot >= self.slots.len() {
            error!(
                "{}: send_and_wait used reply slot {} but mailbox declares {}",
                self.name,
                slot,
                self.slots.len()
            );
            return Err(PipelineError::InvalidReplySlot(slot));
        }
        trace!("{}: send {:?} (waiting on slot {})", self.name, msg.kind(), slot);
        // Snapshot the broadcast epoch before the message becomes visible
        // so a reply racing ahead of our wait is not missed.
        let entry_epoch = relock(self.slots[slot].state.lock()).epoch;
        self.push(Envelope {
            msg,
            reply_slot: Some(slot),
        });
        self.wait_reply(slot, entry_epoch)
    }

    fn wait_reply(&self, slot: usize, entry_epoch: u64) -> OpResult {
        let cell = &self.slots[slot];
        let mut state = relock(cell.state.lock());
        loop {
            if state.ready > 0 {
                state.ready -= 1;
                return state.last.clone();
            }
            if state.epoch != entry_epoch {
                return state.last.clone();
            }
            state = relock(cell.cond.wait(state));
        }
    }

    /// Complete one waiter on `slot` with `status`.
    pub fn reply(&self, slot: usize, status: OpResult) {
        let Some(cell) = self.slots.get(slot) else {
            error!("{}: reply to undeclared slot {}", self.name, slot);
            return;
        };
        let mut state = relock(cell.state.lock());
        state.ready += 1;
        state.last = status;
        cell.cond.notify_one();
    }

    /// Complete every current waiter on `slot` with `status`.
    pub fn reply_broadcast(&self, slot: usize, status: OpResult) {
        let Some(cell) = self.slots.get(slot) else {
            error!("{}: broadcast reply to undeclared slot {}", self.name, slot);
            return;
        };
        let mut state = relock(cell.state.lock());
        state.epoch = state.epoch.wrapping_add(1);
        state.last = status;
        cell.cond.notify_all();
    }

    /// Block until a message is available and pop the oldest one.
    pub fn recv(&self) -> M {
        let mut queue = relock(self.queue.lock());
        loop {
            if let Some(env) = queue.pop_front() {
                return env.msg;
            }
            queue = relock(self.available.wait(queue));
        }
    }

    /// Block up to `timeout` for a message. A timeout leaves the queue
    /// untouched.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeout> {
        let deadline = Instant::now() + timeout;
        let mut queue = relock(self.queue.lock());
        loop {
            if let Some(env) = queue.pop_front() {
                return Ok(env.msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeout);
            }
            let (guard, _) = self
                .available
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    /// Remove every queued message of `kind` and hand them back so the
    /// caller can release any resources held by their payloads.
    ///
    /// If a removed message had a sender parked on a reply slot, that slot
    /// is completed with [`PipelineError::Cancelled`] - a flushed
    /// synchronous sender is never left blocked.
    pub fn remove_matching(&self, kind: M::Kind) -> Vec<M> {
        let mut cancelled_slots = Vec::new();
        let mut removed = Vec::new();
        {
            let mut queue = relock(self.queue.lock());
            let mut kept = VecDeque::with_capacity(queue.len());
            for env in queue.drain(..) {
                if env.msg.kind() == kind {
                    if let Some(slot) = env.reply_slot {
                        cancelled_slots.push(slot);
                    }
                    removed.push(env.msg);
                } else {
                    kept.push_back(env);
                }
            }
            *queue = kept;
        }
        if !removed.is_empty() {
            debug!(
                "{}: removed {} queued {:?} message(s)",
                self.name,
                removed.len(),
                kind
            );
        }
        for slot in cancelled_slots {
            self.reply(slot, Err(PipelineError::Cancelled));
        }
        removed
    }
}

impl<M: MailMessage> Drop for Mailbox<M> {
    fn drop(&mut self) {
        let mut queue = relock(self.queue.lock());
        if !queue.is_empty() {
            // A live queue at teardown is a design error in the owning
            // worker's exit protocol; surface it loudly.
            error!(
                "{}: destroyed with {} undelivered message(s)",
                self.name,
                queue.len()
            );
            let leftovers: Vec<_> = queue.drain(..).collect();
            drop(queue);
            for env in leftovers {
                if let Some(slot) = env.reply_slot {
                    self.reply(slot, Err(PipelineError::Cancelled));
                }
            }
        }
    }
}
