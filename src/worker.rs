//! Active-object scaffolding shared by every pipeline worker.
//!
//! A worker is a dedicated thread that owns one [`Mailbox`] and runs a
//! blocking receive/dispatch loop. All private state lives inside the
//! [`ActiveObject`] implementation and is only ever touched on the worker's
//! own thread; public front-end methods do nothing but build a message and
//! enqueue it. The one sanctioned exception is a state getter behind its
//! own lock, documented wherever a worker provides one.
//!
//! Exit protocol: a distinguished exit message is the last message a worker
//! processes. Its handler returns [`Flow::Exit`], the loop returns, and the
//! owning code joins the thread. Sending to a joined worker is a usage
//! error - the message sits in the mailbox and is reported when the mailbox
//! is destroyed.

use crate::error::PipelineError;
use crate::mailbox::{MailMessage, Mailbox, RecvTimeout};
use anyhow::{Context, Result};
use log::*;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Loop directive returned by a message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop the dispatch loop after this message.
    Exit,
}

/// One pipeline stage: private state plus a dispatch function.
///
/// Handler errors are logged by the loop and never stop it; a stage that
/// cannot make progress reports per-message failures, it does not tear the
/// pipeline down.
pub trait ActiveObject: Send {
    type Msg: MailMessage + 'static;

    /// Dispatch one message on the worker thread.
    fn on_message(&mut self, msg: Self::Msg) -> Result<Flow, PipelineError>;

    /// If `Some`, the loop uses a timed receive and calls [`on_idle`]
    /// whenever the wait elapses. Timeouts are "no work", never errors.
    ///
    /// [`on_idle`]: ActiveObject::on_idle
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called when a timed receive elapses without a message.
    fn on_idle(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Owner-side handle to a spawned worker: the shared mailbox plus the
/// join handle for the exit protocol.
pub struct WorkerHandle<M: MailMessage> {
    name: &'static str,
    mailbox: Arc<Mailbox<M>>,
    thread: Option<JoinHandle<()>>,
}

impl<M: MailMessage + 'static> WorkerHandle<M> {
    pub fn mailbox(&self) -> &Arc<Mailbox<M>> {
        &self.mailbox
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Join the worker thread. The caller must already have sent the
    /// worker's exit message, or this blocks forever.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("{}: worker thread panicked", self.name);
            }
        }
    }
}

impl<M: MailMessage> Drop for WorkerHandle<M> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!(
                "{}: worker handle dropped without join; thread left running",
                self.name
            );
        }
    }
}

/// Spawn `actor` on a dedicated named thread draining `mailbox`.
pub fn spawn<A>(
    name: &'static str,
    mailbox: Arc<Mailbox<A::Msg>>,
    actor: A,
) -> Result<WorkerHandle<A::Msg>>
where
    A: ActiveObject + 'static,
{
    let loop_mailbox = mailbox.clone();
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            info!("{}: worker thread started", name);
            run_loop(name, &loop_mailbox, actor);
            info!("{}: worker thread stopped", name);
        })
        .with_context(|| format!("failed to spawn {} worker thread", name))?;

    Ok(WorkerHandle {
        name,
        mailbox,
        thread: Some(thread),
    })
}

fn run_loop<A: ActiveObject>(name: &str, mailbox: &Mailbox<A::Msg>, mut actor: A) {
    loop {
        let msg = match actor.idle_timeout() {
            None => mailbox.recv(),
            Some(timeout) => match mailbox.recv_timeout(timeout) {
                Ok(msg) => msg,
                Err(RecvTimeout) => {
                    if let Err(e) = actor.on_idle() {
                        warn!("{}: idle handler failed: {}", name, e);
                    }
                    continue;
                }
            },
        };
        let kind = msg.kind();
        match actor.on_message(msg) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(e) => warn!("{}: handler for {:?} failed: {}", name, kind, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    enum CounterMessage {
        Add(usize),
        Fail,
        Exit,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum CounterKind {
        Add,
        Fail,
        Exit,
    }

    impl MailMessage for CounterMessage {
        type Kind = CounterKind;
        fn kind(&self) -> CounterKind {
            match self {
                CounterMessage::Add(_) => CounterKind::Add,
                CounterMessage::Fail => CounterKind::Fail,
                CounterMessage::Exit => CounterKind::Exit,
            }
        }
    }

    struct Counter {
        total: Arc<AtomicUsize>,
        idle_ticks: Arc<AtomicUsize>,
        idle: Option<Duration>,
    }

    impl ActiveObject for Counter {
        type Msg = CounterMessage;

        fn on_message(&mut self, msg: CounterMessage) -> Result<Flow, PipelineError> {
            match msg {
                CounterMessage::Add(n) => {
                    self.total.fetch_add(n, Ordering::SeqCst);
                    Ok(Flow::Continue)
                }
                CounterMessage::Fail => Err(PipelineError::InvalidState("told to fail")),
                CounterMessage::Exit => Ok(Flow::Exit),
            }
        }

        fn idle_timeout(&self) -> Option<Duration> {
            self.idle
        }

        fn on_idle(&mut self) -> Result<(), PipelineError> {
            self.idle_ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn processes_messages_in_order_and_exits_on_exit_message() {
        let total = Arc::new(AtomicUsize::new(0));
        let mailbox = Arc::new(Mailbox::new("counter"));
        let mut handle = spawn(
            "counter",
            mailbox.clone(),
            Counter {
                total: total.clone(),
                idle_ticks: Arc::new(AtomicUsize::new(0)),
                idle: None,
            },
        )
        .unwrap();

        for n in 1..=5 {
            mailbox.send(CounterMessage::Add(n));
        }
        mailbox.send(CounterMessage::Exit);
        handle.join();

        assert_eq!(total.load(Ordering::SeqCst), 15);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn handler_errors_do_not_stop_the_loop() {
        let total = Arc::new(AtomicUsize::new(0));
        let mailbox = Arc::new(Mailbox::new("counter"));
        let mut handle = spawn(
            "counter",
            mailbox.clone(),
            Counter {
                total: total.clone(),
                idle_ticks: Arc::new(AtomicUsize::new(0)),
                idle: None,
            },
        )
        .unwrap();

        mailbox.send(CounterMessage::Fail);
        mailbox.send(CounterMessage::Add(3));
        mailbox.send(CounterMessage::Exit);
        handle.join();

        assert_eq!(total.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn idle_timeout_is_no_work_not_an_error() {
        let idle_ticks = Arc::new(AtomicUsize::new(0));
        let mailbox = Arc::new(Mailbox::new("counter"));
        let mut handle = spawn(
            "counter",
            mailbox.clone(),
            Counter {
                total: Arc::new(AtomicUsize::new(0)),
                idle_ticks: idle_ticks.clone(),
                idle: Some(Duration::from_millis(5)),
            },
        )
        .unwrap();

        while idle_ticks.load(Ordering::SeqCst) < 2 {
            thread::yield_now();
        }
        mailbox.send(CounterMessage::Exit);
        handle.join();
        assert!(idle_ticks.load(Ordering::SeqCst) >= 2);
    }

    // Messages processed after Exit would mutate state concurrently with
    // the joiner; the loop must treat exit as the final message.
    #[test]
    fn exit_is_the_last_message_processed() {
        let total = Arc::new(AtomicUsize::new(0));
        let mailbox = Arc::new(Mailbox::new("counter"));
        let mut handle = spawn(
            "counter",
            mailbox.clone(),
            Counter {
                total: total.clone(),
                idle_ticks: Arc::new(AtomicUsize::new(0)),
                idle: None,
            },
        )
        .unwrap();

        mailbox.send(CounterMessage::Exit);
        mailbox.send(CounterMessage::Add(100));
        handle.join();

        assert_eq!(total.load(Ordering::SeqCst), 0);
        // The straggler is still queued; the mailbox will report it.
        assert_eq!(mailbox.len(), 1);
        let _ = mailbox.remove_matching(CounterKind::Add);
    }
}
