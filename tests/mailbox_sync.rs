//! Cross-thread synchronous reply contracts.
//!
//! A sender parked on a reply slot must always be released: by a reply, by
//! a broadcast, or by a flush that cancels its message - never left
//! blocked.

use framepipe::error::PipelineError;
use framepipe::mailbox::{MailMessage, Mailbox};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

enum CtrlMessage {
    Apply(u32),
    Flush,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CtrlKind {
    Apply,
    Flush,
    Exit,
}

impl MailMessage for CtrlMessage {
    type Kind = CtrlKind;
    fn kind(&self) -> CtrlKind {
        match self {
            CtrlMessage::Apply(_) => CtrlKind::Apply,
            CtrlMessage::Flush => CtrlKind::Flush,
            CtrlMessage::Exit => CtrlKind::Exit,
        }
    }
}

const APPLY_SLOT: usize = 0;

#[test]
fn reply_completes_sender_within_bounded_time() {
    let mailbox = Arc::new(Mailbox::<CtrlMessage>::with_reply_slots("ctrl", 1));

    // Thread B: the worker loop, replying to the synchronous request.
    let worker_box = mailbox.clone();
    let worker = thread::spawn(move || loop {
        match worker_box.recv() {
            CtrlMessage::Apply(value) => {
                assert_eq!(value, 42);
                worker_box.reply(APPLY_SLOT, Ok(()));
            }
            CtrlMessage::Flush => worker_box.reply(APPLY_SLOT, Err(PipelineError::Cancelled)),
            CtrlMessage::Exit => break,
        }
    });

    // Thread A: the synchronous sender.
    let started = Instant::now();
    let status = mailbox.send_and_wait(CtrlMessage::Apply(42), APPLY_SLOT);
    assert_eq!(status, Ok(()));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "synchronous send took {:?}",
        started.elapsed()
    );

    mailbox.send(CtrlMessage::Exit);
    worker.join().unwrap();
}

#[test]
fn flush_cancels_a_parked_sender() {
    let mailbox = Arc::new(Mailbox::<CtrlMessage>::with_reply_slots("ctrl", 1));

    let sender_box = mailbox.clone();
    let sender = thread::spawn(move || sender_box.send_and_wait(CtrlMessage::Apply(7), APPLY_SLOT));

    // Nobody is draining this mailbox; the flush alone must release the
    // sender with the dedicated cancellation status.
    while mailbox.is_empty() {
        thread::yield_now();
    }
    let removed = mailbox.remove_matching(CtrlKind::Apply);
    assert_eq!(removed.len(), 1);
    assert_eq!(sender.join().unwrap(), Err(PipelineError::Cancelled));
    assert!(mailbox.is_empty());
}

#[test]
fn senders_from_many_threads_are_never_lost() {
    let mailbox = Arc::new(Mailbox::<CtrlMessage>::new("ctrl"));
    let mut senders = Vec::new();
    for thread_id in 0..8 {
        let sender_box = mailbox.clone();
        senders.push(thread::spawn(move || {
            for i in 0..100 {
                sender_box.send(CtrlMessage::Apply(thread_id * 1000 + i));
            }
        }));
    }
    for sender in senders {
        sender.join().unwrap();
    }

    // Per-sender FIFO: for every thread, values arrive in its send order.
    let mut last_seen = [None::<u32>; 8];
    for _ in 0..800 {
        match mailbox.recv() {
            CtrlMessage::Apply(value) => {
                let thread_id = (value / 1000) as usize;
                let seq = value % 1000;
                if let Some(previous) = last_seen[thread_id] {
                    assert!(seq > previous, "thread {} reordered", thread_id);
                }
                last_seen[thread_id] = Some(seq);
            }
            _ => panic!("unexpected message"),
        }
    }
    assert!(mailbox.is_empty());
    for seen in last_seen {
        assert_eq!(seen, Some(99));
    }
}
