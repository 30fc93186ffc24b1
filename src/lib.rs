//! framepipe - active-object kernel for a real-time camera pipeline.
//!
//! A dozen pipeline stages (capture control, preview rendering, still and
//! video encoding, 3A, post-processing, thermal throttling) cooperate as
//! independent single-threaded actors. This crate is the part every stage
//! relies on:
//!
//! - **[`mailbox`]**: a typed FIFO message queue with optional synchronous
//!   reply slots and selective removal for flush/cancel.
//! - **[`worker`]**: the active-object scaffolding - one thread, one
//!   mailbox, one dispatch loop, an explicit exit protocol.
//! - **[`buffer`]**: frame descriptors circulating under an enforced
//!   single-owner-at-a-time protocol, with an ownership-tracking ledger in
//!   debug builds.
//! - **[`preview`]**: the window buffer circulator exchanging a bounded
//!   pool of buffers with an external display surface under its
//!   minimum-undequeued constraint.
//! - **[`workers`]**: representative payload stages (video, still,
//!   thermal throttle) built from nothing but a vocabulary and handlers.
//!
//! Algorithm payload - pixel conversion, JPEG assembly, 3A, GPU warping,
//! the capture driver, the real window surface - stays outside, behind the
//! collaborator traits in [`surface`], [`capture`], and [`workers`].
//!
//! # Example
//!
//! ```rust
//! use framepipe::mailbox::{MailMessage, Mailbox};
//! use std::sync::Arc;
//! use std::thread;
//!
//! enum Request {
//!     Work(u32),
//!     Exit,
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum RequestKind {
//!     Work,
//!     Exit,
//! }
//!
//! impl MailMessage for Request {
//!     type Kind = RequestKind;
//!     fn kind(&self) -> RequestKind {
//!         match self {
//!             Request::Work(_) => RequestKind::Work,
//!             Request::Exit => RequestKind::Exit,
//!         }
//!     }
//! }
//!
//! let mailbox = Arc::new(Mailbox::<Request>::new("demo"));
//! let worker_box = mailbox.clone();
//! let worker = thread::spawn(move || {
//!     let mut total = 0;
//!     loop {
//!         match worker_box.recv() {
//!             Request::Work(n) => total += n,
//!             Request::Exit => break,
//!         }
//!     }
//!     total
//! });
//!
//! mailbox.send(Request::Work(2));
//! mailbox.send(Request::Work(3));
//! mailbox.send(Request::Exit);
//! assert_eq!(worker.join().unwrap(), 5);
//! ```

pub mod buffer;
pub mod callbacks;
pub mod capture;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod preview;
pub mod surface;
pub mod worker;
pub mod workers;

pub use buffer::{BufferOwner, FrameDescriptor, FrameStatus, PixelFormat};
pub use config::PipelineConfig;
pub use error::{OpResult, PipelineError};
pub use mailbox::{MailMessage, Mailbox};
pub use pipeline::{CameraPipeline, PipelineCollaborators};
pub use worker::{ActiveObject, Flow, WorkerHandle};
