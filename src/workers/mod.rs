//! Concrete pipeline workers built on the active-object kernel.
//!
//! Each worker is nothing but a mailbox, a message vocabulary, and
//! handlers; the concurrency discipline lives entirely in
//! [`crate::mailbox`] and [`crate::worker`]. Algorithm payload (encoders,
//! thermal probes) enters through collaborator traits invoked as ordinary
//! blocking calls from inside handlers.

pub mod still;
pub mod throttle;
pub mod video;
