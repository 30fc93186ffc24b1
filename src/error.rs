//! Error types for the pipeline kernel.

use crate::surface::SurfaceError;

/// Error returned by kernel operations and carried in synchronous replies.
///
/// Handlers never panic across the dispatch loop; they report one of these
/// and the loop logs it and keeps going. Setup-time variants
/// (`InvalidArgument`, `NoMemory`) are fatal to pipeline construction,
/// steady-state variants degrade to a skipped frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The request was flushed out of a mailbox before it was processed.
    Cancelled,
    /// A synchronous send named a reply slot the mailbox was not built with.
    InvalidReplySlot(usize),
    /// The operation is not valid in the worker's current state.
    InvalidState(&'static str),
    /// A configuration or request parameter is unusable.
    InvalidArgument(&'static str),
    /// The display surface rejected an operation.
    Surface(SurfaceError),
    /// A buffer pool cannot be grown to the requested size.
    NoMemory,
    /// A blocking receive elapsed without a message.
    TimedOut,
    /// An algorithm collaborator (encoder, probe, ...) failed.
    Collaborator(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Cancelled => write!(f, "request cancelled by flush"),
            PipelineError::InvalidReplySlot(slot) => {
                write!(f, "reply slot {} not declared for this mailbox", slot)
            }
            PipelineError::InvalidState(what) => write!(f, "invalid state: {}", what),
            PipelineError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            PipelineError::Surface(e) => write!(f, "display surface: {}", e),
            PipelineError::NoMemory => write!(f, "buffer pool exhausted"),
            PipelineError::TimedOut => write!(f, "timed out waiting for message"),
            PipelineError::Collaborator(what) => write!(f, "collaborator failed: {}", what),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<SurfaceError> for PipelineError {
    fn from(e: SurfaceError) -> Self {
        PipelineError::Surface(e)
    }
}

/// Status type carried by reply slots and returned by message handlers.
pub type OpResult = Result<(), PipelineError>;
