//! Stream-level error taxonomy.
//!
//! Most failures leave the stream usable and referencing the same file.
//! [`StreamError::Catastrophic`] is the exception: it is returned only
//! after the stream handle has been torn down (its data handle aborted and
//! every metadata handle dropped), and the caller's stream slot has been
//! cleared.

use std::io;

use thiserror::Error;

use crate::ftag::TagError;
use crate::ne::RtagError;
use crate::recovery::RecoveryError;
use crate::refs::RefsError;

#[derive(Error, Debug)]
pub enum StreamError {
    /// Wrong stream mode, bad whence, or an out-of-bounds request.
    /// No state change.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The file's tag state forbids the operation.
    #[error("file state forbids operation: {0}")]
    NotReady(&'static str),

    /// The file's recovery info cannot fit the per-file budget, almost
    /// always because the recovery path is too long.
    #[error("recovery info exceeds the per-file budget")]
    NameTooLong,

    /// A reference target still collided after the single unlink-retry.
    #[error("reference target is busy")]
    Busy,

    /// A codec produced a string of unexpected length; fatal to the
    /// operation, the stream remains usable.
    #[error("{what} has an inconsistent length (expected {expected}, got {actual})")]
    InconsistentLength {
        what:     &'static str,
        expected: usize,
        actual:   usize,
    },

    #[error("corrupt file tag: {0}")]
    CorruptTag(#[from] TagError),

    #[error("corrupt recovery info: {0}")]
    CorruptRecovery(#[from] RecoveryError),

    #[error("corrupt rebuild tag: {0}")]
    CorruptRtag(#[from] RtagError),

    #[error("reference resolution: {0}")]
    Refs(#[from] RefsError),

    /// Metadata-plane failure; the operation failed but the stream is
    /// still consistent.
    #[error("metadata plane: {0}")]
    Meta(#[source] io::Error),

    /// Data-plane failure; the operation failed but the stream is still
    /// consistent.
    #[error("data plane: {0}")]
    Data(#[source] io::Error),

    /// Failure during an object transition or cleanup cascade.  The stream
    /// handle has been destroyed and the caller's slot cleared.
    #[error("catastrophic stream failure: {0}")]
    Catastrophic(String),
}

impl StreamError {
    /// True when the stream handle was destroyed by this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Catastrophic(_))
    }
}
