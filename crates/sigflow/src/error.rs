use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// `EndOfStream` is terminal but not a failure: runners treat it as a clean
/// shutdown request and never record it. Everything else ends up in the
/// runner's error slot, retrievable via [`crate::ThreadedRunner::error`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The stream is drained and closed. Clean termination, not a failure.
    #[error("end of stream")]
    EndOfStream,

    /// The other end of a stream went away while this block still had
    /// samples to move. Producing into a closed pipeline lands here.
    #[error("broken stream")]
    BrokenStream,

    /// Wiring-time or call-time disagreement about a sample type.
    #[error("sample type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The type the callee was built for.
        expected: String,
        /// The type the caller supplied.
        actual: String,
    },

    /// Ring capacity is not a power of two multiple of the page size.
    #[error("invalid ring capacity {0}: must be a power of two and a multiple of the page size")]
    InvalidCapacity(usize),

    /// Ring capacity does not hold a whole number of samples of the wired
    /// element type.
    #[error("ring capacity {capacity} is not divisible by element size {elem_size}")]
    CapacityMisaligned {
        /// Ring capacity in bytes.
        capacity: usize,
        /// Element size of the wired sample type.
        elem_size: usize,
    },

    /// A block-domain error, carried verbatim.
    ///
    /// Wrapped in `Arc` so runner errors stay cloneable out of the error slot.
    #[error("block error: {0}")]
    Block(Arc<anyhow::Error>),
}

impl Error {
    /// Returns `true` if this error means "shut down cleanly".
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Wraps an arbitrary block-domain error.
    pub fn block(err: impl Into<anyhow::Error>) -> Self {
        Self::Block(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Block(Arc::new(err))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
