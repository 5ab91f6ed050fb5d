//! Error taxonomy of the solver.
//!
//! Only `InsufficientStates` is ever handled locally (by the diagonalization
//! retry loop); every other kind bubbles up to the driver, which prints a
//! diagnostic and exits nonzero. No error is used for control flow inside the
//! iteration itself.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NrgError {
    /// Malformed `data` or parameter file; surfaced at startup.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// The diagonalization returned too few states to honour the truncation
    /// target; handled by the retry loop with a larger `diagratio`.
    #[error("insufficient number of states computed")]
    InsufficientStates,

    /// Scratch read/write failure; fatal, with the offending path attached.
    #[error("i/o failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checked arithmetic invariant (trace normalization, weight sum rule)
    /// was violated beyond tolerance.
    #[error("tolerance violation: {0}")]
    ToleranceViolation(String),

    /// The requested symmetry is not compiled in.
    #[error("unsupported symmetry `{0}`")]
    UnsupportedSymmetry(String),

    /// A worker channel failed in the message-passing backend; the whole job
    /// aborts, there are no partial-progress semantics.
    #[error("communication failure: {0}")]
    CommunicationFailure(String),
}

impl NrgError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }
}
