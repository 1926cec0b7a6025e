//! Stage errors.

use datastory_progress::{GateError, TransitionError};
use datastory_work::ControllerError;

/// Result type for stage operations.
pub type Result<T> = std::result::Result<T, StageError>;

/// Errors raised while mounting, driving or unmounting a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The stage's gate table is malformed
    #[error("invalid gate table: {0}")]
    Gate(#[from] GateError),

    /// A requested transition was refused
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Persistence wiring failed
    #[error(transparent)]
    Controller(#[from] ControllerError),
}
