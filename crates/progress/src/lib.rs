//! Stage Progression (Layer 3)
//!
//! Gated marker transitions, marker-change hooks, and the read queries the
//! rendering layer polls.

#![warn(missing_docs)]

pub mod error;
pub mod gate;
pub mod machine;

pub use error::{Boundary, GateError, Result, TransitionError};
pub use gate::{Gate, GateTable};
pub use machine::{HookId, MarkerChange, StageStateMachine, WeakStageStateMachine};
