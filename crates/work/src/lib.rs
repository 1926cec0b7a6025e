//! Stage Controllers (Layer 4)
//!
//! Persistence and auto-advance wiring around a stage state machine.

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod rule;

pub use config::ControllerConfig;
pub use controller::{ControllerError, StageStateController};
pub use rule::AutoAdvanceRule;
