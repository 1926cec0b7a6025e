//! Datastory core data models.
//!
//! This crate defines the marker sequences, stage state and measurement
//! records that every stage of a data story is built from.

#![warn(missing_docs)]

// Identities
mod id;
mod context;

// Stage progress
pub mod marker;
mod state;
mod response;
mod slideshow;

// Measurements
mod measurement;

// Re-exports
pub use id::{SessionId, SessionKey};
pub use context::SessionContext;

pub use marker::{Marker, MarkerError, MarkerSequence};
pub use state::StageState;
pub use response::{FreeResponse, MultipleChoiceResponse, Responses};
pub use slideshow::SlideshowState;

pub use measurement::{Galaxy, GalaxyId, Measurement, MeasurementNumber, MeasurementSource};

#[doc(hidden)]
pub use serde as __serde;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
