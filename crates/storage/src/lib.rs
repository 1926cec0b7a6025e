//! Stage-state persistence for datastory.
//!
//! This crate provides the trait-based store the stage controllers talk to,
//! with a JSON-file implementation and an in-memory one.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod memory;

pub use trait_::{StageStore, StorageError, Result};
pub use json_storage::JsonStageStore;
pub use memory::MemoryStageStore;
