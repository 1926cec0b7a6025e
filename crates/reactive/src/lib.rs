//! Reactive values (Layer 1)
//!
//! Observable cells with ordered, re-entrancy-safe notification, and
//! two-way links between cells that never echo.

#![warn(missing_docs)]

pub mod cell;
pub mod sync;

pub use cell::{ReactiveCell, SubscriptionId, WeakReactiveCell};
pub use sync::{link, SyncLink, SyncOutcome, SyncStats};
