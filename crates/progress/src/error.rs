//! Transition and gate errors.

/// Result type for transitions.
pub type Result<T> = std::result::Result<T, TransitionError>;

/// Which end of a sequence a transition ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Nothing before the first marker
    First,
    /// Nothing after the last marker
    Last,
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::First => f.write_str("first"),
            Boundary::Last => f.write_str("last"),
        }
    }
}

/// Errors raised by [`StageStateMachine`](crate::StageStateMachine)
/// transitions. No state is mutated when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// A gate between `from` and `to` is not satisfied
    #[error("cannot move from `{from}` to `{to}`: gate `{gate}` is not satisfied")]
    InvalidTransition {
        /// Marker the blocked step starts from
        from: &'static str,
        /// Marker the blocked step leads to
        to: &'static str,
        /// Name of the failing gate
        gate: String,
    },

    /// No marker beyond the current one in that direction
    #[error("`{marker}` is the {boundary} marker of `{sequence}`")]
    OutOfRange {
        /// Current marker
        marker: &'static str,
        /// End that was hit
        boundary: Boundary,
        /// Sequence type name
        sequence: &'static str,
    },
}

/// Errors raised while building a [`GateTable`](crate::GateTable).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Gates only guard single steps
    #[error("gate `{gate}` spans `{from}` -> `{to}`, which are not adjacent")]
    NonAdjacent {
        /// Gate name
        gate: String,
        /// From marker
        from: &'static str,
        /// To marker
        to: &'static str,
    },

    /// A step already has a gate
    #[error("step `{from}` -> `{to}` is already guarded by `{existing}`")]
    Duplicate {
        /// Name of the registered gate
        existing: String,
        /// From marker
        from: &'static str,
        /// To marker
        to: &'static str,
    },
}
