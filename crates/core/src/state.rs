//! Stage state - progress and answers for one stage of a story.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::marker::{Marker, MarkerSequence};
use crate::response::Responses;

/// Mutable progress for one tutorial stage.
///
/// `current_marker <= max_marker_reached` always holds: the only way to move
/// the current marker is [`StageState::move_to`], which raises the
/// high-water mark when needed, and deserialization rejects documents that
/// break the invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageState<M, F> {
    /// Stage identifier, also the persistence key suffix
    pub stage_id: String,

    current_marker: M,

    max_marker_reached: M,

    /// Question answers
    pub responses: Responses,

    /// Stage-specific fields
    pub fields: F,
}

impl<M: Marker, F: Default> StageState<M, F> {
    /// Create a state at the first marker with default fields.
    pub fn new(stage_id: impl Into<String>) -> Self {
        let first = MarkerSequence::<M>::first();
        Self {
            stage_id: stage_id.into(),
            current_marker: first,
            max_marker_reached: first,
            responses: Responses::default(),
            fields: F::default(),
        }
    }
}

impl<M: Marker, F> StageState<M, F> {
    /// Current marker.
    pub fn current_marker(&self) -> M {
        self.current_marker
    }

    /// Furthest marker ever reached.
    pub fn max_marker_reached(&self) -> M {
        self.max_marker_reached
    }

    /// Move to `target`, raising the high-water mark if it is exceeded.
    ///
    /// Returns the previous marker, or `None` when already at `target`.
    pub fn move_to(&mut self, target: M) -> Option<M> {
        if target == self.current_marker {
            return None;
        }
        let old = self.current_marker;
        self.current_marker = target;
        if target > self.max_marker_reached {
            self.max_marker_reached = target;
        }
        Some(old)
    }

    /// Whether the current marker is `target`.
    pub fn is_current(&self, target: M) -> bool {
        MarkerSequence::<M>::is_current(self.current_marker, target)
    }

    /// Whether the current marker is within `lo..=hi`.
    pub fn between(&self, lo: M, hi: M) -> bool {
        MarkerSequence::<M>::between_inclusive(self.current_marker, lo, hi)
    }

    /// Whether the current marker is `target` or later.
    pub fn at_or_after(&self, target: M) -> bool {
        MarkerSequence::<M>::at_or_after(self.current_marker, target)
    }

    /// Whether a question of this stage has been answered.
    pub fn question_completed(&self, tag: &str) -> bool {
        self.responses.question_completed(tag)
    }
}

/// Wire shape of [`StageState`] before the marker invariant is checked.
#[derive(Deserialize)]
struct StageStateRepr<M, F> {
    stage_id: String,
    current_marker: M,
    max_marker_reached: M,
    #[serde(default)]
    responses: Responses,
    fields: F,
}

impl<'de, M, F> Deserialize<'de> for StageState<M, F>
where
    M: Marker,
    F: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = StageStateRepr::<M, F>::deserialize(deserializer)?;
        if repr.current_marker > repr.max_marker_reached {
            return Err(de::Error::custom(format!(
                "current marker `{}` is past the high-water mark `{}`",
                repr.current_marker.name(),
                repr.max_marker_reached.name(),
            )));
        }
        Ok(Self {
            stage_id: repr.stage_id,
            current_marker: repr.current_marker,
            max_marker_reached: repr.max_marker_reached,
            responses: repr.responses,
            fields: repr.fields,
        })
    }
}
