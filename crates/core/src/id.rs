//! Identifiers for sessions and persisted stage state.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for one student session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Generate a new SessionId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Key under which a stage state is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Student the state belongs to
    pub student_id: u64,

    /// Story name, e.g. `hubbles_law`
    pub story: String,

    /// Stage id within the story
    pub stage: String,
}

impl SessionKey {
    /// Create a key.
    pub fn new(student_id: u64, story: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            student_id,
            story: story.into(),
            stage: stage.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.student_id, self.story, self.stage)
    }
}
