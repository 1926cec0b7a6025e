//! Session context, passed explicitly to every stage of a running story.

use crate::id::{SessionId, SessionKey};
use crate::Time;

/// Everything a stage needs to know about the session it runs in.
///
/// One context exists per active student session; nothing about a session
/// lives in process-wide state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Session identifier
    pub session_id: SessionId,

    /// Student running the session
    pub student_id: u64,

    /// Story name
    pub story: String,

    /// When the session started
    pub started_at: Time,
}

impl SessionContext {
    /// Start a new session.
    pub fn new(student_id: u64, story: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            student_id,
            story: story.into(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Persistence key for a stage of this story.
    pub fn stage_key(&self, stage: &str) -> SessionKey {
        SessionKey::new(self.student_id, self.story.clone(), stage)
    }
}
