//! In-memory stage store, used for offline sessions and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use datastory_core::SessionKey;
use tokio::sync::Mutex;

use super::{Result, StageStore};

/// Stage store backed by a map. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStageStore {
    states: Mutex<HashMap<SessionKey, serde_json::Value>>,
}

impl MemoryStageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states.
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

#[async_trait]
impl StageStore for MemoryStageStore {
    async fn get_stage_state(&self, key: &SessionKey) -> Result<Option<serde_json::Value>> {
        Ok(self.states.lock().await.get(key).cloned())
    }

    async fn put_stage_state(&self, key: &SessionKey, state: &serde_json::Value) -> Result<bool> {
        self.states.lock().await.insert(key.clone(), state.clone());
        Ok(true)
    }

    async fn delete_stage_state(&self, key: &SessionKey) -> Result<()> {
        self.states.lock().await.remove(key);
        Ok(())
    }

    async fn list_stage_keys(&self, student_id: u64) -> Result<Vec<SessionKey>> {
        let mut keys: Vec<SessionKey> = self
            .states
            .lock()
            .await
            .keys()
            .filter(|k| k.student_id == student_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| (&a.story, &a.stage).cmp(&(&b.story, &b.stage)));
        Ok(keys)
    }
}
