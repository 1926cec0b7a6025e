//! JSON file storage implementation.
//!
//! Stores each stage state as a JSON file under
//! `stage_states/<student>/<story>/<stage>.json` and keeps a small meta marker
//! (version + updated_at) next to it under `meta/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use datastory_core::SessionKey;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, StageStore, StorageError};

/// File-based JSON stage store.
pub struct JsonStageStore {
    root: PathBuf,
    // Serializes writes so a version bump always matches the file it describes.
    write_lock: Mutex<()>,
}

impl JsonStageStore {
    /// Create storage, creating the `stage_states/` and `meta/` directories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("stage_states")).await?;
        fs::create_dir_all(root.join("meta")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, key: &SessionKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join("stage_states")
            .join(key.student_id.to_string())
            .join(path_segment(&key.story)?)
            .join(format!("{}.json", path_segment(&key.stage)?)))
    }

    fn meta_path(&self, key: &SessionKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join("meta")
            .join(key.student_id.to_string())
            .join(path_segment(&key.story)?)
            .join(format!("{}.meta.json", path_segment(&key.stage)?)))
    }

    /// Stored version of a stage state; 0 when never written.
    pub async fn version(&self, key: &SessionKey) -> Result<u64> {
        let meta: Option<serde_json::Value> = read_json(&self.meta_path(key)?).await?;
        Ok(meta
            .and_then(|m| m.get("version").and_then(|v| v.as_u64()))
            .unwrap_or(0))
    }

    /// Read and increment the per-state version, return the new version.
    async fn bump_version(&self, key: &SessionKey) -> Result<u64> {
        let path = self.meta_path(key)?;
        let version = self.version(key).await? + 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_file(&path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }
}

#[async_trait]
impl StageStore for JsonStageStore {
    async fn get_stage_state(&self, key: &SessionKey) -> Result<Option<serde_json::Value>> {
        read_json(&self.state_path(key)?).await
    }

    async fn put_stage_state(&self, key: &SessionKey, state: &serde_json::Value) -> Result<bool> {
        let path = self.state_path(key)?;
        let json = serde_json::to_string_pretty(state)?;

        let _guard = self.write_lock.lock().await;
        write_file(&path, json.as_bytes()).await?;
        let version = self.bump_version(key).await?;

        debug!(%key, version, "Stored stage state");
        Ok(true)
    }

    async fn delete_stage_state(&self, key: &SessionKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in [self.state_path(key)?, self.meta_path(key)?] {
            fs::remove_file(&path).await.or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
            })?;
        }
        Ok(())
    }

    async fn list_stage_keys(&self, student_id: u64) -> Result<Vec<SessionKey>> {
        let student_dir = self.root.join("stage_states").join(student_id.to_string());
        let mut keys = Vec::new();

        let mut stories = match fs::read_dir(&student_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(story) = stories.next_entry().await? {
            if !story.file_type().await?.is_dir() {
                continue;
            }
            let story_name = story.file_name().to_string_lossy().into_owned();
            let mut stages = fs::read_dir(story.path()).await?;
            while let Some(stage) = stages.next_entry().await? {
                let path = stage.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stage_name) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(SessionKey::new(student_id, story_name.clone(), stage_name));
                }
            }
        }

        keys.sort_by(|a, b| (&a.story, &a.stage).cmp(&(&b.story, &b.stage)));
        Ok(keys)
    }
}

/// Story and stage names become directory and file names; keep them plain.
fn path_segment(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if valid {
        Ok(name)
    } else {
        Err(StorageError::Other(format!("invalid key segment: {:?}", name)))
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(stage: &str) -> SessionKey {
        SessionKey::new(7, "hubbles_law", stage)
    }

    #[tokio::test]
    async fn test_missing_state_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStageStore::new(dir.path()).await.unwrap();
        assert!(store.get_stage_state(&key("spectra")).await.unwrap().is_none());
        assert_eq!(store.version(&key("spectra")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_then_get_and_versioning() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStageStore::new(dir.path()).await.unwrap();
        let k = key("spectra");

        let first = serde_json::json!({"current_marker": 1});
        let second = serde_json::json!({"current_marker": 3});
        assert!(store.put_stage_state(&k, &first).await.unwrap());
        assert!(store.put_stage_state(&k, &second).await.unwrap());

        let loaded = store.get_stage_state(&k).await.unwrap().unwrap();
        assert_eq!(loaded["current_marker"], 3);
        assert_eq!(store.version(&k).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStageStore::new(dir.path()).await.unwrap();
        store.put_stage_state(&key("spectra"), &serde_json::json!({})).await.unwrap();
        store.put_stage_state(&key("distance"), &serde_json::json!({})).await.unwrap();

        let keys = store.list_stage_keys(7).await.unwrap();
        assert_eq!(keys, vec![key("distance"), key("spectra")]);
        assert!(store.list_stage_keys(8).await.unwrap().is_empty());

        store.delete_stage_state(&key("distance")).await.unwrap();
        store.delete_stage_state(&key("distance")).await.unwrap();
        assert_eq!(store.list_stage_keys(7).await.unwrap(), vec![key("spectra")]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStageStore::new(dir.path()).await.unwrap();
        let bad = SessionKey::new(7, "../escape", "spectra");
        assert!(matches!(
            store.get_stage_state(&bad).await,
            Err(StorageError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStageStore::new(dir.path()).await.unwrap();
        let k = key("spectra");
        let path = store.state_path(&k).unwrap();
        write_file(&path, b"{not json").await.unwrap();
        assert!(matches!(store.get_stage_state(&k).await, Err(StorageError::Json(_))));
    }
}
