//! Script snapshots and per-agent persisted records
//!
//! An [`AgentRecord`] is the ordered list of a bot's script snapshots,
//! stored as JSON under `agents/<agent>.json`.

use serde::{Deserialize, Serialize};

use super::agent::AgentId;
use super::clock::Tick;
use super::error::{StorageError, StorageResult};
use super::storage::Storage;

/// Persistable capture of one script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    /// Script type identity
    pub kind: String,

    /// Payload, absent for dynamic scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ScriptSnapshot {
    /// Snapshot with a payload
    pub fn new(kind: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Snapshot without a payload
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, None)
    }

    /// Whether the snapshot carries no payload
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

/// Persisted script stack of one agent, bottom first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent the stack belongs to
    pub agent: AgentId,

    /// Tick at which the record was captured
    pub tick: Tick,

    /// When the record was written (debug only)
    pub saved_at: chrono::DateTime<chrono::Utc>,

    /// Script snapshots in stack order
    pub scripts: Vec<ScriptSnapshot>,
}

impl AgentRecord {
    /// Record captured now
    pub fn new(agent: AgentId, tick: Tick, scripts: Vec<ScriptSnapshot>) -> Self {
        Self {
            agent,
            tick,
            saved_at: chrono::Utc::now(),
            scripts,
        }
    }
}

/// Reads and writes agent records
#[derive(Debug, Clone)]
pub struct RecordStore {
    storage: Storage,
}

impl RecordStore {
    /// Create a record store over `storage`
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Underlying storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Persist a record, replacing any previous one atomically
    pub fn save(&self, record: &AgentRecord) -> StorageResult<()> {
        let dir = self.storage.agents_dir();
        self.storage
            .create_dir_all(&dir)
            .map_err(|e| StorageError::Other(format!("{e:#}")))?;

        let path = self.storage.agent_record_path(&record.agent);
        let data = serde_json::to_vec_pretty(record)?;
        self.storage
            .write_atomic(&path, &data)
            .map_err(|e| StorageError::AtomicWriteFailed {
                path: path.clone(),
                detail: format!("{e:#}"),
            })?;

        tracing::debug!(agent = %record.agent, scripts = record.scripts.len(), "agent record saved");
        Ok(())
    }

    /// Load the record of `agent`, if one was ever saved
    pub fn load(&self, agent: &AgentId) -> StorageResult<Option<AgentRecord>> {
        let path = self.storage.agent_record_path(agent);
        if !self.storage.exists(&path) {
            return Ok(None);
        }

        let data = self
            .storage
            .read_file(&path)
            .map_err(|e| StorageError::Other(format!("{e:#}")))?;
        let record = serde_json::from_slice(&data)?;
        Ok(Some(record))
    }

    /// Delete the record of `agent`. Returns whether one existed.
    pub fn remove(&self, agent: &AgentId) -> StorageResult<bool> {
        let path = self.storage.agent_record_path(agent);
        self.storage
            .remove_file(&path)
            .map_err(|e| StorageError::Other(format!("{e:#}")))
    }

    /// Agents that have a persisted record
    pub fn list_agents(&self) -> StorageResult<Vec<AgentId>> {
        let dir = self.storage.agents_dir();
        if !self.storage.exists(&dir) {
            return Ok(Vec::new());
        }

        let entries = self
            .storage
            .list_dir(&dir)
            .map_err(|e| StorageError::Other(format!("{e:#}")))?;

        let mut agents: Vec<AgentId> = entries
            .iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str()?.parse().ok())
            .collect();
        agents.sort();
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_snapshot_omits_data() {
        let snapshot = ScriptSnapshot::empty("emote");
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"kind":"emote"}"#);

        let back: ScriptSnapshot = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_record_persistence() {
        let temp = TempDir::new().unwrap();
        let store = RecordStore::new(Storage::new(temp.path().to_path_buf()));
        let agent = AgentId::new();

        assert!(store.load(&agent).unwrap().is_none());

        let record = AgentRecord::new(
            agent,
            42,
            vec![
                ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": 5 }))),
                ScriptSnapshot::empty("emote"),
            ],
        );
        store.save(&record).unwrap();

        let loaded = store.load(&agent).unwrap().unwrap();
        assert_eq!(loaded.agent, agent);
        assert_eq!(loaded.tick, 42);
        assert_eq!(loaded.scripts, record.scripts);
        assert_eq!(store.list_agents().unwrap(), vec![agent]);

        assert!(store.remove(&agent).unwrap());
        assert!(store.list_agents().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let store = RecordStore::new(storage.clone());
        let agent = AgentId::new();

        std::fs::create_dir_all(storage.agents_dir()).unwrap();
        std::fs::write(storage.agent_record_path(&agent), b"{ not json").unwrap();

        assert!(matches!(store.load(&agent), Err(StorageError::Json(_))));
    }
}
