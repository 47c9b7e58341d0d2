//! Filesystem layout helpers and atomic write operations
//!
//! Manages the .tickwork/ directory structure, ensures atomic writes via
//! temp files and renames, and persists the runtime configuration.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use super::RuntimeConfig;
use super::agent::AgentId;

/// Storage manager for runtime persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Directory holding one record per agent
    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    /// Persisted record of one agent's script stack
    pub fn agent_record_path(&self, agent: &AgentId) -> PathBuf {
        self.agents_dir().join(format!("{}.json", agent))
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

        file.write_all(data)
            .context("Failed to write data")?;

        file.sync_all()
            .context("Failed to sync file")?;

        drop(file);

        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        // Make the rename itself durable
        if let Some(parent) = path.parent() {
            let dir = OpenOptions::new()
                .read(true)
                .open(parent)
                .with_context(|| format!("Failed to open directory: {:?}", parent))?;

            dir.sync_all()
                .context("Failed to sync directory")?;
        }

        Ok(())
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Check if a path exists
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Remove a file if it exists
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {:?}", path))?;
        Ok(true)
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))
    }

    /// List files in a directory
    pub fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {:?}", path))?
        {
            let entry = entry?;
            entries.push(entry.path());
        }

        Ok(entries)
    }
}

/// Initialize storage directories for a new runtime
pub fn init_storage(root: &Path) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());

    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.agents_dir())?;

    Ok(())
}

/// Write runtime configuration
pub fn write_config(config: &RuntimeConfig) -> Result<()> {
    let storage = Storage::new(config.root.clone());
    let config_path = storage.config_path();

    let json = serde_json::to_vec_pretty(config)
        .context("Failed to serialize config")?;

    storage.write_atomic(&config_path, &json)?;

    Ok(())
}

/// Load runtime configuration
pub fn load_config(root: &Path) -> Result<RuntimeConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();

    let data = storage.read_file(&config_path)?;
    let config: RuntimeConfig = serde_json::from_slice(&data)
        .context("Failed to deserialize config")?;

    Ok(config)
}
