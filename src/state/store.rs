use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::RunState;
use crate::error::{MigrateError, Result};
use crate::mapping::users::{UserMapping, UserMappings};

/// One JSON document per run under a directory, written atomically.
pub struct RunStateStore {
    dir: PathBuf,
}

/// Exclusive hold on a run id. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

impl RunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Take the per-run lock; fails if another process holds it.
    pub fn lock(&self, run_id: &str) -> Result<RunLock> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(format!("{run_id}.lock")))?;
        file.try_lock_exclusive()
            .map_err(|_| MigrateError::Locked(run_id.to_string()))?;
        Ok(RunLock { _file: file })
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&state.run_id);
        let json = serde_json::to_string_pretty(state)?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &path)?;
        debug!("Checkpoint written to {}", path.display());
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<RunState> {
        let path = self.path(run_id);
        if !path.exists() {
            return Err(MigrateError::RunNotFound(run_id.to_string()));
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)
            .map_err(|e| MigrateError::State(format!("{}: {e}", path.display())))
    }

    /// Stored run ids, newest first.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(String::from)
            })
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    pub fn latest(&self) -> Result<Option<String>> {
        Ok(self.list()?.into_iter().next())
    }
}

/// User mappings kept across runs in a single JSON file.
pub struct UserMappingStore {
    path: PathBuf,
}

impl UserMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing or unreadable file yields no mappings.
    pub fn load(&self) -> UserMappings {
        if !self.path.exists() {
            return UserMappings::new();
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Could not read {}: {e}", self.path.display());
                return UserMappings::new();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Ignoring malformed {}: {e}", self.path.display());
            UserMappings::new()
        })
    }

    /// Merge `mappings` into the stored set; later entries replace earlier
    /// ones for the same source id.
    pub fn merge<'a>(&self, mappings: impl IntoIterator<Item = &'a UserMapping>) -> Result<()> {
        let mut stored = self.load();
        for mapping in mappings {
            stored.insert(mapping.source_id.clone(), mapping.clone());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&stored)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
