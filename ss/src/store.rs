//! Core SnapStore implementation

use eyre::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::SNAPSHOT_EXT;

/// Turn an arbitrary key into a filesystem-safe file stem
///
/// Alphanumerics, `-` and `_` are kept; everything else becomes `_`.
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() { "_".to_string() } else { sanitized }
}

/// Directory of JSON snapshots, one file per key
#[derive(Debug, Clone)]
pub struct SnapStore {
    base_path: PathBuf,
}

impl SnapStore {
    /// Open or create a snapshot store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).context("Failed to create snapshot directory")?;
        debug!(?base_path, "Opened snapshot store");
        Ok(Self { base_path })
    }

    /// Base directory of this store
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", sanitize_key(key), SNAPSHOT_EXT))
    }

    fn lock(&self) -> Result<File> {
        let lock_path = self.base_path.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {}", lock_path.display()))?;
        file.lock_exclusive().context("Failed to acquire snapshot lock")?;
        Ok(file)
    }

    /// Write a snapshot, replacing any previous value for the key
    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        let target = self.key_path(key);
        let tmp = target.with_extension(format!("{}.tmp", SNAPSHOT_EXT));
        debug!(%key, ?target, "SnapStore::put: called");

        let lock = self.lock()?;
        let result = (|| -> Result<()> {
            let json = serde_json::to_vec_pretty(value).context("Failed to serialize snapshot")?;
            let mut file = File::create(&tmp).context(format!("Failed to create {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &target).context(format!("Failed to replace {}", target.display()))?;
            Ok(())
        })();
        FileExt::unlock(&lock)?;

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            info!(%key, "Snapshot written");
        }
        result
    }

    /// Read a snapshot, `None` if the key was never written
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key);
        debug!(%key, ?path, "SnapStore::get: called");
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path).context(format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_slice(&content).context(format!("Corrupt snapshot: {}", path.display()))?;
        Ok(Some(value))
    }

    /// Remove a snapshot; returns whether one existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        let path = self.key_path(key);
        debug!(%key, "SnapStore::delete: called");
        if !path.exists() {
            return Ok(false);
        }
        let lock = self.lock()?;
        let result = fs::remove_file(&path).context(format!("Failed to delete {}", path.display()));
        FileExt::unlock(&lock)?;
        result.map(|_| true)
    }

    /// List stored keys (sanitized form), sorted
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
