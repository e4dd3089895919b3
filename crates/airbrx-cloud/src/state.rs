//! Run state snapshots
//!
//! Manages `<state dir>/state.json`, a snapshot of the last deployment run
//! written after every phase. The snapshot is informational: re-runs rely on
//! per-resource reconciliation, never on skipping completed phases.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Snapshot of one deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// State file version
    pub version: u32,

    /// Deployment prefix the run belongs to
    pub prefix: String,

    pub started_at: DateTime<Utc>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Phases finished so far, in order
    pub completed_phases: Vec<PhaseRecord>,

    /// Artifact values known at the time of the snapshot
    pub artifacts: BTreeMap<String, String>,

    pub outcome: RunOutcome,
}

impl RunState {
    pub fn new(prefix: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            prefix: prefix.into(),
            started_at: now,
            updated_at: now,
            completed_phases: Vec::new(),
            artifacts: BTreeMap::new(),
            outcome: RunOutcome::InProgress,
        }
    }

    pub fn complete_phase(&mut self, name: impl Into<String>) {
        self.completed_phases.push(PhaseRecord {
            name: name.into(),
            completed_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    pub fn set_artifacts<I, K, V>(&mut self, artifacts: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in artifacts {
            self.artifacts
                .insert(key.as_ref().to_string(), value.as_ref().to_string());
        }
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.updated_at = Utc::now();
    }

    pub fn last_phase(&self) -> Option<&str> {
        self.completed_phases.last().map(|p| p.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub completed_at: DateTime<Utc>,
}

/// Final (or current) outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    InProgress,
    Succeeded,
    Failed { phase: String, error: String },
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::InProgress => write!(f, "in progress"),
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed { phase, error } => write!(f, "failed in {}: {}", phase, error),
        }
    }
}

/// Reads and writes the run snapshot and the lock of one deployment prefix
pub struct StateManager {
    dir: PathBuf,
    stale_after: chrono::Duration,
}

impl StateManager {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stale_after: chrono::Duration::hours(1),
        }
    }

    /// Age after which a leftover lock is assumed to belong to a crashed run
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load(&self) -> Result<Option<RunState>> {
        let path = self.dir.join(STATE_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: RunState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by a newer airbrx (state version {}, this build reads {})",
                path.display(),
                state.version,
                STATE_VERSION
            )));
        }
        Ok(Some(state))
    }

    /// Write the snapshot. The previous one is kept as `state.json.backup`
    /// and the new one lands through a rename, so a crash mid-write never
    /// leaves a truncated `state.json`.
    pub async fn save(&self, state: &RunState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(STATE_FILE);
        let staging = self.dir.join(format!("{}.tmp", STATE_FILE));

        fs::write(&staging, serde_json::to_vec_pretty(state)?).await?;
        if fs::try_exists(&path).await? {
            fs::copy(&path, self.dir.join(STATE_BACKUP)).await?;
        }
        fs::rename(&staging, &path).await?;

        tracing::debug!(
            prefix = %state.prefix,
            phases = state.completed_phases.len(),
            "run state saved"
        );
        Ok(())
    }

    /// Take the per-prefix deploy lock
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(LOCK_FILE);

        match fs::read_to_string(&path).await {
            Ok(content) => {
                match serde_json::from_str::<LockHolder>(&content) {
                    Ok(holder) if Utc::now() - holder.acquired_at < self.stale_after => {
                        return Err(CloudError::LockError(format!(
                            "another deploy of this prefix is running ({} pid {}, started {}); \
                             pass --force-unlock if it crashed",
                            holder.host, holder.pid, holder.acquired_at
                        )));
                    }
                    Ok(holder) => {
                        tracing::warn!(host = %holder.host, pid = holder.pid, "taking over stale deploy lock");
                    }
                    // A run killed between creating and writing the lock leaves it empty
                    Err(e) => {
                        tracing::warn!("taking over unreadable deploy lock {}: {}", path.display(), e);
                    }
                }
                fs::remove_file(&path).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let holder = LockHolder {
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        // create_new loses the race cleanly when two deploys start together
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(
                    "another deploy of this prefix acquired the lock first".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec(&holder)?).await?;

        Ok(StateLock { path: Some(path) })
    }

    /// Remove the deploy lock whoever holds it. Returns whether one existed.
    pub async fn force_unlock(&self) -> Result<bool> {
        match fs::remove_file(self.dir.join(LOCK_FILE)).await {
            Ok(()) => {
                tracing::warn!("removed deploy lock in {}", self.dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held deploy lock; removed on `release` or when dropped
pub struct StateLock {
    path: Option<PathBuf>,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = RunState::new("acme-dev");
        state.complete_phase("storage");
        state.set_artifacts([("adminStorage.bucket", "acme-dev-airbrx-admin-storage")]);

        manager.save(&state).await.unwrap();

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.prefix, "acme-dev");
        assert_eq!(loaded.last_phase(), Some("storage"));
        assert_eq!(
            loaded.artifacts.get("adminStorage.bucket").map(String::as_str),
            Some("acme-dev-airbrx-admin-storage")
        );
        assert_eq!(loaded.outcome, RunOutcome::InProgress);
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        assert!(manager.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = RunState::new("acme-dev");
        manager.save(&state).await.unwrap();
        state.finish(RunOutcome::Succeeded);
        manager.save(&state).await.unwrap();

        assert!(temp_dir.path().join(STATE_BACKUP).exists());
        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.outcome, RunOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        let second = manager.acquire_lock().await;
        assert!(matches!(second, Err(CloudError::LockError(_))));

        lock.release().await.unwrap();
        let again = manager.acquire_lock().await.unwrap();
        drop(again);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let stale = serde_json::json!({
            "host": "build-7",
            "pid": 4242,
            "acquired_at": Utc::now() - chrono::Duration::hours(3),
        });
        std::fs::write(temp_dir.path().join(LOCK_FILE), stale.to_string()).unwrap();

        let manager = StateManager::new(temp_dir.path());
        let lock = manager.acquire_lock().await.unwrap();

        let fresh = StateManager::new(temp_dir.path())
            .with_stale_after(chrono::Duration::hours(5))
            .acquire_lock()
            .await;
        assert!(matches!(fresh, Err(CloudError::LockError(_))));
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(temp_dir.path().join(LOCK_FILE), "").unwrap();

        let manager = StateManager::new(temp_dir.path());
        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        assert!(!manager.force_unlock().await.unwrap());

        // A killed run never drops its guard
        std::mem::forget(manager.acquire_lock().await.unwrap());
        assert!(manager.acquire_lock().await.is_err());

        assert!(manager.force_unlock().await.unwrap());
        let lock = manager.acquire_lock().await.unwrap();
        lock.release().await.unwrap();
    }
}
