//! Deploy history
//!
//! `.pscflow/state.json` keeps the latest run of every resource folder.
//! Runs against the same folder are serialized with a per-folder lock file.

use crate::attempt::ApplyAttempt;
use crate::classify::ErrorCategory;
use crate::error::{CloudError, Result};
use crate::output::OutputRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".pscflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";

/// Locks older than this are considered abandoned
const STALE_LOCK_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,

    /// Latest run per resource folder
    pub deploys: BTreeMap<String, DeployRecord>,
}

impl Default for DeployState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            deploys: BTreeMap::new(),
        }
    }
}

impl DeployState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: DeployRecord) {
        self.deploys.insert(record.resource_folder.clone(), record);
        self.updated_at = Utc::now();
    }

    pub fn get(&self, resource_folder: &str) -> Option<&DeployRecord> {
        self.deploys.get(resource_folder)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Succeeded,
    /// Accepted by the provider, still converging
    Accepted,
    Failed,
    /// The caller stopped waiting at its overall deadline; the apply may
    /// still be running
    Unknown,
}

impl std::fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployStatus::Succeeded => write!(f, "succeeded"),
            DeployStatus::Accepted => write!(f, "accepted"),
            DeployStatus::Failed => write!(f, "failed"),
            DeployStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRecord {
    pub resource_folder: String,
    pub project_id: Option<String>,
    pub status: DeployStatus,

    /// Category of the terminal failure or caveat
    pub category: Option<ErrorCategory>,

    /// Error message shown to the operator on failure
    pub message: Option<String>,

    #[serde(default)]
    pub attempts: Vec<ApplyAttempt>,

    pub output: Option<OutputRecord>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeployRecord {
    pub fn new(resource_folder: impl Into<String>, status: DeployStatus) -> Self {
        let now = Utc::now();
        Self {
            resource_folder: resource_folder.into(),
            project_id: None,
            status,
            category: None,
            message: None,
            attempts: Vec::new(),
            output: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_category(mut self, category: Option<ErrorCategory>) -> Self {
        self.category = category;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attempts(mut self, attempts: Vec<ApplyAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_output(mut self, output: OutputRecord) -> Self {
        self.output = Some(output);
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// Reads and writes the deploy history under a project root
pub struct StateManager {
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self, resource_folder: &str) -> PathBuf {
        let name: String = resource_folder
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.state_dir().join(format!("lock-{}.json", name))
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    pub async fn load(&self) -> Result<DeployState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(DeployState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: DeployState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        Ok(state)
    }

    /// Write `state`, keeping the previous file as a backup
    pub async fn save(&self, state: &DeployState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} deploy(s)", state.deploys.len());
        Ok(())
    }

    /// Load, add `record`, save
    pub async fn record(&self, record: DeployRecord) -> Result<()> {
        let mut state = self.load().await?;
        state.record(record);
        self.save(&state).await
    }

    /// Take the lock for one resource folder.
    ///
    /// The lock file is created with `create_new`, so of two concurrent
    /// callers exactly one wins. An existing lock older than
    /// `STALE_LOCK_HOURS` is removed and creation is retried once.
    pub async fn acquire_lock(&self, resource_folder: &str) -> Result<FolderLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path(resource_folder);
        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&info)?;

        for retry in [false, true] {
            match create_lock_file(&lock_path, &content).await {
                Ok(()) => {
                    tracing::debug!("Acquired lock for {}", resource_folder);
                    return Ok(FolderLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && !retry => {
                    self.check_existing_lock(resource_folder, &lock_path).await?;
                    match fs::remove_file(&lock_path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(format!(
            "{} is being deployed by another process",
            resource_folder
        )))
    }

    /// Fails while the existing lock is held; `Ok` when it is stale
    async fn check_existing_lock(&self, resource_folder: &str, lock_path: &Path) -> Result<()> {
        let content = match fs::read_to_string(lock_path).await {
            Ok(content) => content,
            // Released in the meantime
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<LockInfo>(&content) {
            Ok(info) => {
                if !is_stale(info.acquired_at) {
                    return Err(CloudError::LockError(format!(
                        "{} is being deployed by {} (pid {}) since {}",
                        resource_folder, info.holder, info.pid, info.acquired_at
                    )));
                }
                tracing::warn!("Removing stale lock on {} from {}", resource_folder, info.holder);
            }
            Err(e) => {
                // A lock being written right now is empty; judge it by its mtime
                let modified = fs::metadata(lock_path).await?.modified()?;
                if !is_stale(DateTime::<Utc>::from(modified)) {
                    return Err(CloudError::LockError(format!(
                        "{} is being deployed by another process",
                        resource_folder
                    )));
                }
                tracing::warn!("Replacing unreadable lock file: {}", e);
            }
        }
        Ok(())
    }
}

fn is_stale(acquired_at: DateTime<Utc>) -> bool {
    Utc::now().signed_duration_since(acquired_at).num_hours() >= STALE_LOCK_HOURS
}

async fn create_lock_file(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Guard for a folder lock; removes the lock file when dropped
pub struct FolderLock {
    lock_path: PathBuf,
    released: bool,
}

impl FolderLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for FolderLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
