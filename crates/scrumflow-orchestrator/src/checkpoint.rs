//! Checkpoints: immutable state snapshots keyed by thread id
//!
//! The engine writes one checkpoint after every node. The latest checkpoint of
//! a thread says where the run stands: which node runs next, which node is
//! suspended and why, or that the run is done.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use scrumflow_core::{Interrupt, Result, ScrumError};

/// The pending transition recorded with a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Pending {
    /// `node` runs next
    Next { node: String },
    /// `interrupt.node` waits for a human
    Interrupted { interrupt: Interrupt },
    /// The run reached the end of the graph
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Increases by one per checkpoint of the thread
    pub version: u64,
    pub state: Value,
    pub pending: Pending,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, version: u64, state: Value, pending: Pending) -> Self {
        Self {
            thread_id: thread_id.into(),
            version,
            state,
            pending,
            created_at: Utc::now(),
        }
    }

    pub fn interrupt(&self) -> Option<&Interrupt> {
        match &self.pending {
            Pending::Interrupted { interrupt } => Some(interrupt),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.interrupt().is_some()
    }
}

/// Durable or in-memory checkpoint storage
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Latest checkpoint of a thread
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints of a thread, oldest first
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Forget a thread
    async fn delete(&self, thread_id: &str) -> Result<()>;
}

/// Checkpoints kept per thread unless a store is told otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Process-local store
#[derive(Debug)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
    history_limit: usize,
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the newest `limit` checkpoints of each thread
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        let history = threads.entry(checkpoint.thread_id.clone()).or_default();
        history.push(checkpoint.clone());
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}

/// One JSON Lines file per thread, named by the hex-encoded thread id
///
/// Each save appends one line. A thread's file is rewritten only on its first
/// save in this process and when it grows past twice the history limit, so it
/// is compacted back to the newest `history_limit` entries.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    history_limit: usize,
    // Lines currently in each thread file written by this process
    lines: Mutex<HashMap<String, usize>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            lines: Mutex::new(HashMap::new()),
        }
    }

    /// Keep only the newest `limit` checkpoints of each thread
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", hex::encode(thread_id.as_bytes())))
    }

    async fn read_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let path = self.path_for(thread_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let last = lines.len().saturating_sub(1);

        let mut history = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Checkpoint>(line) {
                Ok(checkpoint) if checkpoint.thread_id == thread_id => history.push(checkpoint),
                Ok(checkpoint) => warn!(
                    "Ignoring checkpoint of thread '{}' found in the file of '{}'",
                    checkpoint.thread_id, thread_id
                ),
                // An interrupted append leaves a partial final line
                Err(e) if index == last && !complete => warn!(
                    "Ignoring truncated checkpoint at the end of {}: {}",
                    path.display(),
                    e
                ),
                Err(e) => {
                    return Err(ScrumError::Checkpoint(format!(
                        "Failed to parse checkpoint {} of '{}': {}",
                        index + 1,
                        thread_id,
                        e
                    )))
                }
            }
        }

        let excess = history.len().saturating_sub(self.history_limit);
        history.drain(..excess);
        Ok(history)
    }

    async fn rewrite(&self, path: &Path, history: &[Checkpoint]) -> Result<()> {
        let mut content = String::new();
        for checkpoint in history {
            content.push_str(&serde_json::to_string(checkpoint)?);
            content.push('\n');
        }
        // Write-then-rename keeps the previous file intact if we crash mid-write
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut lines = self.lines.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.thread_id);

        let written = match lines.get(&checkpoint.thread_id) {
            Some(&count) if count < 2 * self.history_limit => {
                let mut line = serde_json::to_string(checkpoint)?;
                line.push('\n');
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
                count + 1
            }
            _ => {
                let mut history = self.read_history(&checkpoint.thread_id).await?;
                history.push(checkpoint.clone());
                let excess = history.len().saturating_sub(self.history_limit);
                history.drain(..excess);
                self.rewrite(&path, &history).await?;
                history.len()
            }
        };
        lines.insert(checkpoint.thread_id.clone(), written);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.read_history(thread_id).await?.pop())
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.read_history(thread_id).await
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        let mut lines = self.lines.lock().await;
        lines.remove(thread_id);
        let path = self.path_for(thread_id);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}
