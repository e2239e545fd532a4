//! Fast checkpoint tiers.

use super::model::Checkpoint;
use crate::errors::CheckpointError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// A store of checkpoint records keyed by run.
#[async_trait]
pub trait CheckpointTier: Send + Sync {
    /// Tier name used in logs.
    fn name(&self) -> &str;

    /// Writes a checkpoint.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Returns the highest-version checkpoint for a run.
    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Returns every checkpoint for a run, ordered by version.
    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Removes every checkpoint for a run.
    async fn remove_run(&self, run_id: &str) -> Result<(), CheckpointError>;
}

/// Checkpoints retained per run by [`InMemoryCheckpointTier::new`].
pub const DEFAULT_MAX_PER_RUN: usize = 32;

/// Checkpoints held in a concurrent map.
///
/// Each run keeps at most `max_per_run` checkpoints; the lowest versions
/// are evicted first.
#[derive(Debug)]
pub struct InMemoryCheckpointTier {
    runs: DashMap<String, Vec<Checkpoint>>,
    max_per_run: usize,
}

impl Default for InMemoryCheckpointTier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCheckpointTier {
    /// Creates an empty tier.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_per_run(DEFAULT_MAX_PER_RUN)
    }

    /// Creates an empty tier with a per-run history cap (at least one).
    #[must_use]
    pub fn with_max_per_run(max_per_run: usize) -> Self {
        Self {
            runs: DashMap::new(),
            max_per_run: max_per_run.max(1),
        }
    }
}

#[async_trait]
impl CheckpointTier for InMemoryCheckpointTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut entries = self.runs.entry(checkpoint.run_id.clone()).or_default();
        let pos = entries.partition_point(|c| c.version <= checkpoint.version);
        entries.insert(pos, checkpoint.clone());
        if entries.len() > self.max_per_run {
            let excess = entries.len() - self.max_per_run;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.runs.get(run_id).and_then(|e| e.last().cloned()))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        Ok(self.runs.get(run_id).map(|e| e.value().clone()).unwrap_or_default())
    }

    async fn remove_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.runs.remove(run_id);
        Ok(())
    }
}

/// Checkpoints written as JSON files, one directory per run.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointTier {
    root: PathBuf,
}

impl JsonFileCheckpointTier {
    /// Creates a tier rooted at a directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        let safe: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    async fn read_all(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let dir = self.run_dir(run_id);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
            if checkpoint.run_id == run_id {
                checkpoints.push(checkpoint);
            }
        }
        checkpoints.sort_by_key(|c| c.version);
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointTier for JsonFileCheckpointTier {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let dir = self.run_dir(&checkpoint.run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file = dir.join(format!("{:020}-{}.json", checkpoint.version, checkpoint.checkpoint_id));
        let tmp = file.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &file).await?;
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.read_all(run_id).await?.pop())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.read_all(run_id).await
    }

    async fn remove_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_dir_all(self.run_dir(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
