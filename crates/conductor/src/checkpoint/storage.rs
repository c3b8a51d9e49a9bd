//! Checkpoint storage
//!
//! `latest.json` always holds the newest snapshot; `level-NNN.json` keeps one
//! file per settled level. Every file is written to a temporary sibling and
//! renamed into place, so a crash never leaves a torn checkpoint.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::types::*;
use crate::error::{ConductorError, ConductorResult};
use crate::utils::write_atomic;

const LATEST: &str = "latest.json";

pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.checkpoint_dir.join(LATEST)
    }

    fn history_path(&self, checkpoint: &Checkpoint) -> PathBuf {
        let name = match (checkpoint.last_settled_level, checkpoint.cancelled) {
            (Some(level), false) => format!("level-{:03}.json", level),
            (Some(level), true) => format!("level-{:03}-cancelled.json", level),
            (None, _) => "level-none-cancelled.json".to_string(),
        };
        self.checkpoint_dir.join(name)
    }

    /// Persist `checkpoint` as the latest snapshot plus its history entry
    pub async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<PathBuf> {
        fs::create_dir_all(&self.checkpoint_dir).await?;

        let data = serde_json::to_vec_pretty(checkpoint)?;
        let history = self.history_path(checkpoint);
        write_atomic(&history, &data).await?;
        let latest = self.latest_path();
        write_atomic(&latest, &data).await?;

        debug!(
            path = %latest.display(),
            level = ?checkpoint.last_settled_level,
            "checkpoint saved"
        );
        Ok(latest)
    }

    /// Newest snapshot, if any
    pub async fn load_latest(&self) -> ConductorResult<Option<Checkpoint>> {
        let path = self.latest_path();
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&data).map_err(|e| {
            ConductorError::Configuration(format!(
                "corrupt checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(ConductorError::Configuration(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        Ok(Some(checkpoint))
    }

    /// History files in level order
    pub async fn history(&self) -> ConductorResult<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.checkpoint_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_history = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("level-") && n.ends_with(".json"))
                .unwrap_or(false);
            if is_history {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Remove every checkpoint file
    pub async fn clear(&self) -> ConductorResult<()> {
        match fs::remove_dir_all(&self.checkpoint_dir).await {
            Ok(()) => {
                info!(dir = %self.checkpoint_dir.display(), "checkpoints cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
