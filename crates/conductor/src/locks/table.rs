//! File Lock Table
//!
//! Tracks which agent holds exclusive write access to a logical output path.
//!
//! # Features
//! - Non-blocking acquisition; a denied request returns immediately
//! - Reentrant for the current holder
//! - Release is only honoured for the recorded holder
//! - Bulk release of everything an agent holds (failure/cancellation cleanup)
//! - Contention counters for observability

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A held lock on a logical path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    /// Normalized logical path
    pub path: String,
    /// Agent holding the lock
    pub holder: String,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

/// Lock table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatistics {
    /// Locks currently held
    pub active_locks: usize,
    /// Acquisitions denied because another agent held the path
    pub contested_acquisitions: u64,
    /// Successful acquisitions, reentrant ones included
    pub total_acquisitions: u64,
}

#[derive(Default)]
struct LockState {
    locks: HashMap<String, FileLock>,
    contested: u64,
    acquired: u64,
}

/// Mutual-exclusion table for the output tree
#[derive(Default)]
pub struct FileLockTable {
    state: Mutex<LockState>,
}

impl FileLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock on `path` for `agent`.
    ///
    /// Succeeds when the path is free or already held by `agent`; returns
    /// false without waiting when another agent holds it.
    pub fn acquire(&self, path: &str, agent: &str) -> bool {
        let key = normalize_lock_path(path);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(existing) = state.locks.get(&key) {
            if existing.holder != agent {
                state.contested += 1;
                debug!(path = %key, holder = %existing.holder, requester = agent, "lock denied");
                return false;
            }
            state.acquired += 1;
            return true;
        }

        state.locks.insert(
            key.clone(),
            FileLock {
                path: key,
                holder: agent.to_string(),
                acquired_at: Utc::now(),
            },
        );
        state.acquired += 1;
        true
    }

    /// Release the lock on `path` if `agent` is the holder
    pub fn release(&self, path: &str, agent: &str) -> bool {
        let key = normalize_lock_path(path);
        let mut state = self.state.lock();

        let held = state
            .locks
            .get(&key)
            .map(|lock| lock.holder == agent)
            .unwrap_or(false);
        if held {
            state.locks.remove(&key);
        }
        held
    }

    /// Drop every lock held by `agent`, returning how many were released
    pub fn release_all(&self, agent: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.holder != agent);
        let released = before - state.locks.len();
        if released > 0 {
            debug!(agent, released, "released all locks");
        }
        released
    }

    /// Current holder of `path`
    pub fn holder(&self, path: &str) -> Option<String> {
        let key = normalize_lock_path(path);
        self.state.lock().locks.get(&key).map(|l| l.holder.clone())
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.holder(path).is_some()
    }

    /// Paths currently held by `agent`, sorted
    pub fn locks_held_by(&self, agent: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut paths: Vec<String> = state
            .locks
            .values()
            .filter(|l| l.holder == agent)
            .map(|l| l.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Snapshot of all held locks
    pub fn active_locks(&self) -> Vec<FileLock> {
        self.state.lock().locks.values().cloned().collect()
    }

    pub fn statistics(&self) -> LockStatistics {
        let state = self.state.lock();
        LockStatistics {
            active_locks: state.locks.len(),
            contested_acquisitions: state.contested,
            total_acquisitions: state.acquired,
        }
    }
}

/// Canonical key for a logical path: forward slashes, no empty or `.`
/// segments, `..` folded into its parent where possible
pub fn normalize_lock_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(|c: char| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
