//! Checkpoint Manager
//!
//! Persists scheduler state after every settled level so an interrupted run
//! can resume without re-executing completed agents.
//!
//! # Layout
//! - `latest.json`: newest snapshot, read on resume
//! - `level-NNN.json`: one snapshot per settled level

pub mod storage;
pub mod types;


pub use storage::*;
pub use types::*;
