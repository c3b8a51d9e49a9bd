//! Run configuration
//!
//! Parallelism, retry and path settings for a run, loaded from YAML and
//! overlaid by `CONDUCTOR_*` environment variables.

mod run_config;

pub use run_config::*;
