//! Scheduler
//!
//! Drives execution levels through the Agent Runner:
//! - bounded concurrency per level (`max_parallel`)
//! - per-agent retry with exponential backoff
//! - dependents of unfinished agents are Blocked, never attempted
//! - cooperative cancellation and checkpointed resume
//!
//! ```rust,ignore
//! let ctx = RunContext::new(RunConfig::rooted_at("work"))?.into_shared();
//! let scheduler = Scheduler::new(ctx, MyProducer::default());
//! let summary = scheduler.run(&agents).await?;
//! println!("{}", summary);
//! ```

mod executor;
mod summary;
mod types;


pub use executor::*;
pub use summary::*;
pub use types::*;
