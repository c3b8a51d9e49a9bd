// Requirement Tracker
//
// Loads the requirements manifest and aggregates weighted completion
// reported by the owning agents.

mod manifest;
mod tracker;

pub use manifest::*;
pub use tracker::*;
