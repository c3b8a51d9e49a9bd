// Dependency Planner Module
//
// - Dependency graph with cycle detection
// - Level computation and plan fingerprinting

mod graph;
mod levels;


pub use graph::*;
pub use levels::*;
