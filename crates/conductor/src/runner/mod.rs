// Agent Runner Module
//
// - Operation validation (closed operation enum)
// - Producer trait for agent behavior
// - Single-attempt execution with file locking
// - Verification hook

mod executor;
mod operation;
mod producer;
mod verify;

pub use executor::*;
pub use operation::*;
pub use producer::*;
pub use verify::*;
