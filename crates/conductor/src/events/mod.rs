// Event Log
//
// Append-only JSON-lines record of everything the scheduler and runners do,
// plus a cursor reader for external monitors tailing the file.

mod cursor;
mod event_log;
mod types;

pub use cursor::*;
pub use event_log::*;
pub use types::*;
