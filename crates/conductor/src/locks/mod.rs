// File Lock Coordinator
//
// Non-blocking, reentrant, holder-checked locks on logical paths inside
// the shared output tree.

mod table;

#[cfg(test)]
mod table_property_tests;

pub use table::*;
