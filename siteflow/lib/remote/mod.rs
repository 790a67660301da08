//! Remote execution over pooled SSH sessions.
//!
//! Every mutation of the managed host flows through this module. Commands
//! are shaped as a single shell invocation with explicit quoting; sessions
//! are acquired under a semaphore and idle ones are reaped after a grace
//! period. Transport failures are distinct from non-zero exit codes.

mod executor;
mod locks;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use executor::*;
pub use locks::*;
