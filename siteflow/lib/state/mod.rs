//! TTL-bounded memoization of expensive remote reads and the aggregated
//! state views built on top of it.

mod cache;
mod overview;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
pub use overview::*;
