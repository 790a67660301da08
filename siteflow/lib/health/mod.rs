//! Uptime monitor adapter.
//!
//! Wraps the monitor service's socket protocol behind the narrow
//! [`UptimeService`] interface. The adapter is failure-tolerant by
//! contract: while disconnected, monitor listings are empty and the
//! topology health overlay reads `unknown`, never `failed`.

mod adapter;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use adapter::*;
