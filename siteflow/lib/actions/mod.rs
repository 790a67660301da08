//! Lifecycle actions with audit framing.
//!
//! Every entry point writes a pending audit entry, runs under the
//! per-target lock, finalizes the entry before returning and invalidates
//! the state cache after a successful mutation.

mod deploy;
mod engine;
mod routes;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Lock target guarding the shared reverse-proxy config.
pub(crate) const CADDYFILE_TARGET: &str = "caddyfile";

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use deploy::*;
pub use engine::*;
pub use routes::*;
