//! Site discovery: compose parsing, live-container correlation and
//! reverse-proxy mapping.
//!
//! The pipeline is read-only and idempotent. Identical remote inputs yield
//! identical output ordering, which the monitor loop relies on for
//! fingerprint-based diffing. Failure of a single site's parsing is
//! isolated: that site surfaces `status = unknown` with `meta.error`.

mod caddyfile;
mod compose;
mod containers;
mod scanner;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use caddyfile::*;
pub use compose::*;
pub use containers::*;
pub use scanner::*;
