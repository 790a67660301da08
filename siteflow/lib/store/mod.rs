//! Embedded database plumbing shared by the audit and backup stores.

mod db;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
