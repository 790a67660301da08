//! DNS and tunnel provider client.
//!
//! The provider is an external collaborator behind the [`TunnelService`]
//! trait so provisioning can be tested without the network. With no
//! credentials configured the client is inert: status is empty and every
//! mutation is a logged no-op.

mod cloudflare;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cloudflare::*;
