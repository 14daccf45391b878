//! Router-side collaborators of a session: configuration, identities and
//! the [`SessionServer`] contract.

mod config;
#[allow(clippy::module_inception)]
mod server;

pub use config::*;
pub use server::*;
