//! Cryptographic layer for SSU sessions.
//!
//! - keys: introduction keys, derived session keys, ephemeral X25519
//! - [`cipher`]: packet encryption and MAC, signature sealing
//! - schedule: which key protects which packet for one session

pub mod cipher;
mod keys;
mod schedule;

pub use keys::*;
pub use schedule::*;
