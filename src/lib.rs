//! # SSU session core
//!
//! Session layer of the SSU UDP transport: one [`SsuSession`] per remote
//! router endpoint, carrying
//!
//! - the three-message handshake (SessionRequest, SessionCreated,
//!   SessionConfirmed) that derives per-session encryption and MAC keys,
//! - relayed introductions (RelayRequest, RelayResponse, RelayIntro) for
//!   peers behind NATs,
//! - the three-party peer test classifying our own reachability,
//! - keepalive and termination timers.
//!
//! Socket I/O and the endpoint table belong to the router, which a session
//! reaches only through [`SessionServer`]. Upper-layer messages pass through a
//! [`DataChannel`].
//!
//! ## Modules
//!
//! - [`core`]: constants and error types
//! - [`transport`]: packet header codec, endpoint encoding, timers
//! - [`crypto`]: key derivation, packet protection, key schedule
//! - [`session`]: the session state machine and its sub-protocols
//! - [`server`]: configuration, identities and the router contract
//!
//! ## Example
//!
//! ```ignore
//! use ssu_session::prelude::*;
//!
//! // `router` implements `SessionServer` and owns the UDP socket.
//! let session = router.get_or_create_session(endpoint, Some(peer));
//! session.connect()?;
//!
//! // Socket loop.
//! let (len, from) = socket.recv_from(&mut buf).await?;
//! router.get_or_create_session(from, None).process_next_message(&mut buf[..len], from);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::crypto::IntroKey;
    pub use crate::server::{
        LocalRouter, RemotePeer, SessionConfig, SessionConfigBuilder, SessionEvent,
        SessionServer,
    };
    pub use crate::session::{
        DataChannel, PeerTestRegistry, PeerTestResult, PeerTestRole, QueueDataChannel,
        SessionState, SsuSession,
    };
    pub use crate::transport::PayloadType;
}

pub use server::{SessionEvent, SessionServer};
pub use session::{DataChannel, SessionState, SsuSession};
