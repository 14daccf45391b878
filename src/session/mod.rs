//! SSU sessions.
//!
//! An [`SsuSession`] drives one connection with a remote router: the
//! three-message handshake, relayed introductions and peer tests, liveness
//! timers and handing data to its [`DataChannel`].

mod data;
mod handshake;
mod relay;
#[allow(clippy::module_inception)]
mod session;

pub use data::{DEFAULT_QUEUE_CAPACITY, DataChannel, QueueDataChannel};
pub use peer_test::{PeerTestRegistry, PeerTestResult, PeerTestRole};
pub use session::{SessionState, SsuSession};
