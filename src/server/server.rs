//! The router side a session talks to.
//!
//! A router owns its UDP socket and an endpoint-to-session table; sessions
//! reach both only through [`SessionServer`]. The trait is the whole contract:
//! sessions never hold a reference to the table itself.

use std::net::SocketAddr;
use std::sync::Arc;

use super::config::{LocalRouter, RemotePeer, SessionConfig};
use crate::core::ProtocolError;
use crate::session::{PeerTestRegistry, PeerTestResult, SsuSession};

/// Lifecycle notification from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake complete.
    Established,
    /// We issued this relay tag to the remote peer; register it for lookups.
    RelayTagAssigned(u32),
    /// Closed locally, remotely or by inactivity. Remove the entry.
    Closed,
    /// Handshake or introduction timed out. Remove the entry.
    Failed,
}

/// Services a router provides to its sessions.
///
/// Sessions call these methods only after releasing their own lock, so an
/// implementation may call back into any session, including the caller.
///
/// The lookup methods (`find_session`, `find_relay` and
/// `find_peer_test_helper`) may be invoked while the calling session is
/// mid-dispatch. They must only inspect candidate sessions through
/// [`SsuSession::state`] and [`SsuSession::remote_endpoint`], which never
/// block.
pub trait SessionServer: Send + Sync + 'static {
    /// Our identity and introduction key.
    fn local_router(&self) -> &LocalRouter;

    /// Session configuration.
    fn config(&self) -> &SessionConfig;

    /// Send one datagram. Must not block.
    fn send(&self, to: SocketAddr, datagram: Vec<u8>);

    /// A session changed lifecycle state.
    fn on_session_event(&self, endpoint: SocketAddr, event: SessionEvent);

    /// Session keyed by `endpoint`.
    fn find_session(&self, endpoint: &SocketAddr) -> Option<Arc<SsuSession>>;

    /// Established session we issued `relay_tag` to.
    fn find_relay(&self, relay_tag: u32) -> Option<Arc<SsuSession>>;

    /// An established session usable as Charlie, other than the one to
    /// `exclude`.
    fn find_peer_test_helper(&self, exclude: &SocketAddr) -> Option<Arc<SsuSession>>;

    /// Session keyed by `endpoint`, created (with `peer` attached) if absent.
    fn get_or_create_session(
        &self,
        endpoint: SocketAddr,
        peer: Option<RemotePeer>,
    ) -> Arc<SsuSession>;

    /// Pending peer tests of this router.
    ///
    /// Inserts discard stale records we only relay for. Tests we started stay
    /// until the server calls [`PeerTestRegistry::expire`], which it should do
    /// periodically and feed to [`on_peer_test_result`](Self::on_peer_test_result).
    fn peer_tests(&self) -> &PeerTestRegistry;

    /// A peer test we started finished.
    fn on_peer_test_result(&self, result: PeerTestResult) {
        let _ = result;
    }

    /// An inbound packet was dropped.
    fn on_packet_dropped(&self, from: SocketAddr, reason: &ProtocolError) {
        let _ = (from, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_equality() {
        assert_eq!(
            SessionEvent::RelayTagAssigned(7),
            SessionEvent::RelayTagAssigned(7)
        );
        assert_ne!(SessionEvent::Closed, SessionEvent::Failed);
    }
}
