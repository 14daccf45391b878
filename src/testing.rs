//! In-memory routers for session tests.
//!
//! Datagrams sent by any router are queued on a shared [`TestNetwork`] and
//! delivered one at a time, so tests can stop between protocol steps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::core::ProtocolError;
use crate::crypto::cipher::random_iv;
use crate::crypto::{IntroKey, open_with_intro_key, seal_with_intro_key};
use crate::server::{LocalRouter, RemotePeer, SessionConfig, SessionEvent, SessionServer};
use crate::session::{
    DEFAULT_QUEUE_CAPACITY, PeerTestRegistry, PeerTestResult, QueueDataChannel, SessionState,
    SsuSession,
};
use crate::transport::{PacketHeader, PayloadType, SessionPacket};

type Datagram = (SocketAddr, SocketAddr, Vec<u8>);

/// Shared medium between test routers.
#[derive(Default)]
pub(crate) struct TestNetwork {
    routers: Mutex<HashMap<SocketAddr, Arc<TestRouter>>>,
    queue: Mutex<VecDeque<Datagram>>,
    log: Mutex<Vec<Datagram>>,
    blocked: Mutex<HashSet<(SocketAddr, SocketAddr)>>,
}

impl TestNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Router `n` listening on 127.0.0.1:(10000 + n).
    pub(crate) fn add_router(self: &Arc<Self>, n: u16) -> Arc<TestRouter> {
        self.add_router_with(n, SessionConfig::default())
    }

    pub(crate) fn add_router_with(
        self: &Arc<Self>,
        n: u16,
        config: SessionConfig,
    ) -> Arc<TestRouter> {
        let endpoint = SocketAddr::from((Ipv4Addr::LOCALHOST, 10_000 + n));
        let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let router = Arc::new_cyclic(|me| TestRouter {
            me: me.clone(),
            network: Arc::downgrade(self),
            endpoint,
            router: LocalRouter::generate(),
            peer_tests: PeerTestRegistry::new(config.peer_test_timeout),
            config,
            sessions: Mutex::new(HashMap::new()),
            relays: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        });
        self.routers.lock().unwrap().insert(endpoint, router.clone());
        router
    }

    fn enqueue(&self, from: SocketAddr, to: SocketAddr, datagram: Vec<u8>) {
        self.log.lock().unwrap().push((from, to, datagram.clone()));
        self.queue.lock().unwrap().push_back((from, to, datagram));
    }

    /// Deliver the oldest queued datagram. False when the queue is empty.
    pub(crate) fn deliver_one(&self) -> bool {
        let Some((from, to, datagram)) = self.queue.lock().unwrap().pop_front() else {
            return false;
        };
        if self.blocked.lock().unwrap().contains(&(from, to)) {
            return true;
        }
        let router = self.routers.lock().unwrap().get(&to).cloned();
        if let Some(router) = router {
            router.receive(from, datagram);
        }
        true
    }

    pub(crate) fn deliver_all(&self) {
        let mut delivered = 0;
        while self.deliver_one() {
            delivered += 1;
            assert!(delivered < 10_000, "datagram storm");
        }
    }

    /// Discard datagrams from `from` to `to` at delivery.
    pub(crate) fn block(&self, from: SocketAddr, to: SocketAddr) {
        self.blocked.lock().unwrap().insert((from, to));
    }

    pub(crate) fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub(crate) fn drop_pending(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Whether a non-empty datagram went from `from` to `to`.
    pub(crate) fn datagram_sent(&self, from: SocketAddr, to: SocketAddr) -> bool {
        self.last_datagram(from, to).is_some()
    }

    /// Whether an empty datagram went from `from` to `to`.
    pub(crate) fn hole_punch_sent(&self, from: SocketAddr, to: SocketAddr) -> bool {
        self.log
            .lock()
            .unwrap()
            .iter()
            .any(|(f, t, d)| *f == from && *t == to && d.is_empty())
    }

    pub(crate) fn last_datagram(&self, from: SocketAddr, to: SocketAddr) -> Option<Vec<u8>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(f, t, d)| *f == from && *t == to && !d.is_empty())
            .map(|(_, _, d)| d.clone())
    }
}

/// A router with an endpoint table, recording everything its sessions report.
pub(crate) struct TestRouter {
    me: Weak<TestRouter>,
    network: Weak<TestNetwork>,
    endpoint: SocketAddr,
    router: LocalRouter,
    config: SessionConfig,
    peer_tests: PeerTestRegistry,
    sessions: Mutex<HashMap<SocketAddr, Arc<SsuSession>>>,
    relays: Mutex<HashMap<u32, SocketAddr>>,
    events: Mutex<Vec<(SocketAddr, SessionEvent)>>,
    dropped: Mutex<Vec<(SocketAddr, ProtocolError)>>,
    results: Mutex<Vec<PeerTestResult>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl TestRouter {
    pub(crate) fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub(crate) fn intro_key(&self) -> &IntroKey {
        self.router.intro_key()
    }

    pub(crate) fn remote_peer(&self) -> RemotePeer {
        self.router.to_remote_peer()
    }

    fn new_session(
        &self,
        endpoint: SocketAddr,
        peer: Option<RemotePeer>,
        peer_test: bool,
    ) -> Arc<SsuSession> {
        let server: Arc<dyn SessionServer> = self.me.upgrade().expect("router alive");
        SsuSession::new(
            server,
            endpoint,
            peer,
            Box::new(QueueDataChannel::with_sender(self.inbound_tx.clone())),
            peer_test,
        )
    }

    fn insert_session(
        &self,
        endpoint: SocketAddr,
        peer: Option<RemotePeer>,
        peer_test: bool,
    ) -> Arc<SsuSession> {
        let session = self.new_session(endpoint, peer, peer_test);
        self.sessions
            .lock()
            .unwrap()
            .insert(endpoint, session.clone());
        session
    }

    /// Outbound session toward `other`, handshake not started.
    pub(crate) fn open_session(&self, other: &TestRouter, peer_test: bool) -> Arc<SsuSession> {
        self.insert_session(other.endpoint, Some(other.remote_peer()), peer_test)
    }

    /// Session toward `other` knowing nothing about it.
    pub(crate) fn session_without_handshake(&self, other: &TestRouter) -> Arc<SsuSession> {
        self.insert_session(other.endpoint, None, false)
    }

    pub(crate) fn session(&self, endpoint: SocketAddr) -> Option<Arc<SsuSession>> {
        self.sessions.lock().unwrap().get(&endpoint).cloned()
    }

    pub(crate) fn find_relay_session(&self, relay_tag: u32) -> Option<Arc<SsuSession>> {
        self.find_relay(relay_tag)
    }

    pub(crate) fn events(&self) -> Vec<(SocketAddr, SessionEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn dropped(&self) -> Vec<(SocketAddr, ProtocolError)> {
        self.dropped.lock().unwrap().clone()
    }

    pub(crate) fn peer_test_results(&self) -> Vec<PeerTestResult> {
        self.results.lock().unwrap().clone()
    }

    /// Next body handed to any of this router's data channels.
    pub(crate) fn try_recv_data(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().unwrap().try_recv().ok()
    }

    /// A packet protected with our own intro key, as a stranger would send.
    pub(crate) fn seal_for_self(&self, payload_type: PayloadType, body: &[u8]) -> Vec<u8> {
        let mut datagram = PacketHeader::new(payload_type, random_iv()).to_packet(body);
        seal_with_intro_key(self.intro_key(), &mut datagram).unwrap();
        datagram
    }

    /// Payload type of a datagram protected with our intro key.
    pub(crate) fn peek_payload_type(&self, datagram: &[u8]) -> Option<PayloadType> {
        let mut buf = datagram.to_vec();
        open_with_intro_key(self.intro_key(), &mut buf).ok()?;
        SessionPacket::new_checked(&buf[..])
            .ok()
            .map(|packet| packet.payload_type())
    }

    /// Route an inbound datagram the way a socket loop would.
    pub(crate) fn receive(&self, from: SocketAddr, mut datagram: Vec<u8>) {
        let (session, created) = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get(&from) {
                Some(session) => (session.clone(), false),
                None => {
                    let session = self.new_session(from, None, false);
                    sessions.insert(from, session.clone());
                    (session, true)
                }
            }
        };
        if created {
            session.wait_for_connect();
        }
        session.process_next_message(&mut datagram, from);
    }
}

impl SessionServer for TestRouter {
    fn local_router(&self) -> &LocalRouter {
        &self.router
    }

    fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn send(&self, to: SocketAddr, datagram: Vec<u8>) {
        if let Some(network) = self.network.upgrade() {
            network.enqueue(self.endpoint, to, datagram);
        }
    }

    fn on_session_event(&self, endpoint: SocketAddr, event: SessionEvent) {
        self.events.lock().unwrap().push((endpoint, event));
        match event {
            SessionEvent::RelayTagAssigned(tag) => {
                self.relays.lock().unwrap().insert(tag, endpoint);
            }
            SessionEvent::Closed | SessionEvent::Failed => {
                let mut sessions = self.sessions.lock().unwrap();
                if sessions
                    .get(&endpoint)
                    .is_some_and(|session| session.state().is_terminal())
                {
                    sessions.remove(&endpoint);
                }
                self.relays.lock().unwrap().retain(|_, e| *e != endpoint);
            }
            SessionEvent::Established => {}
        }
    }

    fn find_session(&self, endpoint: &SocketAddr) -> Option<Arc<SsuSession>> {
        self.sessions.lock().unwrap().get(endpoint).cloned()
    }

    fn find_relay(&self, relay_tag: u32) -> Option<Arc<SsuSession>> {
        let endpoint = *self.relays.lock().unwrap().get(&relay_tag)?;
        self.find_session(&endpoint)
            .filter(|session| session.state() == SessionState::Established)
    }

    fn find_peer_test_helper(&self, exclude: &SocketAddr) -> Option<Arc<SsuSession>> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|session| {
                session.remote_endpoint() != *exclude
                    && session.state() == SessionState::Established
            })
            .cloned()
    }

    fn get_or_create_session(
        &self,
        endpoint: SocketAddr,
        peer: Option<RemotePeer>,
    ) -> Arc<SsuSession> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(&endpoint) {
            return session.clone();
        }
        let session = self.new_session(endpoint, peer, false);
        sessions.insert(endpoint, session.clone());
        session
    }

    fn peer_tests(&self) -> &PeerTestRegistry {
        &self.peer_tests
    }

    fn on_peer_test_result(&self, result: PeerTestResult) {
        self.results.lock().unwrap().push(result);
    }

    fn on_packet_dropped(&self, from: SocketAddr, reason: &ProtocolError) {
        self.dropped.lock().unwrap().push((from, reason.clone()));
    }
}
