//! One SSU session.
//!
//! A session is keyed by its remote endpoint and owned by the server through
//! an `Arc`. Its mutable state sits behind a single mutex; the lifecycle state
//! is mirrored in an atomic so the server can inspect any session without
//! taking its lock.
//!
//! Packet processing never awaits and never touches another session while the
//! lock is held. Work involving other sessions or the server is collected as
//! effects and executed after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ed25519_dalek::VerifyingKey;
use rand::{RngCore, rngs::OsRng};
use tokio::time::Instant;

use crate::core::{CryptoError, ProtocolError, SessionError};
use crate::crypto::cipher::{open_signature, random_iv, seal_signature};
use crate::crypto::{
    EphemeralKeypair, IntroKey, KeyKind, KeySchedule, derive_handshake_key, derive_session_keys,
    seal_with_intro_key,
};
use crate::server::{RemotePeer, SessionEvent, SessionServer, parse_identity, verify_signature};
use crate::transport::{
    PacketHeader, PayloadType, SessionPacket, SessionTimer, TimerKind, TimerTarget, unix_time,
};

use super::data::DataChannel;
use super::handshake::{
    HandshakeState, SessionConfirmedBody, SessionCreatedBody, SessionRequestBody,
    relay_tag_request_option, signed_data, signed_prefix, wants_relay_tag,
};
use super::peer_test::PeerTestResult;
use super::relay::{PendingRelay, expire_relays};

const LOG_TARGET: &str = "ssu::session";

/// Session lifecycle state.
///
/// ```text
/// Unknown ──(handshake)──> Established ──> Closed
///    │                        ^
///    └──(RelayIntro)──> Introduced
///
/// Unknown / Introduced ──(connect timeout)──> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// No handshake completed.
    Unknown = 0,
    /// Introduced by a relay; waiting for the requester's handshake.
    Introduced = 1,
    /// Session keys installed.
    Established = 2,
    /// Closed locally, remotely or by inactivity.
    Closed = 3,
    /// Handshake or introduction timed out.
    Failed = 4,
}

impl SessionState {
    /// Closed and Failed sessions are never reused.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Introduced,
            2 => Self::Established,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

/// Which key protects an outbound packet.
pub(super) enum Seal<'a> {
    /// Session keys once installed, remote intro key before.
    Auto,
    /// Remote introduction key.
    RemoteIntro,
    /// Our own introduction key.
    LocalIntro,
    /// Installed session keys.
    Session,
    /// A third router's introduction key.
    Key(&'a IntroKey),
}

/// Work executed after the session lock is released.
pub(super) enum Effect {
    /// Hand a datagram to the server.
    Send {
        to: SocketAddr,
        datagram: Vec<u8>,
    },
    /// Tell the server about a lifecycle change.
    Notify(SessionEvent),
    /// Send a body through another established session.
    Forward {
        session: Arc<SsuSession>,
        payload_type: PayloadType,
        body: Vec<u8>,
    },
    /// Open a session toward an introduced peer and start the handshake.
    Connect {
        endpoint: SocketAddr,
        peer: RemotePeer,
    },
    /// Punch a hole toward a requester and wait for its handshake.
    Introduce {
        endpoint: SocketAddr,
        peer: RemotePeer,
    },
    /// Report a finished peer test.
    PeerTestResult(PeerTestResult),
}

/// Mutable session state, guarded by [`SsuSession`]'s mutex.
pub(super) struct SessionInner {
    pub(super) keys: KeySchedule,
    pub(super) remote_identity: Option<VerifyingKey>,
    pub(super) handshake: HandshakeState,
    pub(super) relay_tag: u32,
    pub(super) peer_test: bool,
    pub(super) sent_bytes: u64,
    pub(super) received_bytes: u64,
    pub(super) pending_relays: HashMap<u32, PendingRelay>,
    pub(super) connect_timer: SessionTimer,
    pub(super) termination_timer: SessionTimer,
    pub(super) keepalive_timer: SessionTimer,
    pub(super) data: Box<dyn DataChannel>,
}

/// One SSU session with a remote router.
pub struct SsuSession {
    me: Weak<SsuSession>,
    server: Arc<dyn SessionServer>,
    remote_endpoint: SocketAddr,
    creation_time: u32,
    state: AtomicU8,
    inner: Mutex<SessionInner>,
}

impl SsuSession {
    /// Create a session toward `remote_endpoint`.
    ///
    /// `remote_peer` is required for outbound handshakes and may be attached
    /// later with [`attach_remote_peer`](Self::attach_remote_peer). With
    /// `peer_test` set, a peer test starts as soon as the session is
    /// established.
    pub fn new(
        server: Arc<dyn SessionServer>,
        remote_endpoint: SocketAddr,
        remote_peer: Option<RemotePeer>,
        data: Box<dyn DataChannel>,
        peer_test: bool,
    ) -> Arc<Self> {
        let mut keys = KeySchedule::new(server.local_router().intro_key().clone());
        let mut remote_identity = None;
        if let Some(peer) = remote_peer {
            keys.set_remote_intro_key(peer.intro_key);
            remote_identity = peer.identity;
        }

        let inner = SessionInner {
            keys,
            remote_identity,
            handshake: HandshakeState::Idle,
            relay_tag: 0,
            peer_test,
            sent_bytes: 0,
            received_bytes: 0,
            pending_relays: HashMap::new(),
            connect_timer: SessionTimer::new(),
            termination_timer: SessionTimer::new(),
            keepalive_timer: SessionTimer::new(),
            data,
        };

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            server,
            remote_endpoint,
            creation_time: unix_time(),
            state: AtomicU8::new(SessionState::Unknown as u8),
            inner: Mutex::new(inner),
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn server(&self) -> &Arc<dyn SessionServer> {
        &self.server
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: SessionState) {
        let old = SessionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if old != state {
            tracing::debug!(
                target: LOG_TARGET,
                remote = %self.remote_endpoint,
                ?old,
                new = ?state,
                "state changed"
            );
        }
    }

    /// Remote endpoint this session is keyed by.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    /// Creation time, seconds since the Unix epoch.
    pub fn creation_time(&self) -> u32 {
        self.creation_time
    }

    /// Whether the remote endpoint is IPv6.
    pub fn is_v6(&self) -> bool {
        self.remote_endpoint.is_ipv6()
    }

    /// Relay tag issued by or to us during the handshake; zero if none.
    pub fn relay_tag(&self) -> u32 {
        self.lock().relay_tag
    }

    /// Bytes sent on this session, headers included.
    pub fn num_sent_bytes(&self) -> u64 {
        self.lock().sent_bytes
    }

    /// Bytes received on this session, counting every datagram long enough
    /// to hold a header, whether or not it authenticated.
    pub fn num_received_bytes(&self) -> u64 {
        self.lock().received_bytes
    }

    /// Remote identity, once known.
    pub fn remote_identity(&self) -> Option<VerifyingKey> {
        self.lock().remote_identity
    }

    /// Whether session keys are in use.
    pub fn has_session_keys(&self) -> bool {
        self.lock().keys.has_session_keys()
    }

    /// Attach the remote router's introduction key (and identity, if known).
    ///
    /// Ignored once session keys are installed.
    pub fn attach_remote_peer(&self, peer: RemotePeer) {
        let mut inner = self.lock();
        if inner.keys.has_session_keys() {
            return;
        }
        inner.keys.set_remote_intro_key(peer.intro_key);
        if peer.identity.is_some() {
            inner.remote_identity = peer.identity;
        }
    }

    /// Handle one inbound datagram from `sender`.
    ///
    /// Invalid packets are dropped without any response; the reason goes to
    /// [`SessionServer::on_packet_dropped`].
    pub fn process_next_message(&self, buf: &mut [u8], sender: SocketAddr) {
        let mut effects = Vec::new();
        let result = {
            let mut inner = self.lock();
            self.dispatch(&mut inner, buf, sender, &mut effects)
        };

        match result {
            Ok(()) => self.run(effects),
            Err(err) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    remote = %self.remote_endpoint,
                    %sender,
                    ?err,
                    "dropping packet"
                );
                self.server.on_packet_dropped(sender, &err);
            }
        }
    }

    fn dispatch(
        &self,
        inner: &mut SessionInner,
        buf: &mut [u8],
        sender: SocketAddr,
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if self.state().is_terminal() {
            return Err(ProtocolError::Terminated);
        }
        SessionPacket::new_checked(&*buf)?;
        let len = buf.len();
        inner.received_bytes += len as u64;

        let kind = inner.keys.open(buf)?;
        let mut packet = SessionPacket::new_checked(&*buf)?;
        packet.parse_header()?;
        let payload_type = packet.payload_type();
        let options = packet.extended_options()?;
        let body = packet.body();

        tracing::trace!(
            target: LOG_TARGET,
            remote = %self.remote_endpoint,
            ?payload_type,
            ?kind,
            len,
            "packet authenticated"
        );

        match payload_type {
            PayloadType::SessionRequest => self.on_session_request(inner, kind, options, body, fx),
            PayloadType::SessionCreated => self.on_session_created(inner, kind, body, fx),
            PayloadType::SessionConfirmed => self.on_session_confirmed(inner, kind, body, fx),
            PayloadType::RelayRequest => self.on_relay_request(inner, kind, body, sender, fx),
            PayloadType::RelayResponse => self.on_relay_response(inner, kind, body, fx),
            PayloadType::RelayIntro => self.on_relay_intro(kind, body, fx),
            PayloadType::Data => self.on_data(inner, kind, body, fx),
            PayloadType::PeerTest => self.on_peer_test(inner, kind, body, sender, fx),
            PayloadType::SessionDestroyed => self.on_session_destroyed(inner, kind, fx),
            PayloadType::Unknown(nibble) => Err(ProtocolError::UnknownPayloadType(nibble)),
        }?;

        if self.state() == SessionState::Established {
            self.arm_termination(inner);
        }
        if matches!(
            payload_type,
            PayloadType::RelayRequest | PayloadType::RelayResponse | PayloadType::PeerTest
        ) {
            self.close_if_disposable(inner, fx);
        }
        Ok(())
    }

    pub(super) fn unexpected(&self, payload_type: PayloadType) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            payload_type,
            state: self.state(),
        }
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Start the handshake as initiator.
    ///
    /// No-op when established, introduced or already handshaking. Must be
    /// called within a tokio runtime.
    pub fn connect(&self) -> Result<(), SessionError> {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            match self.state() {
                state @ (SessionState::Closed | SessionState::Failed) => {
                    return Err(SessionError::Terminated(state));
                }
                SessionState::Established | SessionState::Introduced => return Ok(()),
                SessionState::Unknown => {}
            }
            if !inner.handshake.is_idle() {
                return Ok(());
            }
            if inner.keys.remote_intro_key().is_none() {
                return Err(SessionError::NoRemotePeer);
            }

            let keypair = EphemeralKeypair::generate();
            let request = SessionRequestBody {
                x: keypair.public_bytes(),
                responder: Some(self.remote_endpoint),
            };
            let options = self
                .server
                .config()
                .request_relay_tag
                .then(relay_tag_request_option);

            if !self.send_packet(
                &mut inner,
                &mut fx,
                PayloadType::SessionRequest,
                options,
                &request.to_bytes(),
                Seal::RemoteIntro,
            ) {
                return Err(SessionError::NoRemotePeer);
            }
            inner.handshake = HandshakeState::AwaitingCreated { keypair };
            self.arm_connect(&mut inner);

            tracing::debug!(
                target: LOG_TARGET,
                remote = %self.remote_endpoint,
                "session request sent"
            );
        }
        self.run(fx);
        Ok(())
    }

    fn on_session_request(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        options: Option<&[u8]>,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        let state = self.state();
        if kind != KeyKind::LocalIntro
            || !matches!(state, SessionState::Unknown | SessionState::Introduced)
            || !inner.handshake.is_idle()
        {
            return Err(self.unexpected(PayloadType::SessionRequest));
        }
        let request = SessionRequestBody::from_bytes(body)?;

        let keypair = EphemeralKeypair::generate();
        let shared = keypair.diffie_hellman(&request.x)?;
        let keys = derive_session_keys(&shared)?;
        let seal_key = derive_handshake_key(&shared)?;

        let relay_tag = if wants_relay_tag(options) && self.server.config().introducer {
            random_nonzero()
        } else {
            0
        };

        let y = keypair.public_bytes();
        let prefix = signed_prefix(
            &request.x,
            &y,
            Some(&self.remote_endpoint),
            request.responder.as_ref(),
            relay_tag,
        );
        let router = self.server.local_router();
        let signed_on = unix_time();
        let signature = router.sign(&signed_data(&prefix, signed_on));
        let sealed_signature = seal_signature(seal_key.as_bytes(), &signature.to_bytes())?;

        let created = SessionCreatedBody {
            y,
            initiator: Some(self.remote_endpoint),
            relay_tag,
            signed_on,
            identity: router.identity().to_bytes(),
            sealed_signature,
        };

        inner.keys.set_pending(keys);
        inner.handshake = HandshakeState::AwaitingConfirmed {
            signed_prefix: prefix,
            relay_tag,
        };
        self.send_packet(
            inner,
            fx,
            PayloadType::SessionCreated,
            None,
            &created.to_bytes(),
            Seal::LocalIntro,
        );
        self.arm_connect(inner);

        tracing::debug!(
            target: LOG_TARGET,
            remote = %self.remote_endpoint,
            relay_tag,
            "session created sent"
        );
        Ok(())
    }

    fn on_session_created(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        let HandshakeState::AwaitingCreated { keypair } = &inner.handshake else {
            return Err(self.unexpected(PayloadType::SessionCreated));
        };
        if kind != KeyKind::RemoteIntro {
            return Err(self.unexpected(PayloadType::SessionCreated));
        }
        let created = SessionCreatedBody::from_bytes(body)?;

        let shared = keypair.diffie_hellman(&created.y)?;
        let keys = derive_session_keys(&shared)?;
        let seal_key = derive_handshake_key(&shared)?;
        let signature = open_signature(seal_key.as_bytes(), &created.sealed_signature)?;

        let identity = parse_identity(&created.identity)?;
        if inner.remote_identity.is_some_and(|expected| expected != identity) {
            return Err(CryptoError::IdentityMismatch.into());
        }

        let prefix = signed_prefix(
            &keypair.public_bytes(),
            &created.y,
            created.initiator.as_ref(),
            Some(&self.remote_endpoint),
            created.relay_tag,
        );
        verify_signature(&identity, &signed_data(&prefix, created.signed_on), &signature)?;

        let router = self.server.local_router();
        let signed_on = unix_time();
        let confirmed = SessionConfirmedBody {
            identity: router.identity().to_bytes(),
            signed_on,
            signature: router.sign(&signed_data(&prefix, signed_on)).to_bytes(),
        };

        inner.keys.install(keys);
        inner.handshake = HandshakeState::Done;
        inner.relay_tag = created.relay_tag;
        inner.remote_identity = Some(identity);
        self.send_packet(
            inner,
            fx,
            PayloadType::SessionConfirmed,
            None,
            &confirmed.to_bytes(),
            Seal::Session,
        );
        self.establish(inner, fx);
        Ok(())
    }

    fn on_session_confirmed(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        let HandshakeState::AwaitingConfirmed {
            signed_prefix,
            relay_tag,
        } = &inner.handshake
        else {
            return Err(self.unexpected(PayloadType::SessionConfirmed));
        };
        if kind != KeyKind::PendingHandshake {
            return Err(self.unexpected(PayloadType::SessionConfirmed));
        }
        let confirmed = SessionConfirmedBody::from_bytes(body)?;

        let identity = parse_identity(&confirmed.identity)?;
        if inner.remote_identity.is_some_and(|expected| expected != identity) {
            return Err(CryptoError::IdentityMismatch.into());
        }
        verify_signature(
            &identity,
            &signed_data(signed_prefix, confirmed.signed_on),
            &confirmed.signature,
        )?;
        let relay_tag = *relay_tag;

        inner.keys.install_pending()?;
        inner.handshake = HandshakeState::Done;
        inner.relay_tag = relay_tag;
        inner.remote_identity = Some(identity);
        self.establish(inner, fx);
        if relay_tag != 0 {
            fx.push(Effect::Notify(SessionEvent::RelayTagAssigned(relay_tag)));
        }
        Ok(())
    }

    fn establish(&self, inner: &mut SessionInner, fx: &mut Vec<Effect>) {
        self.set_state(SessionState::Established);
        inner.connect_timer.cancel();
        self.arm_termination(inner);
        inner.keepalive_timer.schedule(
            self.server.config().keepalive_interval,
            self.me.clone(),
            TimerKind::Keepalive,
        );
        fx.push(Effect::Notify(SessionEvent::Established));

        tracing::debug!(
            target: LOG_TARGET,
            remote = %self.remote_endpoint,
            relay_tag = inner.relay_tag,
            "session established"
        );

        if std::mem::take(&mut inner.peer_test) {
            if let Err(err) = self.start_peer_test(inner, fx) {
                tracing::warn!(
                    target: LOG_TARGET,
                    remote = %self.remote_endpoint,
                    ?err,
                    "peer test not started"
                );
            }
        }
    }

    // =========================================================================
    // Data and teardown
    // =========================================================================

    fn on_data(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if kind != KeyKind::Session || self.state() != SessionState::Established {
            return Err(self.unexpected(PayloadType::Data));
        }
        if body.is_empty() {
            tracing::trace!(
                target: LOG_TARGET,
                remote = %self.remote_endpoint,
                "keepalive received"
            );
            return Ok(());
        }
        for reply in inner.data.on_data(body) {
            self.send_packet(inner, fx, PayloadType::Data, None, &reply, Seal::Session);
        }
        Ok(())
    }

    fn on_session_destroyed(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if kind != KeyKind::Session || self.state() != SessionState::Established {
            return Err(self.unexpected(PayloadType::SessionDestroyed));
        }
        tracing::debug!(target: LOG_TARGET, remote = %self.remote_endpoint, "destroyed by remote");
        self.terminate(inner, fx, SessionState::Closed);
        Ok(())
    }

    fn require_established(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Established => Ok(()),
            state if state.is_terminal() => Err(SessionError::Terminated(state)),
            state => Err(SessionError::NotEstablished(state)),
        }
    }

    /// Hand upper-layer messages to the data channel and send its payloads.
    pub fn send_i2np_messages(&self, messages: Vec<Vec<u8>>) -> Result<(), SessionError> {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            self.require_established()?;
            for payload in inner.data.queue_messages(messages) {
                self.send_packet(
                    &mut inner,
                    &mut fx,
                    PayloadType::Data,
                    None,
                    &payload,
                    Seal::Session,
                );
            }
        }
        self.run(fx);
        Ok(())
    }

    /// Send whatever the data channel still holds.
    pub fn flush_data(&self) -> Result<(), SessionError> {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            self.require_established()?;
            for payload in inner.data.flush() {
                self.send_packet(
                    &mut inner,
                    &mut fx,
                    PayloadType::Data,
                    None,
                    &payload,
                    Seal::Session,
                );
            }
        }
        self.run(fx);
        Ok(())
    }

    /// Send an empty `Data` packet.
    pub fn send_keep_alive(&self) -> Result<(), SessionError> {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            self.require_established()?;
            self.send_packet(&mut inner, &mut fx, PayloadType::Data, None, &[], Seal::Session);
        }
        self.run(fx);
        Ok(())
    }

    /// Close the session, telling the remote side when established.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            let state = self.state();
            if state.is_terminal() {
                return;
            }
            if state == SessionState::Established {
                self.send_packet(
                    &mut inner,
                    &mut fx,
                    PayloadType::SessionDestroyed,
                    None,
                    &[],
                    Seal::Session,
                );
            }
            self.terminate(&mut inner, &mut fx, SessionState::Closed);
        }
        self.run(fx);
    }

    /// Enter Introduced and wait for the requester's handshake.
    pub fn wait_for_introduction(&self) {
        let mut inner = self.lock();
        if self.state() != SessionState::Unknown {
            return;
        }
        self.set_state(SessionState::Introduced);
        self.arm_connect(&mut inner);
    }

    /// Arm the connect timer for an inbound session awaiting a handshake.
    pub fn wait_for_connect(&self) {
        let mut inner = self.lock();
        if matches!(
            self.state(),
            SessionState::Unknown | SessionState::Introduced
        ) && !inner.connect_timer.is_armed()
        {
            self.arm_connect(&mut inner);
        }
    }

    pub(super) fn terminate(
        &self,
        inner: &mut SessionInner,
        fx: &mut Vec<Effect>,
        state: SessionState,
    ) {
        self.set_state(state);
        inner.connect_timer.cancel();
        inner.termination_timer.cancel();
        inner.keepalive_timer.cancel();
        inner.pending_relays.clear();
        fx.push(Effect::Notify(if state == SessionState::Failed {
            SessionEvent::Failed
        } else {
            SessionEvent::Closed
        }));
    }

    /// Close a session that only carried a pre-handshake relay or peer test
    /// exchange and has nothing left to wait for.
    fn close_if_disposable(&self, inner: &mut SessionInner, fx: &mut Vec<Effect>) {
        if self.state() == SessionState::Unknown
            && inner.handshake.is_idle()
            && inner.pending_relays.is_empty()
            && !inner.keys.has_pending()
        {
            tracing::trace!(
                target: LOG_TARGET,
                remote = %self.remote_endpoint,
                "closing disposable session"
            );
            self.terminate(inner, fx, SessionState::Closed);
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    pub(super) fn arm_connect(&self, inner: &mut SessionInner) {
        inner.connect_timer.schedule(
            self.server.config().connect_timeout,
            self.me.clone(),
            TimerKind::Connect,
        );
    }

    fn arm_termination(&self, inner: &mut SessionInner) {
        inner.termination_timer.schedule(
            self.server.config().termination_timeout,
            self.me.clone(),
            TimerKind::Termination,
        );
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Build, protect and queue a packet to the remote endpoint.
    ///
    /// Returns false (and logs) when no suitable key is available.
    pub(super) fn send_packet(
        &self,
        inner: &mut SessionInner,
        fx: &mut Vec<Effect>,
        payload_type: PayloadType,
        options: Option<Vec<u8>>,
        body: &[u8],
        seal: Seal<'_>,
    ) -> bool {
        let mut header = PacketHeader::new(payload_type, random_iv());
        if let Some(options) = options {
            header = match header.with_extended_options(options) {
                Ok(header) => header,
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        remote = %self.remote_endpoint,
                        ?payload_type,
                        ?err,
                        "cannot build header, not sending"
                    );
                    return false;
                }
            };
        }
        let mut datagram = header.to_packet(body);

        let sealed = match seal {
            Seal::Auto => inner.keys.seal(&mut datagram),
            Seal::RemoteIntro => inner.keys.seal_with_intro_key(&mut datagram),
            Seal::LocalIntro => inner.keys.seal_with_local_intro_key(&mut datagram),
            Seal::Session => inner.keys.seal_with_session_key(&mut datagram),
            Seal::Key(key) => seal_with_intro_key(key, &mut datagram),
        };
        if let Err(err) = sealed {
            tracing::warn!(
                target: LOG_TARGET,
                remote = %self.remote_endpoint,
                ?payload_type,
                ?err,
                "cannot protect packet, not sending"
            );
            return false;
        }

        tracing::trace!(
            target: LOG_TARGET,
            remote = %self.remote_endpoint,
            ?payload_type,
            len = datagram.len(),
            "sending packet"
        );
        inner.sent_bytes += datagram.len() as u64;
        fx.push(Effect::Send {
            to: self.remote_endpoint,
            datagram,
        });
        true
    }

    /// Queue a packet to a router this session does not belong to.
    pub(super) fn send_detached(
        &self,
        fx: &mut Vec<Effect>,
        to: SocketAddr,
        payload_type: PayloadType,
        body: &[u8],
        key: &IntroKey,
    ) {
        let mut datagram = PacketHeader::new(payload_type, random_iv()).to_packet(body);
        match seal_with_intro_key(key, &mut datagram) {
            Ok(()) => fx.push(Effect::Send { to, datagram }),
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    %to,
                    ?payload_type,
                    ?err,
                    "cannot protect packet, not sending"
                );
            }
        }
    }

    /// Send a body through this session if it is established.
    pub(super) fn send_payload(&self, payload_type: PayloadType, body: &[u8]) {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            if self.state() != SessionState::Established {
                tracing::debug!(
                    target: LOG_TARGET,
                    remote = %self.remote_endpoint,
                    ?payload_type,
                    "not established, dropping forwarded message"
                );
                return;
            }
            self.send_packet(&mut inner, &mut fx, payload_type, None, body, Seal::Session);
        }
        self.run(fx);
    }

    pub(super) fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, datagram } => self.server.send(to, datagram),
                Effect::Notify(event) => self.server.on_session_event(self.remote_endpoint, event),
                Effect::Forward {
                    session,
                    payload_type,
                    body,
                } => session.send_payload(payload_type, &body),
                Effect::Connect { endpoint, peer } => {
                    let session = self.server.get_or_create_session(endpoint, Some(peer.clone()));
                    session.attach_remote_peer(peer);
                    if let Err(err) = session.connect() {
                        tracing::debug!(
                            target: LOG_TARGET,
                            %endpoint,
                            ?err,
                            "cannot connect to introduced peer"
                        );
                    }
                }
                Effect::Introduce { endpoint, peer } => {
                    let session = self.server.get_or_create_session(endpoint, Some(peer.clone()));
                    session.attach_remote_peer(peer);
                    self.server.send(endpoint, Vec::new());
                    session.wait_for_introduction();
                    tracing::debug!(target: LOG_TARGET, %endpoint, "hole punch sent");
                }
                Effect::PeerTestResult(result) => self.server.on_peer_test_result(result),
            }
        }
    }
}

impl TimerTarget for SsuSession {
    fn handle_timer(&self, kind: TimerKind, generation: u64) {
        let mut fx = Vec::new();
        {
            let mut inner = self.lock();
            let state = self.state();
            if state.is_terminal() {
                return;
            }
            match kind {
                TimerKind::Connect => {
                    if !inner.connect_timer.is_current(generation) {
                        return;
                    }
                    if matches!(state, SessionState::Unknown | SessionState::Introduced) {
                        tracing::debug!(
                            target: LOG_TARGET,
                            remote = %self.remote_endpoint,
                            ?state,
                            "connect timed out"
                        );
                        self.terminate(&mut inner, &mut fx, SessionState::Failed);
                    }
                }
                TimerKind::Termination => {
                    if !inner.termination_timer.is_current(generation)
                        || state != SessionState::Established
                    {
                        return;
                    }
                    tracing::debug!(
                        target: LOG_TARGET,
                        remote = %self.remote_endpoint,
                        "no traffic, terminating"
                    );
                    self.send_packet(
                        &mut inner,
                        &mut fx,
                        PayloadType::SessionDestroyed,
                        None,
                        &[],
                        Seal::Session,
                    );
                    self.terminate(&mut inner, &mut fx, SessionState::Closed);
                }
                TimerKind::Keepalive => {
                    if !inner.keepalive_timer.is_current(generation)
                        || state != SessionState::Established
                    {
                        return;
                    }
                    self.send_packet(
                        &mut inner,
                        &mut fx,
                        PayloadType::Data,
                        None,
                        &[],
                        Seal::Session,
                    );
                    expire_relays(&mut inner, Instant::now());
                    inner.keepalive_timer.schedule(
                        self.server.config().keepalive_interval,
                        self.me.clone(),
                        TimerKind::Keepalive,
                    );
                }
            }
        }
        self.run(fx);
    }
}

impl fmt::Debug for SsuSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsuSession")
            .field("remote_endpoint", &self.remote_endpoint)
            .field("state", &self.state())
            .field("creation_time", &self.creation_time)
            .finish_non_exhaustive()
    }
}

/// Random nonzero value for relay tags and nonces.
pub(super) fn random_nonzero() -> u32 {
    loop {
        let value = OsRng.next_u32();
        if value != 0 {
            return value;
        }
    }
}
