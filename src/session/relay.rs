//! Relayed introduction.
//!
//! ```text
//! Requester (A)          Introducer (B)           Target (C)
//!      |-- RelayRequest ------>|                       |
//!      |                       |-- RelayIntro -------->|   (established B-C)
//!      |<-- RelayResponse -----|                       |
//!      |<------------------------------ hole punch ----|
//!      |-- SessionRequest ------------------------------>|
//! ```
//!
//! B knows C by the relay tag it issued during the B-C handshake. C enters
//! Introduced and answers A's handshake like any inbound one.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::Instant;

use crate::core::{KEY_SIZE, PacketError, ProtocolError, SessionError};
use crate::crypto::{IntroKey, KeyKind};
use crate::server::RemotePeer;
use crate::transport::{BodyReader, PayloadType, endpoint_size, write_endpoint};

use super::session::{Effect, Seal, SessionInner, SessionState, SsuSession, random_nonzero};

const LOG_TARGET: &str = "ssu::relay";

/// An outstanding RelayRequest, held by the requester's session toward the
/// introducer.
#[derive(Debug)]
pub(crate) struct PendingRelay {
    /// Tag the request was sent for.
    pub relay_tag: u32,
    /// Who to connect to once the introducer answers.
    pub target: RemotePeer,
    /// Forget the request after this.
    pub expires: Instant,
}

/// `tag | requester address | requester intro key | nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayRequestBody {
    pub relay_tag: u32,
    pub requester: Option<SocketAddr>,
    pub intro_key: IntroKey,
    pub nonce: u32,
}

impl RelayRequestBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + endpoint_size(self.requester.as_ref()) + KEY_SIZE + 4);
        out.extend_from_slice(&self.relay_tag.to_be_bytes());
        write_endpoint(&mut out, self.requester.as_ref());
        out.extend_from_slice(self.intro_key.as_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "RelayRequest");
        let relay_tag = reader.read_u32()?;
        let requester = reader.read_endpoint()?;
        let intro_key = IntroKey::from_bytes(reader.read_array()?);
        let nonce = reader.read_u32()?;
        reader.finish()?;
        Ok(Self {
            relay_tag,
            requester,
            intro_key,
            nonce,
        })
    }
}

/// `target address | requester address | nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayResponseBody {
    pub target: Option<SocketAddr>,
    pub requester: Option<SocketAddr>,
    pub nonce: u32,
}

impl RelayResponseBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            endpoint_size(self.target.as_ref()) + endpoint_size(self.requester.as_ref()) + 4,
        );
        write_endpoint(&mut out, self.target.as_ref());
        write_endpoint(&mut out, self.requester.as_ref());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "RelayResponse");
        let target = reader.read_endpoint()?;
        let requester = reader.read_endpoint()?;
        let nonce = reader.read_u32()?;
        reader.finish()?;
        Ok(Self {
            target,
            requester,
            nonce,
        })
    }
}

/// `requester address | requester intro key | nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayIntroBody {
    pub requester: Option<SocketAddr>,
    pub intro_key: IntroKey,
    pub nonce: u32,
}

impl RelayIntroBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(endpoint_size(self.requester.as_ref()) + KEY_SIZE + 4);
        write_endpoint(&mut out, self.requester.as_ref());
        out.extend_from_slice(self.intro_key.as_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "RelayIntro");
        let requester = reader.read_endpoint()?;
        let intro_key = IntroKey::from_bytes(reader.read_array()?);
        let nonce = reader.read_u32()?;
        reader.finish()?;
        Ok(Self {
            requester,
            intro_key,
            nonce,
        })
    }
}

/// Forget requests whose introducer never answered.
pub(super) fn expire_relays(inner: &mut SessionInner, now: Instant) {
    inner.pending_relays.retain(|_, relay| relay.expires > now);
}

impl SsuSession {
    /// Ask the router at the other end of this session to introduce us to
    /// `target`, which it knows under `relay_tag`.
    ///
    /// Works before or after the handshake: unestablished sessions protect
    /// the request with `introducer_key`, and fail after the connect timeout
    /// if the introducer never answers. Returns the request nonce; once the
    /// introducer answers, a session toward the target is opened and
    /// connected.
    pub fn introduce(
        &self,
        relay_tag: u32,
        introducer_key: IntroKey,
        target: RemotePeer,
    ) -> Result<u32, SessionError> {
        let mut fx = Vec::new();
        let nonce = {
            let mut inner = self.lock();
            let state = self.state();
            if state.is_terminal() {
                return Err(SessionError::Terminated(state));
            }
            if !inner.keys.has_session_keys() && inner.keys.remote_intro_key().is_none() {
                inner.keys.set_remote_intro_key(introducer_key);
            }
            let nonce = self.send_relay_request(&mut inner, &mut fx, relay_tag, target)?;
            if !inner.keys.has_session_keys() {
                self.arm_connect(&mut inner);
            }
            nonce
        };
        self.run(fx);
        Ok(nonce)
    }

    fn send_relay_request(
        &self,
        inner: &mut SessionInner,
        fx: &mut Vec<Effect>,
        relay_tag: u32,
        target: RemotePeer,
    ) -> Result<u32, SessionError> {
        let now = Instant::now();
        expire_relays(inner, now);

        let nonce = loop {
            let nonce = random_nonzero();
            if !inner.pending_relays.contains_key(&nonce) {
                break nonce;
            }
        };
        let request = RelayRequestBody {
            relay_tag,
            requester: None,
            intro_key: inner.keys.local_intro_key().clone(),
            nonce,
        };
        if !self.send_packet(
            inner,
            fx,
            PayloadType::RelayRequest,
            None,
            &request.to_bytes(),
            Seal::Auto,
        ) {
            return Err(SessionError::NoRemotePeer);
        }

        inner.pending_relays.insert(
            nonce,
            PendingRelay {
                relay_tag,
                target,
                expires: now + self.server().config().connect_timeout,
            },
        );
        tracing::debug!(
            target: LOG_TARGET,
            introducer = %self.remote_endpoint(),
            relay_tag,
            nonce,
            "relay request sent"
        );
        Ok(nonce)
    }

    /// Introducer side.
    pub(super) fn on_relay_request(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        body: &[u8],
        sender: SocketAddr,
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if !matches!(kind, KeyKind::Session | KeyKind::LocalIntro) {
            return Err(self.unexpected(PayloadType::RelayRequest));
        }
        let request = RelayRequestBody::from_bytes(body)?;
        if !self.server().config().introducer {
            return Err(ProtocolError::UnknownRelayTag(request.relay_tag));
        }

        let target = self
            .server()
            .find_relay(request.relay_tag)
            .filter(|target| {
                !std::ptr::eq(Arc::as_ptr(target), self)
                    && target.state() == SessionState::Established
            })
            .ok_or(ProtocolError::UnknownRelayTag(request.relay_tag))?;

        let requester = request.requester.unwrap_or(sender);
        let intro = RelayIntroBody {
            requester: Some(requester),
            intro_key: request.intro_key.clone(),
            nonce: request.nonce,
        };
        let response = RelayResponseBody {
            target: Some(target.remote_endpoint()),
            requester: Some(requester),
            nonce: request.nonce,
        };

        tracing::debug!(
            target: LOG_TARGET,
            %requester,
            introduced = %target.remote_endpoint(),
            relay_tag = request.relay_tag,
            nonce = request.nonce,
            "introducing"
        );

        fx.push(Effect::Forward {
            session: target,
            payload_type: PayloadType::RelayIntro,
            body: intro.to_bytes(),
        });
        let seal = if inner.keys.has_session_keys() {
            Seal::Session
        } else {
            Seal::Key(&request.intro_key)
        };
        self.send_packet(
            inner,
            fx,
            PayloadType::RelayResponse,
            None,
            &response.to_bytes(),
            seal,
        );
        Ok(())
    }

    /// Requester side.
    pub(super) fn on_relay_response(
        &self,
        inner: &mut SessionInner,
        kind: KeyKind,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if !matches!(kind, KeyKind::Session | KeyKind::LocalIntro) {
            return Err(self.unexpected(PayloadType::RelayResponse));
        }
        let response = RelayResponseBody::from_bytes(body)?;

        let now = Instant::now();
        if !inner
            .pending_relays
            .get(&response.nonce)
            .is_some_and(|relay| relay.expires > now)
        {
            return Err(ProtocolError::UnknownNonce(response.nonce));
        }
        let endpoint = response
            .target
            .ok_or(PacketError::Malformed("RelayResponse"))?;
        let relay = inner
            .pending_relays
            .remove(&response.nonce)
            .ok_or(ProtocolError::UnknownNonce(response.nonce))?;

        tracing::debug!(
            target: LOG_TARGET,
            introduced = %endpoint,
            relay_tag = relay.relay_tag,
            nonce = response.nonce,
            "introduced, connecting"
        );
        fx.push(Effect::Connect {
            endpoint,
            peer: relay.target,
        });
        Ok(())
    }

    /// Target side.
    pub(super) fn on_relay_intro(
        &self,
        kind: KeyKind,
        body: &[u8],
        fx: &mut Vec<Effect>,
    ) -> Result<(), ProtocolError> {
        if kind != KeyKind::Session || self.state() != SessionState::Established {
            return Err(self.unexpected(PayloadType::RelayIntro));
        }
        let intro = RelayIntroBody::from_bytes(body)?;
        let endpoint = intro.requester.ok_or(PacketError::Malformed("RelayIntro"))?;

        tracing::debug!(
            target: LOG_TARGET,
            introducer = %self.remote_endpoint(),
            requester = %endpoint,
            nonce = intro.nonce,
            "relay intro received"
        );
        fx.push(Effect::Introduce {
            endpoint,
            peer: RemotePeer::from_intro_key(intro.intro_key),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::SessionEvent;
    use crate::testing::TestNetwork;
    use std::time::Duration;

    #[test]
    fn test_relay_request_layout() {
        let body = RelayRequestBody {
            relay_tag: 7,
            requester: None,
            intro_key: IntroKey::from_bytes([0x11; KEY_SIZE]),
            nonce: 0x0102_0304,
        };
        let bytes = body.to_bytes();
        assert_eq!(bytes.len(), 4 + 3 + KEY_SIZE + 4);
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[bytes.len() - 4..], &[1, 2, 3, 4]);
        assert_eq!(RelayRequestBody::from_bytes(&bytes).unwrap(), body);
    }

    #[test]
    fn test_relay_bodies_reject_truncation() {
        let response = RelayResponseBody {
            target: Some("198.51.100.4:9000".parse().unwrap()),
            requester: None,
            nonce: 5,
        };
        let bytes = response.to_bytes();
        assert_eq!(RelayResponseBody::from_bytes(&bytes).unwrap(), response);
        assert_eq!(
            RelayResponseBody::from_bytes(&bytes[..bytes.len() - 1]),
            Err(PacketError::Malformed("RelayResponse"))
        );

        let intro = RelayIntroBody {
            requester: Some("[2001:db8::2]:1".parse().unwrap()),
            intro_key: IntroKey::from_bytes([3; KEY_SIZE]),
            nonce: 9,
        };
        let bytes = intro.to_bytes();
        assert_eq!(RelayIntroBody::from_bytes(&bytes).unwrap(), intro);
        assert!(RelayIntroBody::from_bytes(&bytes[..10]).is_err());
    }

    /// A (requester), B (introducer), C (target). C holds a relay tag from B.
    async fn relay_setup() -> (
        Arc<TestNetwork>,
        Arc<crate::testing::TestRouter>,
        Arc<crate::testing::TestRouter>,
        Arc<crate::testing::TestRouter>,
        u32,
    ) {
        let network = TestNetwork::new();
        let alice = network.add_router(1);
        let bob = network.add_router(2);
        let charlie = network.add_router_with(
            3,
            crate::server::SessionConfig::builder()
                .request_relay_tag(true)
                .build(),
        );

        let c_to_b = charlie.open_session(&bob, false);
        c_to_b.connect().unwrap();
        network.deliver_all();
        assert_eq!(c_to_b.state(), SessionState::Established);

        let tag = c_to_b.relay_tag();
        assert_ne!(tag, 0);
        assert!(bob.find_relay_session(tag).is_some());
        (network, alice, bob, charlie, tag)
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_round_trip() {
        let (network, alice, bob, charlie, tag) = relay_setup().await;

        let a_to_b = alice.session_without_handshake(&bob);
        let nonce = a_to_b
            .introduce(tag, bob.intro_key().clone(), charlie.remote_peer())
            .unwrap();
        assert_ne!(nonce, 0);
        network.clear_log();

        // RelayRequest reaches Bob: RelayIntro to Charlie, RelayResponse to Alice.
        network.deliver_one();
        assert!(network.datagram_sent(bob.endpoint(), charlie.endpoint()));
        assert!(network.datagram_sent(bob.endpoint(), alice.endpoint()));

        // Deliver RelayIntro and RelayResponse.
        network.deliver_one();
        network.deliver_one();

        let c_to_a = charlie.session(alice.endpoint()).unwrap();
        assert_eq!(c_to_a.state(), SessionState::Introduced);
        assert!(network.hole_punch_sent(charlie.endpoint(), alice.endpoint()));

        let request = network
            .last_datagram(alice.endpoint(), charlie.endpoint())
            .unwrap();
        assert_eq!(
            charlie.peek_payload_type(&request),
            Some(PayloadType::SessionRequest)
        );

        network.deliver_all();
        let a_to_c = alice.session(charlie.endpoint()).unwrap();
        assert_eq!(a_to_c.state(), SessionState::Established);
        assert_eq!(c_to_a.state(), SessionState::Established);
        // The pre-handshake session toward Bob served its purpose.
        assert_eq!(a_to_b.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_relay_tag_dropped() {
        let (network, alice, bob, charlie, tag) = relay_setup().await;

        let a_to_b = alice.session_without_handshake(&bob);
        a_to_b
            .introduce(tag.wrapping_add(1), bob.intro_key().clone(), charlie.remote_peer())
            .unwrap();
        network.clear_log();
        network.deliver_all();

        assert!(matches!(
            bob.dropped().last(),
            Some((_, ProtocolError::UnknownRelayTag(_)))
        ));
        assert!(!network.datagram_sent(bob.endpoint(), charlie.endpoint()));
        assert!(!network.datagram_sent(bob.endpoint(), alice.endpoint()));
        assert!(charlie.session(alice.endpoint()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_nonce_dropped() {
        let (network, alice, bob, charlie, tag) = relay_setup().await;

        let a_to_b = alice.session_without_handshake(&bob);
        let nonce = a_to_b
            .introduce(tag, bob.intro_key().clone(), charlie.remote_peer())
            .unwrap();
        network.drop_pending();

        // Forged response under Alice's intro key with a different nonce.
        let forged = RelayResponseBody {
            target: Some(charlie.endpoint()),
            requester: Some(alice.endpoint()),
            nonce: nonce.wrapping_add(1),
        };
        let datagram = alice.seal_for_self(PayloadType::RelayResponse, &forged.to_bytes());
        alice.receive(bob.endpoint(), datagram);

        assert_eq!(
            alice.dropped().last().map(|(_, err)| err.clone()),
            Some(ProtocolError::UnknownNonce(nonce.wrapping_add(1)))
        );
        assert!(a_to_b.lock().pending_relays.contains_key(&nonce));
        assert!(alice.session(charlie.endpoint()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_relay_dropped() {
        let (network, alice, bob, charlie, tag) = relay_setup().await;

        let a_to_b = alice.session_without_handshake(&bob);
        let nonce = a_to_b
            .introduce(tag, bob.intro_key().clone(), charlie.remote_peer())
            .unwrap();
        network.drop_pending();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let response = RelayResponseBody {
            target: Some(charlie.endpoint()),
            requester: Some(alice.endpoint()),
            nonce,
        };
        let datagram = alice.seal_for_self(PayloadType::RelayResponse, &response.to_bytes());
        alice.receive(bob.endpoint(), datagram);
        assert!(alice.session(charlie.endpoint()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_introduce_times_out() {
        let (network, alice, bob, charlie, tag) = relay_setup().await;

        let a_to_b = alice.session_without_handshake(&bob);
        a_to_b
            .introduce(tag, bob.intro_key().clone(), charlie.remote_peer())
            .unwrap();
        network.drop_pending();
        assert_eq!(a_to_b.lock().pending_relays.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(a_to_b.state(), SessionState::Failed);
        assert!(a_to_b.lock().pending_relays.is_empty());
        assert!(alice.session(bob.endpoint()).is_none());
        assert!(
            alice
                .events()
                .contains(&(bob.endpoint(), SessionEvent::Failed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_intro_requires_established() {
        let network = TestNetwork::new();
        let alice = network.add_router(1);
        let charlie = network.add_router(3);

        let intro = RelayIntroBody {
            requester: Some(alice.endpoint()),
            intro_key: alice.intro_key().clone(),
            nonce: 1,
        };
        let datagram = charlie.seal_for_self(PayloadType::RelayIntro, &intro.to_bytes());
        charlie.receive("127.0.0.1:9".parse().unwrap(), datagram);

        assert!(matches!(
            charlie.dropped().last(),
            Some((_, ProtocolError::UnexpectedMessage { .. }))
        ));
        assert!(charlie.session(alice.endpoint()).is_none());
        assert!(!network.hole_punch_sent(charlie.endpoint(), alice.endpoint()));
    }
}
