//! Session configuration and router identities.

use std::time::Duration;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::core::{
    CryptoError, IDENTITY_SIZE, SSU_CONNECT_TIMEOUT, SSU_KEEPALIVE_INTERVAL,
    SSU_PEER_TEST_TIMEOUT, SSU_TERMINATION_TIMEOUT,
};
use crate::crypto::IntroKey;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake and introduction deadline.
    pub connect_timeout: Duration,

    /// Close an established session after this long without inbound traffic.
    pub termination_timeout: Duration,

    /// Keepalive period while established.
    pub keepalive_interval: Duration,

    /// Lifetime of a pending peer test.
    pub peer_test_timeout: Duration,

    /// Hand out relay tags to peers that ask.
    pub introducer: bool,

    /// Ask the responder for a relay tag on outbound handshakes.
    pub request_relay_tag: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: SSU_CONNECT_TIMEOUT,
            termination_timeout: SSU_TERMINATION_TIMEOUT,
            keepalive_interval: SSU_KEEPALIVE_INTERVAL,
            peer_test_timeout: SSU_PEER_TEST_TIMEOUT,
            introducer: true,
            request_relay_tag: false,
        }
    }
}

impl SessionConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the termination timeout.
    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.config.termination_timeout = timeout;
        self
    }

    /// Set the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the peer test timeout.
    pub fn peer_test_timeout(mut self, timeout: Duration) -> Self {
        self.config.peer_test_timeout = timeout;
        self
    }

    /// Act as an introducer.
    pub fn introducer(mut self, enabled: bool) -> Self {
        self.config.introducer = enabled;
        self
    }

    /// Request relay tags on outbound handshakes.
    pub fn request_relay_tag(mut self, enabled: bool) -> Self {
        self.config.request_relay_tag = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Our own router: signing identity and introduction key.
#[derive(Debug, Clone)]
pub struct LocalRouter {
    signing_key: SigningKey,
    intro_key: IntroKey,
}

impl LocalRouter {
    /// Generate a fresh identity and introduction key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            intro_key: IntroKey::generate(),
        }
    }

    /// Use existing keys.
    pub fn new(signing_key: SigningKey, intro_key: IntroKey) -> Self {
        Self {
            signing_key,
            intro_key,
        }
    }

    /// Our introduction key.
    pub fn intro_key(&self) -> &IntroKey {
        &self.intro_key
    }

    /// Our public identity.
    pub fn identity(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign handshake data.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    /// What a remote router needs to reach us.
    pub fn to_remote_peer(&self) -> RemotePeer {
        RemotePeer {
            intro_key: self.intro_key.clone(),
            identity: Some(self.identity()),
        }
    }
}

/// What we know about a remote router before talking to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    /// Its introduction key.
    pub intro_key: IntroKey,
    /// Its identity, when known from router metadata.
    pub identity: Option<VerifyingKey>,
}

impl RemotePeer {
    /// Peer known only by introduction key.
    pub fn from_intro_key(intro_key: IntroKey) -> Self {
        Self {
            intro_key,
            identity: None,
        }
    }
}

/// Parse a wire identity.
pub(crate) fn parse_identity(bytes: &[u8; IDENTITY_SIZE]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Verify a signature by `identity` over `data`.
pub(crate) fn verify_signature(
    identity: &VerifyingKey,
    data: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    identity
        .verify(data, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.termination_timeout, Duration::from_secs(330));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert!(config.introducer);
        assert!(!config.request_relay_tag);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::builder()
            .connect_timeout(Duration::from_secs(1))
            .introducer(false)
            .request_relay_tag(true)
            .build();
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert!(!config.introducer);
        assert!(config.request_relay_tag);
        assert_eq!(config.peer_test_timeout, SSU_PEER_TEST_TIMEOUT);
    }

    #[test]
    fn test_sign_verify() {
        let router = LocalRouter::generate();
        let sig = router.sign(b"handshake");
        let identity = parse_identity(&router.identity().to_bytes()).unwrap();

        verify_signature(&identity, b"handshake", &sig.to_bytes()).unwrap();
        assert_eq!(
            verify_signature(&identity, b"handshakE", &sig.to_bytes()),
            Err(CryptoError::InvalidSignature)
        );

        let other = LocalRouter::generate();
        assert_eq!(
            verify_signature(&other.identity(), b"handshake", &sig.to_bytes()),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_remote_peer() {
        let router = LocalRouter::generate();
        let peer = router.to_remote_peer();
        assert_eq!(&peer.intro_key, router.intro_key());
        assert_eq!(peer.identity, Some(router.identity()));
    }
}
