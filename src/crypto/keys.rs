//! Key material and derivation.
//!
//! Every secret here is zeroized on drop. Introduction keys are published
//! with router metadata, but they are still wiped so a dropped session leaves
//! nothing behind.

use std::fmt;

use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::core::{CryptoError, DH_PUBLIC_SIZE, KEY_SIZE};

/// HKDF info for the packet encryption and MAC keys.
const SESSION_KEYS_INFO: &[u8] = b"ssu v1 session keys";

/// HKDF info for the key sealing the responder signature.
const HANDSHAKE_KEY_INFO: &[u8] = b"ssu v1 handshake seal";

macro_rules! secret_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            /// Wrap raw key bytes.
            pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
                Self(key)
            }

            /// Get the raw key bytes.
            ///
            /// # Security
            /// Handle with care - this exposes sensitive key material.
            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
}

secret_key! {
    /// A router's introduction key.
    ///
    /// Authenticates and encrypts every packet exchanged before session keys
    /// exist. Used for both encryption and MAC.
    IntroKey
}

secret_key! {
    /// Packet encryption key derived from the key exchange.
    SessionKey
}

secret_key! {
    /// Packet MAC key derived from the key exchange.
    MacKey
}

impl IntroKey {
    /// Generate a random introduction key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }
}

/// Encryption and MAC keys for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Encrypts the packet region after the IV.
    pub session_key: SessionKey,
    /// Authenticates the encrypted region.
    pub mac_key: MacKey,
}

/// Derive the session encryption and MAC keys from an X25519 shared secret.
///
/// Deterministic: both sides of one exchange get the same keys.
pub fn derive_session_keys(shared_secret: &[u8; KEY_SIZE]) -> Result<SessionKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key_material = Zeroizing::new([0u8; 2 * KEY_SIZE]);
    hk.expand(SESSION_KEYS_INFO, &mut *key_material)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut session_key = [0u8; KEY_SIZE];
    let mut mac_key = [0u8; KEY_SIZE];
    session_key.copy_from_slice(&key_material[..KEY_SIZE]);
    mac_key.copy_from_slice(&key_material[KEY_SIZE..]);

    Ok(SessionKeys {
        session_key: SessionKey::from_bytes(session_key),
        mac_key: MacKey::from_bytes(mac_key),
    })
}

/// Derive the key that seals the responder's signature in `SessionCreated`.
pub fn derive_handshake_key(shared_secret: &[u8; KEY_SIZE]) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; KEY_SIZE];
    hk.expand(HANDSHAKE_KEY_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SessionKey::from_bytes(key))
}

/// Ephemeral X25519 keypair for one handshake.
///
/// The secret is reusable so a failed validation does not force a new
/// exchange.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public value sent on the wire.
    pub fn public_bytes(&self) -> [u8; DH_PUBLIC_SIZE] {
        self.public.to_bytes()
    }

    /// Compute the shared secret with the peer's public value.
    ///
    /// Rejects low-order points that would yield an all-zero secret.
    pub fn diffie_hellman(
        &self,
        remote_public: &[u8; DH_PUBLIC_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intro_key_generation() {
        let k1 = IntroKey::generate();
        let k2 = IntroKey::generate();
        assert_ne!(k1, k2);
        assert_eq!(format!("{k1:?}"), "IntroKey(..)");
    }

    #[test]
    fn test_shared_secret_agreement() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let s1 = alice.diffie_hellman(&bob.public_bytes()).unwrap();
        let s2 = bob.diffie_hellman(&alice.public_bytes()).unwrap();
        assert_eq!(*s1, *s2);

        let k1 = derive_session_keys(&s1).unwrap();
        let k2 = derive_session_keys(&s2).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1.session_key.as_bytes(), k1.mac_key.as_bytes());
    }

    #[test]
    fn test_handshake_key_differs() {
        let shared = [7u8; KEY_SIZE];
        let keys = derive_session_keys(&shared).unwrap();
        let seal = derive_handshake_key(&shared).unwrap();
        assert_ne!(seal.as_bytes(), keys.session_key.as_bytes());
        assert_ne!(seal.as_bytes(), keys.mac_key.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let kp = EphemeralKeypair::generate();
        assert_eq!(
            kp.diffie_hellman(&[0u8; DH_PUBLIC_SIZE]),
            Err(CryptoError::InvalidPublicKey)
        );
    }
}
