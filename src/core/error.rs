//! Error types for SSU sessions.
//!
//! Inbound failures never produce a response on the wire: every
//! [`ProtocolError`] ends in a silent drop. Only [`SessionError`] is reported
//! back, and only to local callers.

use thiserror::Error;

use crate::session::SessionState;
use crate::transport::PayloadType;

/// Framing errors from the header codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram shorter than the header requires.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Reserved flag bits are set.
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlags(u8),

    /// Extended options run past the end of the datagram.
    #[error("extended options truncated: need {needed} bytes, have {available}")]
    TruncatedOptions {
        /// Header size including options.
        needed: usize,
        /// Datagram size.
        available: usize,
    },

    /// Extended options longer than their one-byte length prefix allows.
    #[error("extended options too long: {0} bytes, at most 255")]
    OptionsTooLong(usize),

    /// Body layout does not match its payload type.
    #[error("malformed {0} body")]
    Malformed(&'static str),
}

/// Errors in the key schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No candidate key authenticates the packet.
    #[error("MAC mismatch")]
    MacMismatch,

    /// Signature does not verify against the claimed identity.
    #[error("invalid signature")]
    InvalidSignature,

    /// Sealed handshake data failed to open.
    #[error("unseal failed")]
    UnsealFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Session keys are installed; introduction keys are no longer valid.
    #[error("introduction key retired")]
    IntroKeyRetired,

    /// Session keys have not been derived yet.
    #[error("no session keys")]
    NoSessionKeys,

    /// Remote introduction key is not known.
    #[error("no introduction key")]
    NoIntroKey,

    /// Remote identity key is not a valid Ed25519 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Remote identity differs from the one we expected.
    #[error("identity mismatch")]
    IdentityMismatch,
}

/// Why an inbound packet was dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Framing error.
    #[error("format error: {0}")]
    Format(#[from] PacketError),

    /// Authentication or key error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Message type is not valid in the current state or under this key.
    #[error("unexpected {payload_type:?} in state {state:?}")]
    UnexpectedMessage {
        /// Received payload type.
        payload_type: PayloadType,
        /// Session state when it arrived.
        state: SessionState,
    },

    /// Payload type nibble not assigned.
    #[error("unknown payload type {0}")]
    UnknownPayloadType(u8),

    /// No pending relay or peer-test record for this nonce.
    #[error("unknown nonce {0:#010x}")]
    UnknownNonce(u32),

    /// A pending record already exists for this nonce.
    #[error("duplicate nonce {0:#010x}")]
    DuplicateNonce(u32),

    /// No session registered under this relay tag.
    #[error("unknown relay tag {0:#010x}")]
    UnknownRelayTag(u32),

    /// No established session available to help with a peer test.
    #[error("no peer test helper available")]
    NoPeerTestHelper,

    /// Session already reached a terminal state.
    #[error("session is terminated")]
    Terminated,
}

impl ProtocolError {
    /// Check if this error should result in a silent drop.
    ///
    /// Always true: nothing is echoed to the peer for any inbound failure.
    pub fn is_silent_drop(&self) -> bool {
        true
    }

    /// Check if this is an authentication failure.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Crypto(
                CryptoError::MacMismatch
                    | CryptoError::InvalidSignature
                    | CryptoError::UnsealFailed
                    | CryptoError::IdentityMismatch
            )
        )
    }

    /// Check if the packet authenticated but could not be handled.
    ///
    /// These are the interesting ones for intrusion detection.
    pub fn is_post_authentication(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Crypto(CryptoError::MacMismatch)
                | ProtocolError::Format(PacketError::TooShort { .. })
        )
    }
}

/// Errors reported to local callers of session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is closed or failed.
    #[error("session terminated ({0:?})")]
    Terminated(SessionState),

    /// Operation requires an established session.
    #[error("session not established ({0:?})")]
    NotEstablished(SessionState),

    /// Outbound connect without the remote peer's introduction key.
    #[error("remote peer unknown")]
    NoRemotePeer,
}
