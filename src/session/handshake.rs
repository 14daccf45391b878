//! Handshake message bodies and state.
//!
//! ```text
//! Initiator                                   Responder
//!     |-- SessionRequest   X | bob addr ------------->|   (responder intro key)
//!     |<- SessionCreated   Y | alice addr | tag |     |   (responder intro key)
//!     |                    signed_on | identity |     |
//!     |                    seal(sig) ----------------|
//!     |-- SessionConfirmed identity | signed_on |     |   (session keys)
//!     |                    sig ---------------------->|
//! ```
//!
//! Both signatures cover `X | Y | alice addr | bob addr | tag | signed_on`,
//! each side with its own `signed_on`.

use std::net::SocketAddr;

use crate::core::{
    DH_PUBLIC_SIZE, EXT_OPT_REQUEST_RELAY_TAG, IDENTITY_SIZE, PacketError, SIGNATURE_SIZE,
};
use crate::crypto::EphemeralKeypair;
use crate::crypto::cipher::SEALED_SIGNATURE_SIZE;
use crate::transport::{BodyReader, endpoint_size, write_endpoint};

/// Where this session is in the three-message exchange.
#[derive(Debug, Default)]
pub(crate) enum HandshakeState {
    /// Nothing sent or received.
    #[default]
    Idle,
    /// Initiator: SessionRequest sent.
    AwaitingCreated {
        /// Our ephemeral keypair; kept so a bad SessionCreated can be ignored.
        keypair: EphemeralKeypair,
    },
    /// Responder: SessionCreated sent, pending keys held by the key schedule.
    AwaitingConfirmed {
        /// `X | Y | alice addr | bob addr | tag`.
        signed_prefix: Vec<u8>,
        /// Relay tag we issued, zero if none.
        relay_tag: u32,
    },
    /// Keys installed.
    Done,
}

impl HandshakeState {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Build the signed prefix shared by both signatures.
pub(crate) fn signed_prefix(
    x: &[u8; DH_PUBLIC_SIZE],
    y: &[u8; DH_PUBLIC_SIZE],
    alice: Option<&SocketAddr>,
    bob: Option<&SocketAddr>,
    relay_tag: u32,
) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(2 * DH_PUBLIC_SIZE + endpoint_size(alice) + endpoint_size(bob) + 4);
    out.extend_from_slice(x);
    out.extend_from_slice(y);
    write_endpoint(&mut out, alice);
    write_endpoint(&mut out, bob);
    out.extend_from_slice(&relay_tag.to_be_bytes());
    out
}

/// Append the signer's timestamp to a signed prefix.
pub(crate) fn signed_data(prefix: &[u8], signed_on: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 4);
    out.extend_from_slice(prefix);
    out.extend_from_slice(&signed_on.to_be_bytes());
    out
}

/// Extended options asking the responder for a relay tag.
pub(crate) fn relay_tag_request_option() -> Vec<u8> {
    EXT_OPT_REQUEST_RELAY_TAG.to_be_bytes().to_vec()
}

/// Whether extended options carry the relay tag request bit.
pub(crate) fn wants_relay_tag(options: Option<&[u8]>) -> bool {
    match options {
        Some([hi, lo, ..]) => u16::from_be_bytes([*hi, *lo]) & EXT_OPT_REQUEST_RELAY_TAG != 0,
        _ => false,
    }
}

/// `X | responder address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionRequestBody {
    pub x: [u8; DH_PUBLIC_SIZE],
    pub responder: Option<SocketAddr>,
}

impl SessionRequestBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DH_PUBLIC_SIZE + endpoint_size(self.responder.as_ref()));
        out.extend_from_slice(&self.x);
        write_endpoint(&mut out, self.responder.as_ref());
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "SessionRequest");
        let x = reader.read_array()?;
        let responder = reader.read_endpoint()?;
        reader.finish()?;
        Ok(Self { x, responder })
    }
}

/// `Y | initiator address | relay tag | signed_on | identity | sealed signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionCreatedBody {
    pub y: [u8; DH_PUBLIC_SIZE],
    pub initiator: Option<SocketAddr>,
    pub relay_tag: u32,
    pub signed_on: u32,
    pub identity: [u8; IDENTITY_SIZE],
    pub sealed_signature: [u8; SEALED_SIGNATURE_SIZE],
}

impl SessionCreatedBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            DH_PUBLIC_SIZE
                + endpoint_size(self.initiator.as_ref())
                + 8
                + IDENTITY_SIZE
                + SEALED_SIGNATURE_SIZE,
        );
        out.extend_from_slice(&self.y);
        write_endpoint(&mut out, self.initiator.as_ref());
        out.extend_from_slice(&self.relay_tag.to_be_bytes());
        out.extend_from_slice(&self.signed_on.to_be_bytes());
        out.extend_from_slice(&self.identity);
        out.extend_from_slice(&self.sealed_signature);
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "SessionCreated");
        let y = reader.read_array()?;
        let initiator = reader.read_endpoint()?;
        let relay_tag = reader.read_u32()?;
        let signed_on = reader.read_u32()?;
        let identity = reader.read_array()?;
        let sealed_signature = reader.read_array()?;
        reader.finish()?;
        Ok(Self {
            y,
            initiator,
            relay_tag,
            signed_on,
            identity,
            sealed_signature,
        })
    }
}

/// `identity | signed_on | signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionConfirmedBody {
    pub identity: [u8; IDENTITY_SIZE],
    pub signed_on: u32,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl SessionConfirmedBody {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IDENTITY_SIZE + 4 + SIGNATURE_SIZE);
        out.extend_from_slice(&self.identity);
        out.extend_from_slice(&self.signed_on.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub(crate) fn from_bytes(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BodyReader::new(body, "SessionConfirmed");
        let identity = reader.read_array()?;
        let signed_on = reader.read_u32()?;
        let signature = reader.read_array()?;
        reader.finish()?;
        Ok(Self {
            identity,
            signed_on,
            signature,
        })
    }
}
