//! Packet protection.
//!
//! Encrypt-then-MAC over the region following the IV:
//!
//! - encryption: XChaCha20, nonce = `IV || 0^8`
//! - MAC: keyed BLAKE2s-128 over `encrypted || IV || len_be16(encrypted)`
//!
//! The MAC is always checked, in constant time, before anything is
//! decrypted.

use blake2::Blake2sMac;
use blake2::digest::Mac;
use blake2::digest::consts::U16;
use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::{RngCore, rngs::OsRng};

use crate::core::{
    CryptoError, FLAG_OFFSET, IV_SIZE, KEY_SIZE, MAC_SIZE, PacketError, SEAL_TAG_SIZE,
    SIGNATURE_SIZE, SSU_HEADER_SIZE_MIN,
};

/// Size of a sealed signature.
pub const SEALED_SIGNATURE_SIZE: usize = SIGNATURE_SIZE + SEAL_TAG_SIZE;

/// Fresh random IV.
pub fn random_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn xnonce(iv: &[u8]) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..IV_SIZE].copy_from_slice(iv);
    nonce
}

fn packet_mac(mac_key: &[u8; KEY_SIZE], buf: &[u8]) -> Blake2sMac<U16> {
    let encrypted = &buf[FLAG_OFFSET..];
    let iv = &buf[MAC_SIZE..FLAG_OFFSET];

    let mut mac = <Blake2sMac<U16> as Mac>::new(mac_key.into());
    mac.update(encrypted);
    mac.update(iv);
    mac.update(&(encrypted.len() as u16).to_be_bytes());
    mac
}

fn check_len(buf: &[u8]) -> Result<(), PacketError> {
    if buf.len() < SSU_HEADER_SIZE_MIN {
        return Err(PacketError::TooShort {
            expected: SSU_HEADER_SIZE_MIN,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Encrypt the region after the IV and write the MAC.
///
/// `buf` holds a complete plaintext packet with its IV already set.
pub fn seal_packet(
    enc_key: &[u8; KEY_SIZE],
    mac_key: &[u8; KEY_SIZE],
    buf: &mut [u8],
) -> Result<(), PacketError> {
    check_len(buf)?;

    let nonce = xnonce(&buf[MAC_SIZE..FLAG_OFFSET]);
    let mut cipher = XChaCha20::new(enc_key.into(), (&nonce).into());
    cipher.apply_keystream(&mut buf[FLAG_OFFSET..]);

    let tag = packet_mac(mac_key, buf).finalize().into_bytes();
    buf[..MAC_SIZE].copy_from_slice(&tag);
    Ok(())
}

/// Check the MAC without touching the buffer.
pub fn verify_packet(mac_key: &[u8; KEY_SIZE], buf: &[u8]) -> Result<(), CryptoError> {
    if buf.len() < SSU_HEADER_SIZE_MIN {
        return Err(CryptoError::MacMismatch);
    }
    packet_mac(mac_key, buf)
        .verify_slice(&buf[..MAC_SIZE])
        .map_err(|_| CryptoError::MacMismatch)
}

/// Decrypt the region after the IV in place. The MAC must already be verified.
pub fn decrypt_packet(enc_key: &[u8; KEY_SIZE], buf: &mut [u8]) {
    if buf.len() < SSU_HEADER_SIZE_MIN {
        return;
    }
    let nonce = xnonce(&buf[MAC_SIZE..FLAG_OFFSET]);
    let mut cipher = XChaCha20::new(enc_key.into(), (&nonce).into());
    cipher.apply_keystream(&mut buf[FLAG_OFFSET..]);
}

/// Verify then decrypt. On failure the buffer is left untouched.
pub fn open_packet(
    enc_key: &[u8; KEY_SIZE],
    mac_key: &[u8; KEY_SIZE],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    verify_packet(mac_key, buf)?;
    decrypt_packet(enc_key, buf);
    Ok(())
}

/// Seal a signature under a single-use handshake key.
pub fn seal_signature(
    key: &[u8; KEY_SIZE],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<[u8; SEALED_SIGNATURE_SIZE], CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let sealed = cipher
        .encrypt(&XNonce::default(), signature.as_slice())
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut out = [0u8; SEALED_SIGNATURE_SIZE];
    out.copy_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed signature.
pub fn open_signature(
    key: &[u8; KEY_SIZE],
    sealed: &[u8; SEALED_SIGNATURE_SIZE],
) -> Result<[u8; SIGNATURE_SIZE], CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let plain = cipher
        .decrypt(&XNonce::default(), sealed.as_slice())
        .map_err(|_| CryptoError::UnsealFailed)?;

    let mut out = [0u8; SIGNATURE_SIZE];
    out.copy_from_slice(&plain);
    Ok(out)
}
