//! Per-session key schedule.
//!
//! Tracks which keys may protect packets for one session:
//!
//! ```text
//! before handshake:   remote intro key (outbound), own intro key (inbound)
//! responder, pending: + pending session keys from SessionRequest
//! installed:          session keys only; intro keys retired
//! ```

use super::cipher::{decrypt_packet, open_packet, seal_packet, verify_packet};
use super::keys::{IntroKey, SessionKeys};
use crate::core::CryptoError;

/// Which key authenticated an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Installed session keys.
    Session,
    /// Session keys derived on SessionRequest, not yet installed.
    PendingHandshake,
    /// The remote router's introduction key.
    RemoteIntro,
    /// Our own introduction key.
    LocalIntro,
}

/// Keys for one session.
#[derive(Debug)]
pub struct KeySchedule {
    local_intro: IntroKey,
    remote_intro: Option<IntroKey>,
    pending: Option<SessionKeys>,
    installed: Option<SessionKeys>,
}

impl KeySchedule {
    /// Start with only our own introduction key.
    pub fn new(local_intro: IntroKey) -> Self {
        Self {
            local_intro,
            remote_intro: None,
            pending: None,
            installed: None,
        }
    }

    /// Learn the remote router's introduction key.
    pub fn set_remote_intro_key(&mut self, key: IntroKey) {
        self.remote_intro = Some(key);
    }

    /// The remote introduction key, if known.
    pub fn remote_intro_key(&self) -> Option<&IntroKey> {
        self.remote_intro.as_ref()
    }

    /// Our own introduction key.
    pub fn local_intro_key(&self) -> &IntroKey {
        &self.local_intro
    }

    /// Hold keys derived on SessionRequest until SessionConfirmed arrives.
    pub fn set_pending(&mut self, keys: SessionKeys) {
        self.pending = Some(keys);
    }

    /// Whether pending keys are held.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Install session keys, retiring introduction keys and any pending keys.
    pub fn install(&mut self, keys: SessionKeys) {
        self.pending = None;
        self.installed = Some(keys);
    }

    /// Promote the pending keys.
    pub fn install_pending(&mut self) -> Result<(), CryptoError> {
        let keys = self.pending.take().ok_or(CryptoError::NoSessionKeys)?;
        self.installed = Some(keys);
        Ok(())
    }

    /// Whether session keys are in use.
    pub fn has_session_keys(&self) -> bool {
        self.installed.is_some()
    }

    /// Installed session keys.
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.installed.as_ref()
    }

    /// Protect a packet with the remote introduction key.
    pub fn seal_with_intro_key(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        if self.installed.is_some() {
            return Err(CryptoError::IntroKeyRetired);
        }
        let key = self.remote_intro.as_ref().ok_or(CryptoError::NoIntroKey)?;
        seal_with_intro_key(key, buf)
    }

    /// Protect a packet with our own introduction key (SessionCreated).
    pub fn seal_with_local_intro_key(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        if self.installed.is_some() {
            return Err(CryptoError::IntroKeyRetired);
        }
        seal_with_intro_key(&self.local_intro, buf)
    }

    /// Protect a packet with the installed session keys.
    pub fn seal_with_session_key(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        let keys = self.installed.as_ref().ok_or(CryptoError::NoSessionKeys)?;
        seal_packet(keys.session_key.as_bytes(), keys.mac_key.as_bytes(), buf)
            .map_err(|_| CryptoError::MacMismatch)
    }

    /// Protect a packet with the best key available: session keys once
    /// installed, otherwise the remote introduction key.
    pub fn seal(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        if self.installed.is_some() {
            self.seal_with_session_key(buf)
        } else {
            self.seal_with_intro_key(buf)
        }
    }

    /// Open with an introduction key: remote first, then our own.
    pub fn open_with_intro_key(&self, buf: &mut [u8]) -> Result<KeyKind, CryptoError> {
        if self.installed.is_some() {
            return Err(CryptoError::IntroKeyRetired);
        }
        if let Some(key) = &self.remote_intro {
            if open_with_intro_key(key, buf).is_ok() {
                return Ok(KeyKind::RemoteIntro);
            }
        }
        open_with_intro_key(&self.local_intro, buf)?;
        Ok(KeyKind::LocalIntro)
    }

    /// Open with the installed session keys.
    pub fn open_with_session_key(&self, buf: &mut [u8]) -> Result<KeyKind, CryptoError> {
        let keys = self.installed.as_ref().ok_or(CryptoError::NoSessionKeys)?;
        open_packet(keys.session_key.as_bytes(), keys.mac_key.as_bytes(), buf)?;
        Ok(KeyKind::Session)
    }

    /// Authenticate and decrypt an inbound packet with whichever key fits.
    ///
    /// Once session keys are installed they are the only candidate.
    /// Otherwise: pending keys, remote intro key, own intro key.
    pub fn open(&self, buf: &mut [u8]) -> Result<KeyKind, CryptoError> {
        if self.installed.is_some() {
            return self.open_with_session_key(buf);
        }
        if let Some(keys) = &self.pending {
            if open_packet(keys.session_key.as_bytes(), keys.mac_key.as_bytes(), buf).is_ok() {
                return Ok(KeyKind::PendingHandshake);
            }
        }
        self.open_with_intro_key(buf)
    }
}

/// Protect a packet with an arbitrary introduction key.
///
/// Used for messages to routers we hold no session with (peer test,
/// relay responses to unestablished requesters).
pub fn seal_with_intro_key(key: &IntroKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    seal_packet(key.as_bytes(), key.as_bytes(), buf).map_err(|_| CryptoError::MacMismatch)
}

/// Open a packet protected with an arbitrary introduction key.
pub fn open_with_intro_key(key: &IntroKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    verify_packet(key.as_bytes(), buf)?;
    decrypt_packet(key.as_bytes(), buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FLAG_OFFSET, MAC_SIZE, SSU_HEADER_SIZE_MIN};
    use crate::crypto::{cipher::random_iv, derive_session_keys};

    fn plaintext() -> Vec<u8> {
        let mut buf = vec![0u8; SSU_HEADER_SIZE_MIN + 4];
        buf[MAC_SIZE..FLAG_OFFSET].copy_from_slice(&random_iv());
        buf[FLAG_OFFSET] = 0x60;
        buf[SSU_HEADER_SIZE_MIN..].copy_from_slice(b"ping");
        buf
    }

    fn pair() -> (KeySchedule, KeySchedule) {
        let a_key = IntroKey::generate();
        let b_key = IntroKey::generate();
        let mut a = KeySchedule::new(a_key.clone());
        let mut b = KeySchedule::new(b_key.clone());
        a.set_remote_intro_key(b_key);
        b.set_remote_intro_key(a_key);
        (a, b)
    }

    #[test]
    fn test_intro_key_exchange() {
        let (a, b) = pair();
        let plain = plaintext();

        let mut buf = plain.clone();
        a.seal_with_intro_key(&mut buf).unwrap();
        assert_eq!(b.open(&mut buf).unwrap(), KeyKind::LocalIntro);
        assert_eq!(buf[MAC_SIZE..], plain[MAC_SIZE..]);

        let mut buf = plain.clone();
        b.seal_with_local_intro_key(&mut buf).unwrap();
        assert_eq!(a.open(&mut buf).unwrap(), KeyKind::RemoteIntro);
    }

    #[test]
    fn test_pending_then_installed() {
        let (mut a, mut b) = pair();
        let keys = derive_session_keys(&[3u8; 32]).unwrap();
        b.set_pending(keys.clone());
        a.install(keys);

        let mut buf = plaintext();
        a.seal(&mut buf).unwrap();
        assert_eq!(b.open(&mut buf).unwrap(), KeyKind::PendingHandshake);

        b.install_pending().unwrap();
        assert!(!b.has_pending());
        assert!(b.has_session_keys());

        let mut buf = plaintext();
        a.seal(&mut buf).unwrap();
        assert_eq!(b.open(&mut buf).unwrap(), KeyKind::Session);
    }

    #[test]
    fn test_intro_key_retired_after_install() {
        let (mut a, mut b) = pair();

        let mut old = plaintext();
        a.seal_with_intro_key(&mut old).unwrap();

        let keys = derive_session_keys(&[8u8; 32]).unwrap();
        a.install(keys.clone());
        b.install(keys);

        let mut buf = plaintext();
        assert_eq!(
            a.seal_with_intro_key(&mut buf),
            Err(CryptoError::IntroKeyRetired)
        );
        assert_eq!(
            b.open_with_intro_key(&mut old.clone()),
            Err(CryptoError::IntroKeyRetired)
        );
        assert_eq!(b.open(&mut old), Err(CryptoError::MacMismatch));
    }

    #[test]
    fn test_missing_keys() {
        let schedule = KeySchedule::new(IntroKey::generate());
        let mut buf = plaintext();
        assert_eq!(
            schedule.seal_with_intro_key(&mut buf),
            Err(CryptoError::NoIntroKey)
        );
        assert_eq!(
            schedule.seal_with_session_key(&mut buf),
            Err(CryptoError::NoSessionKeys)
        );

        let mut schedule = schedule;
        assert_eq!(schedule.install_pending(), Err(CryptoError::NoSessionKeys));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (_, b) = pair();
        let stranger = KeySchedule::new(IntroKey::generate());
        let mut buf = plaintext();
        stranger.seal_with_local_intro_key(&mut buf).unwrap();
        let sealed = buf.clone();
        assert_eq!(b.open(&mut buf), Err(CryptoError::MacMismatch));
        assert_eq!(buf, sealed);
    }
}
