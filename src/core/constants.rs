//! Protocol constants for SSU sessions.
//!
//! Wire sizes and default timings. Sizes are fixed by the protocol and MUST
//! NOT be changed; timings are defaults for [`SessionConfig`].
//!
//! [`SessionConfig`]: crate::server::SessionConfig

use std::time::Duration;

// =============================================================================
// HEADER LAYOUT
// =============================================================================

/// MAC size (keyed BLAKE2s, truncated to 128 bits).
pub const MAC_SIZE: usize = 16;

/// IV size.
pub const IV_SIZE: usize = 16;

/// Offset of the flag byte; everything from here to the end is encrypted.
pub const FLAG_OFFSET: usize = MAC_SIZE + IV_SIZE;

/// Offset of the big-endian timestamp.
pub const TIME_OFFSET: usize = FLAG_OFFSET + 1;

/// Minimum header size (MAC + IV + flag + timestamp), no options, no body.
pub const SSU_HEADER_SIZE_MIN: usize = TIME_OFFSET + 4;

// =============================================================================
// FLAG BYTE
// =============================================================================

/// Rekey flag bit.
pub const FLAG_REKEY: u8 = 0x08;

/// Extended options present.
pub const FLAG_EXTENDED_OPTIONS: u8 = 0x04;

/// Reserved bits, must be zero.
pub const FLAG_RESERVED_MASK: u8 = 0x03;

/// Extended option bit (first options byte pair): requester asks for a relay tag.
pub const EXT_OPT_REQUEST_RELAY_TAG: u16 = 0x0001;

// =============================================================================
// KEY SIZES
// =============================================================================

/// Introduction, session and MAC key size.
pub const KEY_SIZE: usize = 32;

/// X25519 public value size.
pub const DH_PUBLIC_SIZE: usize = 32;

/// Ed25519 verifying key size.
pub const IDENTITY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Poly1305 tag appended to the sealed signature in `SessionCreated`.
pub const SEAL_TAG_SIZE: usize = 16;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Abandon a handshake or introduction after this long.
pub const SSU_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Close an established session after this long without inbound traffic.
pub const SSU_TERMINATION_TIMEOUT: Duration = Duration::from_secs(330);

/// Send a keepalive this often while established.
pub const SSU_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Forget a pending peer test after this long.
pub const SSU_PEER_TEST_TIMEOUT: Duration = Duration::from_secs(15);
