//! Session packet header encoding and decoding.
//!
//! Every SSU datagram starts with the same header:
//!
//! ```text
//! +----------+----------+------+-----------+---------------------+------+
//! | MAC      | IV       | Flag | Timestamp | Extended options    | Body |
//! | 16 bytes | 16 bytes | 1    | 4 (BE32)  | 1 + len, if flagged | ...  |
//! +----------+----------+------+-----------+---------------------+------+
//!            \____________________ encrypted from byte 32 ______________/
//! ```
//!
//! Flag byte: bits 7-4 payload type, bit 3 rekey, bit 2 extended options,
//! bits 1-0 reserved.
//!
//! The codec only computes offsets and reads/writes integers in network byte
//! order. Nothing here decrypts or authenticates; fields past byte 32 are
//! meaningful only after [`KeySchedule::open`] ran.
//!
//! [`KeySchedule::open`]: crate::crypto::KeySchedule::open

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{
    FLAG_EXTENDED_OPTIONS, FLAG_OFFSET, FLAG_REKEY, FLAG_RESERVED_MASK, IV_SIZE, MAC_SIZE,
    PacketError, SSU_HEADER_SIZE_MIN, TIME_OFFSET,
};

/// Payload type carried in the top nibble of the flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// Initiator's DH public value.
    SessionRequest,
    /// Responder's DH public value and signature.
    SessionCreated,
    /// Initiator's identity and signature.
    SessionConfirmed,
    /// Ask an introducer to introduce us.
    RelayRequest,
    /// Introducer's answer to the requester.
    RelayResponse,
    /// Introducer's notice to the target.
    RelayIntro,
    /// Upper-layer data.
    Data,
    /// NAT classification exchange.
    PeerTest,
    /// Graceful close.
    SessionDestroyed,
    /// Unassigned nibble value.
    Unknown(u8),
}

impl PayloadType {
    /// Decode from the 4-bit wire value.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0 => Self::SessionRequest,
            1 => Self::SessionCreated,
            2 => Self::SessionConfirmed,
            3 => Self::RelayRequest,
            4 => Self::RelayResponse,
            5 => Self::RelayIntro,
            6 => Self::Data,
            7 => Self::PeerTest,
            8 => Self::SessionDestroyed,
            other => Self::Unknown(other),
        }
    }

    /// Encode to the 4-bit wire value.
    pub fn as_nibble(self) -> u8 {
        match self {
            Self::SessionRequest => 0,
            Self::SessionCreated => 1,
            Self::SessionConfirmed => 2,
            Self::RelayRequest => 3,
            Self::RelayResponse => 4,
            Self::RelayIntro => 5,
            Self::Data => 6,
            Self::PeerTest => 7,
            Self::SessionDestroyed => 8,
            Self::Unknown(other) => other & 0x0F,
        }
    }
}

/// Build a flag byte from its parts.
pub fn make_flag(payload_type: PayloadType, rekey: bool, extended_options: bool) -> u8 {
    let mut flag = payload_type.as_nibble() << 4;
    if rekey {
        flag |= FLAG_REKEY;
    }
    if extended_options {
        flag |= FLAG_EXTENDED_OPTIONS;
    }
    flag
}

/// Current time in seconds since the Unix epoch, as carried in the header.
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// A view over one datagram.
///
/// Construction only guarantees the minimum header size; call
/// [`parse_header`](Self::parse_header) once the encrypted region is in
/// plaintext to locate options and body.
#[derive(Debug)]
pub struct SessionPacket<T> {
    buffer: T,
    header_len: usize,
}

impl<T: AsRef<[u8]>> SessionPacket<T> {
    /// Wrap a buffer, rejecting anything shorter than the minimum header.
    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let len = buffer.as_ref().len();
        if len < SSU_HEADER_SIZE_MIN {
            return Err(PacketError::TooShort {
                expected: SSU_HEADER_SIZE_MIN,
                actual: len,
            });
        }
        Ok(Self {
            buffer,
            header_len: SSU_HEADER_SIZE_MIN,
        })
    }

    /// Validate the (decrypted) flag byte and locate the body.
    pub fn parse_header(&mut self) -> Result<(), PacketError> {
        let flag = self.flag();
        if flag & FLAG_RESERVED_MASK != 0 {
            return Err(PacketError::ReservedFlags(flag));
        }
        let needed = self.compute_header_size();
        if needed > self.len() {
            return Err(PacketError::TruncatedOptions {
                needed,
                available: self.len(),
            });
        }
        self.header_len = needed;
        Ok(())
    }

    /// Total datagram length.
    pub fn len(&self) -> usize {
        self.buffer.as_ref().len()
    }

    /// Never true: construction rejects short buffers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header length including extended options.
    ///
    /// Equals the minimum until [`parse_header`](Self::parse_header) ran.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// How many bytes the header spans, extended options included.
    ///
    /// Reads the options length byte when the flag says options are present;
    /// a missing length byte counts as one past the end.
    pub fn compute_header_size(&self) -> usize {
        if !self.has_extended_options() {
            return SSU_HEADER_SIZE_MIN;
        }
        match self.buffer.as_ref().get(SSU_HEADER_SIZE_MIN) {
            Some(&len) => SSU_HEADER_SIZE_MIN + 1 + len as usize,
            None => SSU_HEADER_SIZE_MIN + 1,
        }
    }

    /// Raw flag byte.
    pub fn flag(&self) -> u8 {
        self.buffer.as_ref()[FLAG_OFFSET]
    }

    /// Payload type from the top nibble.
    pub fn payload_type(&self) -> PayloadType {
        PayloadType::from_nibble(self.flag() >> 4)
    }

    /// Rekey flag.
    pub fn rekey(&self) -> bool {
        self.flag() & FLAG_REKEY != 0
    }

    /// Extended options flag.
    pub fn has_extended_options(&self) -> bool {
        self.flag() & FLAG_EXTENDED_OPTIONS != 0
    }

    /// Extended options bytes, without the length prefix.
    pub fn extended_options(&self) -> Result<Option<&[u8]>, PacketError> {
        if !self.has_extended_options() {
            return Ok(None);
        }
        let needed = self.compute_header_size();
        if needed > self.len() {
            return Err(PacketError::TruncatedOptions {
                needed,
                available: self.len(),
            });
        }
        Ok(Some(&self.buffer.as_ref()[SSU_HEADER_SIZE_MIN + 1..needed]))
    }

    /// Sending timestamp, seconds since the Unix epoch.
    pub fn time(&self) -> u32 {
        let b = self.buffer.as_ref();
        u32::from_be_bytes([
            b[TIME_OFFSET],
            b[TIME_OFFSET + 1],
            b[TIME_OFFSET + 2],
            b[TIME_OFFSET + 3],
        ])
    }

    /// MAC bytes.
    pub fn mac(&self) -> &[u8] {
        &self.buffer.as_ref()[..MAC_SIZE]
    }

    /// IV bytes.
    pub fn iv(&self) -> &[u8] {
        &self.buffer.as_ref()[MAC_SIZE..MAC_SIZE + IV_SIZE]
    }

    /// Encrypted region: flag byte to the end.
    pub fn encrypted(&self) -> &[u8] {
        &self.buffer.as_ref()[FLAG_OFFSET..]
    }

    /// Body following the header.
    pub fn body(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len..]
    }

    /// Body length.
    pub fn body_len(&self) -> usize {
        self.len() - self.header_len
    }

    /// Release the buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> SessionPacket<T> {
    /// Overwrite the flag byte.
    pub fn set_flag(&mut self, flag: u8) {
        self.buffer.as_mut()[FLAG_OFFSET] = flag;
    }

    /// Overwrite the timestamp.
    pub fn set_time(&mut self, time: u32) {
        self.buffer.as_mut()[TIME_OFFSET..TIME_OFFSET + 4].copy_from_slice(&time.to_be_bytes());
    }

    /// Mutable MAC bytes.
    pub fn mac_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[..MAC_SIZE]
    }

    /// Mutable IV bytes.
    pub fn iv_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[MAC_SIZE..MAC_SIZE + IV_SIZE]
    }

    /// Mutable encrypted region.
    pub fn encrypted_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[FLAG_OFFSET..]
    }
}

/// Owned copy of a parsed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// MAC.
    pub mac: [u8; MAC_SIZE],
    /// IV.
    pub iv: [u8; IV_SIZE],
    /// Payload type.
    pub payload_type: PayloadType,
    /// Rekey flag.
    pub rekey: bool,
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// Extended options, without their length prefix. At most 255 bytes;
    /// set through [`with_extended_options`](Self::with_extended_options).
    pub extended_options: Option<Vec<u8>>,
}

impl PacketHeader {
    /// Fresh header for an outbound packet; MAC is filled in when sealing.
    pub fn new(payload_type: PayloadType, iv: [u8; IV_SIZE]) -> Self {
        Self {
            mac: [0u8; MAC_SIZE],
            iv,
            payload_type,
            rekey: false,
            time: unix_time(),
            extended_options: None,
        }
    }

    /// Attach extended options (at most 255 bytes).
    pub fn with_extended_options(mut self, options: Vec<u8>) -> Result<Self, PacketError> {
        if options.len() > u8::MAX as usize {
            return Err(PacketError::OptionsTooLong(options.len()));
        }
        self.extended_options = Some(options);
        Ok(self)
    }

    /// Parse the header of a plaintext datagram.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        let mut packet = SessionPacket::new_checked(buf)?;
        packet.parse_header()?;

        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(packet.mac());
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(packet.iv());

        Ok(Self {
            mac,
            iv,
            payload_type: packet.payload_type(),
            rekey: packet.rekey(),
            time: packet.time(),
            extended_options: packet.extended_options()?.map(<[u8]>::to_vec),
        })
    }

    /// Flag byte for these fields.
    pub fn flag(&self) -> u8 {
        make_flag(
            self.payload_type,
            self.rekey,
            self.extended_options.is_some(),
        )
    }

    /// Header size including options.
    pub fn header_size(&self) -> usize {
        match &self.extended_options {
            Some(options) => SSU_HEADER_SIZE_MIN + 1 + options.len(),
            None => SSU_HEADER_SIZE_MIN,
        }
    }

    /// Serialize the header.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(self.header_size());
        out.extend_from_slice(&self.mac);
        out.extend_from_slice(&self.iv);
        out.push(self.flag());
        out.extend_from_slice(&self.time.to_be_bytes());
        if let Some(options) = &self.extended_options {
            out.push(options.len() as u8);
            out.extend_from_slice(options);
        }
    }

    /// Serialize header followed by `body`.
    pub fn to_packet(&self, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_size() + body.len());
        self.write_to(&mut out);
        out.extend_from_slice(body);
        out
    }
}
