//! Endpoint encoding and body cursors shared by every message body.
//!
//! Addresses are written as `ip_len(1) | ip(0, 4 or 16) | port(2, BE)`.
//! An `ip_len` of zero means "no address": the receiver falls back to the
//! endpoint it observed the packet from.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::core::PacketError;

/// Encoded size of an endpoint.
pub fn endpoint_size(endpoint: Option<&SocketAddr>) -> usize {
    match endpoint {
        Some(SocketAddr::V4(_)) => 1 + 4 + 2,
        Some(SocketAddr::V6(_)) => 1 + 16 + 2,
        None => 1 + 2,
    }
}

/// Append an encoded endpoint.
pub fn write_endpoint(out: &mut Vec<u8>, endpoint: Option<&SocketAddr>) {
    match endpoint {
        Some(addr) => {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    out.push(4);
                    out.extend_from_slice(&ip.octets());
                }
                IpAddr::V6(ip) => {
                    out.push(16);
                    out.extend_from_slice(&ip.octets());
                }
            }
            out.extend_from_slice(&addr.port().to_be_bytes());
        }
        None => {
            out.push(0);
            out.extend_from_slice(&0u16.to_be_bytes());
        }
    }
}

/// Cursor over a message body.
///
/// Every read checks the remaining length and fails with
/// [`PacketError::Malformed`] naming the message being parsed.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> BodyReader<'a> {
    /// Start reading `buf`, a body of message `what`.
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(PacketError::Malformed(self.what))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read an endpoint; `None` when the address is empty.
    pub fn read_endpoint(&mut self) -> Result<Option<SocketAddr>, PacketError> {
        let ip = match self.read_u8()? {
            0 => None,
            4 => Some(IpAddr::V4(Ipv4Addr::from(self.read_array::<4>()?))),
            16 => Some(IpAddr::V6(Ipv6Addr::from(self.read_array::<16>()?))),
            _ => return Err(PacketError::Malformed(self.what)),
        };
        let port = self.read_u16()?;
        Ok(ip.map(|ip| SocketAddr::new(ip, port)))
    }

    /// Unread bytes.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Fail if anything is left over.
    pub fn finish(self) -> Result<(), PacketError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(PacketError::Malformed(self.what))
        }
    }
}
