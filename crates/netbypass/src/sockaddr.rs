//! Decoding socket addresses copied out of tracee memory.
//!
//! The buffer is attacker-controlled and may be shorter than the structure
//! it claims to be. Every field is bounds-checked before it is read; a short
//! buffer is rejected, never zero-extended.

use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

/// Size of `sa_family_t`.
const FAMILY_LEN: usize = 2;
/// Size of `struct sockaddr_in`.
pub const SOCKADDR_IN_LEN: usize = 16;
/// Size of `struct sockaddr_storage`; the kernel rejects anything longer.
pub const SOCKADDR_MAX_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SockaddrError {
    #[error("address buffer of {0} bytes is too short for a family tag")]
    NoFamily(usize),

    #[error("AF_INET address buffer of {0} bytes is shorter than sockaddr_in")]
    TruncatedInet(usize),
}

/// A decoded destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Inet(SocketAddrV4),
    /// Any family other than `AF_INET`; carries the raw family tag.
    Other(u16),
}

impl Destination {
    /// Decode a `struct sockaddr` in native layout.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot hold the family tag, or claims `AF_INET`
    /// but cannot hold a whole `sockaddr_in`.
    pub fn parse(buf: &[u8]) -> Result<Self, SockaddrError> {
        let Some(family) = buf.get(..FAMILY_LEN) else {
            return Err(SockaddrError::NoFamily(buf.len()));
        };
        let family = u16::from_ne_bytes([family[0], family[1]]);

        if i32::from(family) != libc::AF_INET {
            return Ok(Self::Other(family));
        }
        if buf.len() < SOCKADDR_IN_LEN {
            return Err(SockaddrError::TruncatedInet(buf.len()));
        }

        // sin_port and sin_addr are in network byte order.
        let port = u16::from_be_bytes([buf[2], buf[3]]);
        let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
        Ok(Self::Inet(SocketAddrV4::new(ip, port)))
    }
}

/// Encode an IPv4 address as the bytes of a native `struct sockaddr_in`.
pub fn encode_inet(addr: &SocketAddrV4) -> [u8; SOCKADDR_IN_LEN] {
    let mut buf = [0u8; SOCKADDR_IN_LEN];
    buf[..FAMILY_LEN].copy_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
    buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
    buf[4..8].copy_from_slice(&addr.ip().octets());
    buf
}
