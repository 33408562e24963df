//! Destination policy for intercepted `connect()` calls.
//!
//! Decides whether a destination is worth re-issuing on the host network.
//! The rules are a heuristic, not a security boundary: the tracee can race
//! the address buffer after it has been read (see the crate docs).
//!
//! ## Built-in rules (first octet)
//!
//! | Octet | Verdict | Why |
//! |-------|---------|-----|
//! | 127 | pass-through | never reach host-local services on the tracee's behalf |
//! | 10, 172 | pass-through | rootless network ranges, reachable from inside already |
//! | other | intercept | |
//!
//! Operator-supplied subnets are checked after the built-in rules.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Why a destination is left to the sandbox's own network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Loopback,
    PrivateRange,
    Ignored(Ipv4Subnet),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::PrivateRange => f.write_str("sandbox network range"),
            Self::Ignored(net) => write!(f, "ignored subnet {net}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Intercept,
    PassThrough(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubnetError {
    #[error("missing prefix length in {0:?} (expected a.b.c.d/len)")]
    MissingPrefix(String),

    #[error("invalid address in {0:?}")]
    Address(String),

    #[error("prefix length in {0:?} must be 0-32")]
    Prefix(String),
}

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    /// Host bits of `addr` are cleared.
    ///
    /// # Panics
    ///
    /// Panics if `prefix > 32`.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        assert!(prefix <= 32, "prefix {prefix} out of range");
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(prefix));
        Self { network, prefix }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix) == u32::from(self.network)
    }

    fn mask(prefix: u8) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| SubnetError::MissingPrefix(s.to_owned()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| SubnetError::Address(s.to_owned()))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| SubnetError::Prefix(s.to_owned()))?;
        Ok(Self::new(addr, prefix))
    }
}

/// Destination policy for one session.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    ignored: Vec<Ipv4Subnet>,
}

impl Policy {
    pub fn new(ignored: impl IntoIterator<Item = Ipv4Subnet>) -> Self {
        Self {
            ignored: ignored.into_iter().collect(),
        }
    }

    pub fn ignored(&self) -> &[Ipv4Subnet] {
        &self.ignored
    }

    pub fn classify(&self, ip: Ipv4Addr) -> Verdict {
        match ip.octets()[0] {
            127 => return Verdict::PassThrough(SkipReason::Loopback),
            10 | 172 => return Verdict::PassThrough(SkipReason::PrivateRange),
            _ => {}
        }
        match self.ignored.iter().find(|net| net.contains(ip)) {
            Some(net) => Verdict::PassThrough(SkipReason::Ignored(*net)),
            None => Verdict::Intercept,
        }
    }
}
