//! IPv4 address arithmetic and the address-shaped value types.
//!
//! All range math in this crate runs on the unsigned 32-bit ordinal form of
//! an address (`u32::from(Ipv4Addr)`), so pool bounds and membership checks
//! are plain integer comparisons. This module also owns the [`Cidr`] and
//! [`MacAddr`] value types, which validate at construction and round-trip
//! through their canonical text forms.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Parses dotted-quad text into its 32-bit ordinal.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] unless the input is exactly four
/// dot-separated decimal octets in `0..=255`.
pub fn parse(text: &str) -> Result<u32> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');

    for octet in &mut octets {
        let part = parts
            .next()
            .ok_or_else(|| Error::InvalidAddress(text.to_string()))?;
        *octet = part
            .parse::<u8>()
            .map_err(|_| Error::InvalidAddress(text.to_string()))?;
    }

    if parts.next().is_some() {
        return Err(Error::InvalidAddress(text.to_string()));
    }

    Ok(u32::from(Ipv4Addr::from(octets)))
}

/// Formats a 32-bit ordinal as dotted-quad text.
pub fn format(ordinal: u32) -> String {
    Ipv4Addr::from(ordinal).to_string()
}

/// Number of addresses in the inclusive range `[start, end]`.
///
/// Returns 0 when `start > end`. The result is `u64` because the full
/// address space does not fit in `u32`.
pub fn range_size(start: u32, end: u32) -> u64 {
    if start > end {
        return 0;
    }
    u64::from(end - start) + 1
}

/// Whether `addr` falls within the inclusive range `[start, end]`.
pub fn in_range(addr: u32, start: u32, end: u32) -> bool {
    addr >= start && addr <= end
}

/// An IPv4 network in CIDR notation.
///
/// The stored address is normalized to the network address (host bits
/// cleared), so `10.0.0.5/24` parses to `10.0.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u32,
    prefix: u8,
}

impl Cidr {
    /// Creates a CIDR from an address and prefix length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `prefix > 32`.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::InvalidAddress(format!("{addr}/{prefix}")));
        }
        Ok(Self {
            network: u32::from(addr) & Self::mask_for(prefix),
            prefix,
        })
    }

    fn mask_for(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    /// The subnet mask as an ordinal.
    pub fn mask(&self) -> u32 {
        Self::mask_for(self.prefix)
    }

    /// The network address (host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// The broadcast address (host bits set).
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask())
    }

    /// The prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether the address belongs to this network.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.network
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let (addr_part, prefix_part) = text
            .split_once('/')
            .ok_or_else(|| Error::InvalidAddress(text.to_string()))?;
        let addr = Ipv4Addr::from(parse(addr_part)?);
        let prefix = prefix_part
            .parse::<u8>()
            .map_err(|_| Error::InvalidAddress(text.to_string()))?;
        Self::new(addr, prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A hardware (MAC) address.
///
/// Parsed from six colon- or dash-separated hex octets in either case;
/// rendered canonically as lowercase colon-separated hex. Equality and
/// hashing operate on the octets, so `AA-BB-...` and `aa:bb:...` compare
/// equal once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// The raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let normalized = text.replace('-', ":");
        let mut octets = [0u8; 6];
        let mut parts = normalized.split(':');

        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidAddress(text.to_string()))?;
            if part.len() != 2 {
                return Err(Error::InvalidAddress(text.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidAddress(text.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(Error::InvalidAddress(text.to_string()));
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
