//! Addressing types
//!
//! Interfaces are identified by a small integer index assigned by the
//! network stack. Each live interface carries exactly one
//! [`InterfaceAddress`] as far as routing is concerned.

use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::str::FromStr;

use derive_more::Display as DeriveDisplay;
use serde::{Deserialize, Serialize};

/// UDP port the routing protocol's control messages are exchanged on
pub const CONTROL_PORT: u16 = 1338;

/// IP protocol number for UDP
pub const UDP_PROTOCOL: u8 = 17;

/// Index of a network interface on the local node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, DeriveDisplay,
)]
#[display("if{_0}")]
pub struct InterfaceIndex(pub u32);

impl InterfaceIndex {
    /// Create a new interface index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// An IPv4 address together with the netmask of the subnet it lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    local: Ipv4Addr,
    mask: Ipv4Addr,
}

impl InterfaceAddress {
    /// Create an interface address from a local address and a prefix length
    ///
    /// Prefix lengths above 32 are clamped to 32.
    pub fn new(local: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        };
        Self {
            local,
            mask: Ipv4Addr::from(mask),
        }
    }

    /// Create an interface address from a local address and a dotted netmask
    pub fn with_mask(local: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { local, mask }
    }

    /// The loopback binding, 127.0.0.1/8
    pub fn loopback() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, 8)
    }

    /// The local address
    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    /// The netmask
    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// Number of leading one bits in the netmask
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.mask).leading_ones() as u8
    }

    /// Whether the mask is a host mask (/32)
    pub fn is_host_mask(&self) -> bool {
        self.mask == Ipv4Addr::BROADCAST
    }

    /// Subnet-directed broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        let local = u32::from(self.local);
        let mask = u32::from(self.mask);
        Ipv4Addr::from(local | !mask)
    }

    /// Broadcast destination used for link-local control traffic
    ///
    /// Host-masked interfaces have no subnet broadcast, so they fall back
    /// to the limited broadcast address.
    pub fn control_broadcast(&self) -> Ipv4Addr {
        if self.is_host_mask() {
            Ipv4Addr::BROADCAST
        } else {
            self.broadcast()
        }
    }

    /// Whether `addr` falls inside this address's subnet
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(self.local) & mask == u32::from(addr) & mask
    }
}

impl Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.local, self.prefix_len())
    }
}

/// A 48-bit link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Create a MAC address from raw octets
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{octet:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for MacAddress {
    type Err = hex::FromHexError;

    /// Accepts `00:1b:44:11:3a:b7` or bare `001b44113ab7`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        let mut octets = [0u8; 6];
        hex::decode_to_slice(digits, &mut octets)?;
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_broadcast() {
        let addr = InterfaceAddress::new(Ipv4Addr::new(10, 0, 0, 1), 24);
        assert_eq!(addr.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(addr.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(addr.prefix_len(), 24);
        assert_eq!(addr.control_broadcast(), Ipv4Addr::new(10, 0, 0, 255));
    }

    #[test]
    fn test_host_mask_uses_limited_broadcast() {
        let addr = InterfaceAddress::new(Ipv4Addr::new(10, 0, 0, 1), 32);
        assert!(addr.is_host_mask());
        assert_eq!(addr.control_broadcast(), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_contains() {
        let addr = InterfaceAddress::new(Ipv4Addr::new(192, 168, 1, 7), 24);
        assert!(addr.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!addr.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn test_display() {
        let addr = InterfaceAddress::new(Ipv4Addr::new(10, 1, 2, 3), 16);
        assert_eq!(addr.to_string(), "10.1.2.3/16");
        assert_eq!(InterfaceIndex::new(3).to_string(), "if3");
        let mac = MacAddress::new([0x00, 0x1b, 0x44, 0x11, 0x3a, 0xb7]);
        assert_eq!(mac.to_string(), "00:1b:44:11:3a:b7");
    }

    #[test]
    fn test_parse_mac() {
        let mac: MacAddress = "00:1b:44:11:3a:b7".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x1b, 0x44, 0x11, 0x3a, 0xb7]);
        assert_eq!("001b44113ab7".parse::<MacAddress>().unwrap(), mac);
        assert!("00:1b:44".parse::<MacAddress>().is_err());
        assert!("zz:1b:44:11:3a:b7".parse::<MacAddress>().is_err());
    }
}
