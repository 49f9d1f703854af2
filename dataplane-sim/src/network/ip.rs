use crate::error::InvalidInput;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation
///
/// Only network bits are ever set in the address, so two prefixes covering the same network are
/// always equal. Prefixes are ordered by address first and length second.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Prefix {
    address: Ipv4Addr,
    length: u8,
}

impl Prefix {
    pub const MAX_LENGTH: u8 = 32;

    /// The prefix containing every address (`0.0.0.0/0`)
    pub const ZERO: Prefix = Prefix {
        address: Ipv4Addr::UNSPECIFIED,
        length: 0,
    };

    /// Creates a prefix, masking away any host bits set in `address`
    pub fn new(address: Ipv4Addr, length: u8) -> Result<Self, InvalidInput> {
        if length > Self::MAX_LENGTH {
            return Err(InvalidInput::InvalidPrefixLength(length.to_string()));
        }

        Ok(Self {
            address: Ipv4Addr::from_bits(address.to_bits() & mask(length)),
            length,
        })
    }

    /// The `/32` prefix containing only `address`
    pub fn host(address: Ipv4Addr) -> Self {
        Self {
            address,
            length: Self::MAX_LENGTH,
        }
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn mask(&self) -> u32 {
        mask(self.length)
    }

    /// The highest address covered by this prefix
    pub fn end(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address.to_bits() | !self.mask())
    }

    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        (self.address..=self.end()).contains(&ip)
    }

    pub fn contains_prefix(&self, other: &Prefix) -> bool {
        self.length <= other.length && self.contains_ip(other.address)
    }

    /// The value of the address bit at `index`, counting from the most significant bit
    pub(crate) fn bit(&self, index: u8) -> usize {
        debug_assert!(index < Self::MAX_LENGTH);
        ((self.address.to_bits() >> (31 - index)) & 1) as usize
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.length)
    }
}

impl Debug for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Prefix {
    type Err = InvalidInput;

    // Parse prefixes in CIDR syntax (e.g. 10.0.0.0/24)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, length) = parse_address_and_length(s)?;
        Prefix::new(address, length)
    }
}

/// An interface address: an ip together with the length of the subnet it lives in
///
/// Unlike [`Prefix`], host bits are preserved.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Ipv4Cidr {
    pub(crate) address: Ipv4Addr,
    pub(crate) network_prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, network_prefix: u8) -> Result<Self, InvalidInput> {
        if network_prefix > Prefix::MAX_LENGTH {
            return Err(InvalidInput::InvalidPrefixLength(network_prefix.to_string()));
        }

        Ok(Self {
            address,
            network_prefix,
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// The subnet this address belongs to
    pub fn prefix(&self) -> Prefix {
        Prefix {
            address: Ipv4Addr::from_bits(self.address.to_bits() & mask(self.network_prefix)),
            length: self.network_prefix,
        }
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.network_prefix)
    }
}

impl Debug for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, network_prefix) = parse_address_and_length(s)?;
        Ipv4Cidr::new(address, network_prefix)
    }
}

fn parse_address_and_length(s: &str) -> Result<(Ipv4Addr, u8), InvalidInput> {
    let mut parts = s.trim().split('/');
    let address: Ipv4Addr = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| InvalidInput::InvalidAddress(s.to_string()))?;

    // A missing network prefix is interpreted as /32 (i.e. a single address)
    let length = match parts.next() {
        None => Prefix::MAX_LENGTH,
        Some(length) => length
            .parse::<u8>()
            .ok()
            .filter(|l| *l <= Prefix::MAX_LENGTH)
            .ok_or_else(|| InvalidInput::InvalidPrefixLength(length.to_string()))?,
    };

    if parts.next().is_some() {
        return Err(InvalidInput::TrailingCharacters(s.to_string()));
    }

    Ok((address, length))
}

fn mask(length: u8) -> u32 {
    u32::MAX.checked_shl(32 - length as u32).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prefix_bounds() {
        let cases = [
            ("10.0.0.0/24", "10.0.0.0", "10.0.0.255"),
            ("10.0.0.123/24", "10.0.0.0", "10.0.0.255"),
            ("10.0.0.0/8", "10.0.0.0", "10.255.255.255"),
            ("20.0.0.0/12", "20.0.0.0", "20.15.255.255"),
            ("0.0.0.0/0", "0.0.0.0", "255.255.255.255"),
            ("1.2.3.4", "1.2.3.4", "1.2.3.4"),
        ];

        for (input, start, end_inclusive) in cases {
            let prefix = Prefix::from_str(input).unwrap();
            assert_eq!(prefix.network_address().to_string(), start);
            assert_eq!(prefix.end().to_string(), end_inclusive);
        }
    }

    #[test]
    fn test_prefix_parse_errors() {
        assert_eq!(
            Prefix::from_str("10.0.0.0/33"),
            Err(InvalidInput::InvalidPrefixLength("33".to_string()))
        );
        assert_eq!(
            Prefix::from_str("10.0.0.0/x"),
            Err(InvalidInput::InvalidPrefixLength("x".to_string()))
        );
        assert!(matches!(
            Prefix::from_str("10.0.0/8"),
            Err(InvalidInput::InvalidAddress(_))
        ));
        assert!(matches!(
            Prefix::from_str("10.0.0.0/8/8"),
            Err(InvalidInput::TrailingCharacters(_))
        ));
        assert!(Prefix::new(Ipv4Addr::LOCALHOST, 40).is_err());
    }

    #[test]
    fn test_prefix_containment_and_order() {
        let wide: Prefix = "10.0.0.0/8".parse().unwrap();
        let narrow: Prefix = "10.1.0.0/16".parse().unwrap();
        let other: Prefix = "11.0.0.0/8".parse().unwrap();

        assert!(wide.contains_prefix(&narrow));
        assert!(!narrow.contains_prefix(&wide));
        assert!(!wide.contains_prefix(&other));
        assert!(wide.contains_ip(Ipv4Addr::new(10, 200, 0, 1)));
        assert!(Prefix::ZERO.contains_prefix(&other));

        // Address first, length second
        assert!(wide < narrow);
        assert!(wide < "10.0.0.0/9".parse().unwrap());
        assert!(narrow < other);
    }

    #[test]
    fn test_interface_address_keeps_host_bits() {
        let cidr: Ipv4Cidr = "10.0.0.1/24".parse().unwrap();
        assert_eq!(cidr.address(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(cidr.prefix(), "10.0.0.0/24".parse().unwrap());
        assert_eq!(cidr.to_string(), "10.0.0.1/24");
    }

    #[test]
    fn test_bits() {
        let prefix: Prefix = "128.0.0.1/32".parse().unwrap();
        assert_eq!(prefix.bit(0), 1);
        assert_eq!(prefix.bit(1), 0);
        assert_eq!(prefix.bit(31), 1);
    }
}
