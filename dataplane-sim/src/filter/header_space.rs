use crate::error::InvalidInput;
use crate::flow::{Flow, FlowState, IpProtocol, TcpFlags};
use crate::network::ip::Prefix;
use crate::prefix_space::{PrefixRange, PrefixSpace};
use crate::sub_range::SubRange;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An address with a wildcard mask: an address matches when it agrees with `ip` on every bit
/// that is not set in the wildcard
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct IpWildcard {
    ip: Ipv4Addr,
    wildcard: u32,
}

impl IpWildcard {
    pub fn new(ip: Ipv4Addr, wildcard: u32) -> Self {
        // Bits covered by the wildcard are irrelevant, so we normalize them to zero
        Self {
            ip: Ipv4Addr::from_bits(ip.to_bits() & !wildcard),
            wildcard,
        }
    }

    pub fn any() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, u32::MAX)
    }

    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        (ip.to_bits() ^ self.ip.to_bits()) & !self.wildcard == 0
    }

    /// The equivalent prefix, if the wildcard only covers trailing bits
    pub fn as_prefix(&self) -> Option<Prefix> {
        let is_contiguous = self.wildcard == u32::MAX || (self.wildcard + 1).is_power_of_two();
        if !is_contiguous {
            return None;
        }

        Prefix::new(self.ip, (32 - self.wildcard.count_ones()) as u8).ok()
    }
}

impl From<Prefix> for IpWildcard {
    fn from(prefix: Prefix) -> Self {
        Self::new(prefix.network_address(), !prefix.mask())
    }
}

impl From<Ipv4Addr> for IpWildcard {
    fn from(ip: Ipv4Addr) -> Self {
        Self::new(ip, 0)
    }
}

impl Display for IpWildcard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_prefix() {
            Some(prefix) => write!(f, "{prefix}"),
            None => write!(f, "{}:{}", self.ip, Ipv4Addr::from_bits(self.wildcard)),
        }
    }
}

impl Debug for IpWildcard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for IpWildcard {
    type Err = InvalidInput;

    // Parse wildcards as either `address:wildcard-mask` or a prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidInput::InvalidWildcard(s.to_string());
        match s.split_once(':') {
            Some((ip, wildcard)) => {
                let ip: Ipv4Addr = ip.trim().parse().map_err(|_| invalid())?;
                let wildcard: Ipv4Addr = wildcard.trim().parse().map_err(|_| invalid())?;
                Ok(IpWildcard::new(ip, wildcard.to_bits()))
            }
            None => s.parse::<Prefix>().map(IpWildcard::from).map_err(|_| invalid()),
        }
    }
}

/// A set of wildcards, matching an address if any of its members does
///
/// When every member is prefix-shaped, the set is compiled into a [`PrefixSpace`] so membership
/// tests cost a single trie walk regardless of the number of members.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<IpWildcard>", into = "Vec<IpWildcard>")]
pub struct IpWildcardSet {
    wildcards: Vec<IpWildcard>,
    compiled: Option<PrefixSpace>,
}

impl IpWildcardSet {
    pub fn new(wildcards: Vec<IpWildcard>) -> Self {
        let compiled = wildcards
            .iter()
            .map(|w| w.as_prefix().map(PrefixRange::more_specifics))
            .collect::<Option<PrefixSpace>>();

        Self {
            wildcards,
            compiled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wildcards.is_empty()
    }

    pub fn wildcards(&self) -> &[IpWildcard] {
        &self.wildcards
    }

    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        match &self.compiled {
            Some(space) => space.contains_ip(ip),
            None => self.wildcards.iter().any(|w| w.matches(ip)),
        }
    }
}

impl From<Vec<IpWildcard>> for IpWildcardSet {
    fn from(wildcards: Vec<IpWildcard>) -> Self {
        Self::new(wildcards)
    }
}

impl From<IpWildcardSet> for Vec<IpWildcard> {
    fn from(set: IpWildcardSet) -> Self {
        set.wildcards
    }
}

impl FromIterator<IpWildcard> for IpWildcardSet {
    fn from_iter<T: IntoIterator<Item = IpWildcard>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl PartialEq for IpWildcardSet {
    fn eq(&self, other: &Self) -> bool {
        self.wildcards == other.wildcards
    }
}

impl Eq for IpWildcardSet {}

impl Debug for IpWildcardSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(&self.wildcards).finish()
    }
}

/// A match on TCP flags: the flow's flags must agree with `flags` on every bit set in `mask`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TcpFlagsMatch {
    pub flags: TcpFlags,
    pub mask: TcpFlags,
}

impl TcpFlagsMatch {
    pub fn matches(&self, flags: TcpFlags) -> bool {
        flags.intersection(self.mask) == self.flags.intersection(self.mask)
    }
}

/// A set of packet headers, described as a conjunction of per-field constraints
///
/// Each field is a disjunction over the configured values. An empty positive field leaves the
/// header unconstrained (it is a wildcard, not an empty set), while a `not_*` field excludes
/// every header matching one of its values.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSpace {
    pub ip_protocols: Vec<IpProtocol>,
    pub not_ip_protocols: Vec<IpProtocol>,
    pub src_ips: IpWildcardSet,
    pub not_src_ips: IpWildcardSet,
    pub dst_ips: IpWildcardSet,
    pub not_dst_ips: IpWildcardSet,
    /// Matches when either the source or the destination address is in the set
    pub src_or_dst_ips: IpWildcardSet,
    pub src_ports: Vec<SubRange>,
    pub not_src_ports: Vec<SubRange>,
    pub dst_ports: Vec<SubRange>,
    pub not_dst_ports: Vec<SubRange>,
    pub dscps: Vec<SubRange>,
    pub not_dscps: Vec<SubRange>,
    pub ecns: Vec<SubRange>,
    pub not_ecns: Vec<SubRange>,
    pub icmp_types: Vec<SubRange>,
    pub not_icmp_types: Vec<SubRange>,
    pub icmp_codes: Vec<SubRange>,
    pub not_icmp_codes: Vec<SubRange>,
    pub tcp_flags: Vec<TcpFlagsMatch>,
    pub states: Vec<FlowState>,
}

impl HeaderSpace {
    /// Whether this header space places no constraint at all on packets
    pub fn is_unrestricted(&self) -> bool {
        *self == HeaderSpace::default()
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        if self.is_unrestricted() {
            return true;
        }

        positive(&self.ip_protocols, |p| *p == flow.ip_protocol)
            && !self.not_ip_protocols.contains(&flow.ip_protocol)
            && positive_ips(&self.src_ips, flow.src_ip)
            && !self.not_src_ips.matches(flow.src_ip)
            && positive_ips(&self.dst_ips, flow.dst_ip)
            && !self.not_dst_ips.matches(flow.dst_ip)
            && (self.src_or_dst_ips.is_empty()
                || self.src_or_dst_ips.matches(flow.src_ip)
                || self.src_or_dst_ips.matches(flow.dst_ip))
            && ranges(&self.src_ports, &self.not_src_ports, flow.src_port as u32)
            && ranges(&self.dst_ports, &self.not_dst_ports, flow.dst_port as u32)
            && ranges(&self.dscps, &self.not_dscps, flow.dscp as u32)
            && ranges(&self.ecns, &self.not_ecns, flow.ecn as u32)
            && ranges(&self.icmp_types, &self.not_icmp_types, flow.icmp_type as u32)
            && ranges(&self.icmp_codes, &self.not_icmp_codes, flow.icmp_code as u32)
            && positive(&self.tcp_flags, |m| m.matches(flow.tcp_flags))
            && positive(&self.states, |s| *s == flow.state)
    }
}

fn positive<T>(values: &[T], matches: impl Fn(&T) -> bool) -> bool {
    values.is_empty() || values.iter().any(matches)
}

fn positive_ips(set: &IpWildcardSet, ip: Ipv4Addr) -> bool {
    set.is_empty() || set.matches(ip)
}

fn ranges(included: &[SubRange], excluded: &[SubRange], value: u32) -> bool {
    positive(included, |r| r.includes(value)) && !excluded.iter().any(|r| r.includes(value))
}

#[cfg(test)]
mod test {
    use super::*;

    fn flow() -> Flow {
        Flow::builder()
            .ingress_node("a")
            .src_ip(Ipv4Addr::new(192, 168, 1, 10))
            .dst_ip(Ipv4Addr::new(10, 0, 0, 5))
            .src_port(40000)
            .dst_port(22)
            .ip_protocol(IpProtocol::TCP)
            .tcp_flags(TcpFlags::SYN)
            .build()
    }

    fn wildcards(values: &[&str]) -> IpWildcardSet {
        values.iter().map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn test_wildcard_parse_and_match() {
        let odd_hosts: IpWildcard = "10.0.0.1:255.255.255.254".parse().unwrap();
        assert!(odd_hosts.matches(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(odd_hosts.matches(Ipv4Addr::new(172, 16, 0, 3)));
        assert!(!odd_hosts.matches(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(odd_hosts.as_prefix(), None);
        assert_eq!(odd_hosts.to_string(), "0.0.0.1:255.255.255.254");

        let prefix_shaped: IpWildcard = "10.0.0.7:0.0.0.255".parse().unwrap();
        assert_eq!(prefix_shaped.to_string(), "10.0.0.0/24");
        assert_eq!(IpWildcard::any().as_prefix(), Some(Prefix::ZERO));

        assert!("10.0.0.1:nope".parse::<IpWildcard>().is_err());
        assert!("10.0.0.1/33".parse::<IpWildcard>().is_err());
    }

    #[test]
    fn test_wildcard_set_compiled_and_plain_agree() {
        let compiled = wildcards(&["10.0.0.0/8", "192.168.1.0/24"]);
        assert!(compiled.compiled.is_some());

        let plain = wildcards(&["10.0.0.0/8", "192.168.1.0/24", "0.0.0.1:255.255.255.254"]);
        assert!(plain.compiled.is_none());

        for ip in [
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(192, 168, 1, 200),
            Ipv4Addr::new(192, 168, 2, 2),
        ] {
            assert_eq!(compiled.matches(ip), plain.matches(ip), "{ip}");
        }
    }

    #[test]
    fn test_empty_fields_are_unconstrained() {
        let hs = HeaderSpace::default();
        assert!(hs.is_unrestricted());
        assert!(hs.matches(&flow()));
    }

    #[test]
    fn test_conjunction_of_fields() {
        let hs = HeaderSpace {
            ip_protocols: vec![IpProtocol::TCP],
            dst_ips: wildcards(&["10.0.0.0/24"]),
            dst_ports: vec![SubRange::new(20, 23).unwrap(), SubRange::singleton(80)],
            ..Default::default()
        };
        assert!(!hs.is_unrestricted());
        assert!(hs.matches(&flow()));

        let udp = Flow {
            ip_protocol: IpProtocol::UDP,
            ..flow()
        };
        assert!(!hs.matches(&udp));

        let https = Flow {
            dst_port: 443,
            ..flow()
        };
        assert!(!hs.matches(&https));
    }

    #[test]
    fn test_negative_fields_exclude() {
        let hs = HeaderSpace {
            dst_ips: wildcards(&["10.0.0.0/8"]),
            not_dst_ips: wildcards(&["10.0.0.0/24"]),
            ..Default::default()
        };
        assert!(!hs.matches(&flow()));
        assert!(hs.matches(&flow().with_dst_ip(Ipv4Addr::new(10, 9, 0, 1))));

        let no_ssh = HeaderSpace {
            not_dst_ports: vec![SubRange::singleton(22)],
            ..Default::default()
        };
        assert!(!no_ssh.matches(&flow()));
    }

    #[test]
    fn test_tcp_flags_and_state() {
        let syn_only = HeaderSpace {
            tcp_flags: vec![TcpFlagsMatch {
                flags: TcpFlags::SYN,
                mask: TcpFlags::SYN.union(TcpFlags::ACK),
            }],
            ..Default::default()
        };
        assert!(syn_only.matches(&flow()));

        let syn_ack = Flow {
            tcp_flags: TcpFlags::SYN.union(TcpFlags::ACK),
            ..flow()
        };
        assert!(!syn_only.matches(&syn_ack));

        let established = HeaderSpace {
            states: vec![FlowState::Established],
            ..Default::default()
        };
        assert!(!established.matches(&flow()));
    }

    #[test]
    fn test_src_or_dst() {
        let hs = HeaderSpace {
            src_or_dst_ips: wildcards(&["192.168.1.0/24"]),
            ..Default::default()
        };
        assert!(hs.matches(&flow()));
        assert!(!hs.matches(&flow().with_src_ip(Ipv4Addr::new(1, 1, 1, 1))));
    }

    #[test]
    fn test_deserialize() {
        let hs: HeaderSpace = serde_json::from_str(
            r#"{ "dst_ips": ["10.0.0.0/24", "10.1.0.1:0.0.255.0"], "dst_ports": ["20-23"], "ip_protocols": ["TCP"] }"#,
        )
        .unwrap();
        assert_eq!(hs.dst_ips.wildcards().len(), 2);
        assert!(hs.matches(&flow()));
    }
}
