use crate::error::InvalidInput;
use crate::network::DEFAULT_VRF;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

/// A packet header, together with the point where it enters the network
///
/// Flows are plain values: transformations along the path (e.g. NAT) produce new flows. Use
/// [`Flow::builder`] to create one, leaving unspecified fields at their defaults.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, bon::Builder,
)]
pub struct Flow {
    #[builder(into)]
    #[serde(with = "crate::util::serde_arc_str")]
    pub ingress_node: Arc<str>,
    #[builder(into, default = Arc::from(DEFAULT_VRF))]
    #[serde(with = "crate::util::serde_arc_str", default = "default_vrf")]
    pub ingress_vrf: Arc<str>,
    /// The interface the flow arrives on, if any (flows without one originate at the node)
    #[builder(into)]
    #[serde(with = "crate::util::serde_option_arc_str", default)]
    pub ingress_interface: Option<Arc<str>>,
    #[builder(default = Ipv4Addr::UNSPECIFIED)]
    #[serde(default = "unspecified_ip")]
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    #[builder(default)]
    #[serde(default)]
    pub src_port: u16,
    #[builder(default)]
    #[serde(default)]
    pub dst_port: u16,
    #[builder(default)]
    #[serde(default)]
    pub ip_protocol: IpProtocol,
    #[builder(default)]
    #[serde(default)]
    pub dscp: u8,
    #[builder(default)]
    #[serde(default)]
    pub ecn: u8,
    #[builder(default)]
    #[serde(default)]
    pub icmp_type: u8,
    #[builder(default)]
    #[serde(default)]
    pub icmp_code: u8,
    #[builder(default)]
    #[serde(default)]
    pub tcp_flags: TcpFlags,
    #[builder(default)]
    #[serde(default)]
    pub state: FlowState,
    /// Free-form label, useful to tell apart flows in a batch
    #[builder(into, default)]
    #[serde(default)]
    pub tag: String,
}

fn default_vrf() -> Arc<str> {
    Arc::from(DEFAULT_VRF)
}

fn unspecified_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Flow {
    pub fn with_src_ip(&self, src_ip: Ipv4Addr) -> Flow {
        Flow {
            src_ip,
            ..self.clone()
        }
    }

    pub fn with_dst_ip(&self, dst_ip: Ipv4Addr) -> Flow {
        Flow {
            dst_ip,
            ..self.clone()
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ingress:{}", self.ingress_node)?;
        if let Some(interface) = &self.ingress_interface {
            write!(f, ":{interface}")?;
        }
        if self.ingress_vrf.as_ref() != DEFAULT_VRF {
            write!(f, " vrf:{}", self.ingress_vrf)?;
        }

        write!(f, " {} ", self.ip_protocol)?;
        if self.ip_protocol.has_ports() {
            write!(
                f,
                "{}:{} -> {}:{}",
                self.src_ip, self.src_port, self.dst_ip, self.dst_port
            )?;
        } else {
            write!(f, "{} -> {}", self.src_ip, self.dst_ip)?;
        }

        if self.ip_protocol == IpProtocol::ICMP {
            write!(f, " type:{} code:{}", self.icmp_type, self.icmp_code)?;
        }
        if self.ip_protocol == IpProtocol::TCP && self.tcp_flags != TcpFlags::NONE {
            write!(f, " flags:{}", self.tcp_flags)?;
        }
        if self.dscp != 0 || self.ecn != 0 {
            write!(f, " dscp:{} ecn:{}", self.dscp, self.ecn)?;
        }
        if self.state != FlowState::New {
            write!(f, " state:{}", self.state)?;
        }
        if !self.tag.is_empty() {
            write!(f, " tag:{}", self.tag)?;
        }

        Ok(())
    }
}

/// An IP protocol number, displayed by name when it has a well-known one
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, SerializeDisplay, DeserializeFromStr,
)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const IP: IpProtocol = IpProtocol(0);
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);
    pub const GRE: IpProtocol = IpProtocol(47);
    pub const ESP: IpProtocol = IpProtocol(50);
    pub const OSPF: IpProtocol = IpProtocol(89);

    const NAMED: [(IpProtocol, &'static str); 7] = [
        (Self::IP, "IP"),
        (Self::ICMP, "ICMP"),
        (Self::TCP, "TCP"),
        (Self::UDP, "UDP"),
        (Self::GRE, "GRE"),
        (Self::ESP, "ESP"),
        (Self::OSPF, "OSPF"),
    ];

    pub fn has_ports(&self) -> bool {
        matches!(*self, Self::TCP | Self::UDP)
    }
}

impl Display for IpProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match Self::NAMED.iter().find(|(p, _)| p == self) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Debug for IpProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for IpProtocol {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((protocol, _)) = Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
        {
            return Ok(*protocol);
        }

        s.parse()
            .map(IpProtocol)
            .map_err(|_| InvalidInput::InvalidIpProtocol(s.to_string()))
    }
}

/// The set of TCP flags carried by a packet
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, SerializeDisplay, DeserializeFromStr,
)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const NONE: TcpFlags = TcpFlags(0);
    pub const FIN: TcpFlags = TcpFlags(1);
    pub const SYN: TcpFlags = TcpFlags(1 << 1);
    pub const RST: TcpFlags = TcpFlags(1 << 2);
    pub const PSH: TcpFlags = TcpFlags(1 << 3);
    pub const ACK: TcpFlags = TcpFlags(1 << 4);
    pub const URG: TcpFlags = TcpFlags(1 << 5);
    pub const ECE: TcpFlags = TcpFlags(1 << 6);
    pub const CWR: TcpFlags = TcpFlags(1 << 7);

    const NAMED: [(TcpFlags, &'static str); 8] = [
        (Self::FIN, "FIN"),
        (Self::SYN, "SYN"),
        (Self::RST, "RST"),
        (Self::PSH, "PSH"),
        (Self::ACK, "ACK"),
        (Self::URG, "URG"),
        (Self::ECE, "ECE"),
        (Self::CWR, "CWR"),
    ];

    pub fn union(self, other: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | other.0)
    }

    pub fn intersection(self, other: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 & other.0)
    }
}

impl Display for TcpFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if *self == Self::NONE {
            return f.write_str("-");
        }

        let names: Vec<_> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.0 & flag.0 != 0)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl Debug for TcpFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for TcpFlags {
    type Err = InvalidInput;

    // Parse flags like `SYN|ACK` (`-` or an empty string means no flags)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "-" {
            return Ok(Self::NONE);
        }

        s.split('|').try_fold(Self::NONE, |flags, name| {
            Self::NAMED
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
                .map(|(flag, _)| flags.union(*flag))
                .ok_or_else(|| InvalidInput::InvalidTcpFlags(s.to_string()))
        })
    }
}

/// Connection tracking state of a flow
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum FlowState {
    #[default]
    New,
    Established,
    Related,
    Invalid,
}

impl Display for FlowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::New => "new",
            FlowState::Established => "established",
            FlowState::Related => "related",
            FlowState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let flow = Flow::builder()
            .ingress_node("a")
            .dst_ip(Ipv4Addr::new(10, 0, 0, 5))
            .build();

        assert_eq!(flow.ingress_vrf.as_ref(), DEFAULT_VRF);
        assert_eq!(flow.ingress_interface, None);
        assert_eq!(flow.src_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(flow.ip_protocol, IpProtocol::IP);
        assert_eq!(flow.state, FlowState::New);
        assert_eq!(flow.to_string(), "ingress:a IP 0.0.0.0 -> 10.0.0.5");
    }

    #[test]
    fn test_display_tcp() {
        let flow = Flow::builder()
            .ingress_node("a")
            .ingress_interface("eth1")
            .src_ip(Ipv4Addr::new(1, 1, 1, 1))
            .dst_ip(Ipv4Addr::new(10, 0, 0, 5))
            .src_port(49152)
            .dst_port(443)
            .ip_protocol(IpProtocol::TCP)
            .tcp_flags(TcpFlags::SYN)
            .tag("probe")
            .build();

        assert_eq!(
            flow.to_string(),
            "ingress:a:eth1 TCP 1.1.1.1:49152 -> 10.0.0.5:443 flags:SYN tag:probe"
        );
    }

    #[test]
    fn test_flows_are_ordered_structurally() {
        let base = Flow::builder()
            .ingress_node("a")
            .dst_ip(Ipv4Addr::new(10, 0, 0, 5))
            .build();
        let other = base.with_dst_ip(Ipv4Addr::new(10, 0, 0, 6));

        assert!(base < other);
        assert_eq!(base, other.with_dst_ip(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_parse_protocols_and_flags() {
        assert_eq!("tcp".parse(), Ok(IpProtocol::TCP));
        assert_eq!("132".parse(), Ok(IpProtocol(132)));
        assert!("sctp-ish".parse::<IpProtocol>().is_err());

        assert_eq!("SYN|ACK".parse(), Ok(TcpFlags::SYN.union(TcpFlags::ACK)));
        assert_eq!(TcpFlags::SYN.union(TcpFlags::ACK).to_string(), "SYN|ACK");
        assert_eq!("-".parse(), Ok(TcpFlags::NONE));
        assert!("SYN|BOGUS".parse::<TcpFlags>().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let flow: Flow = serde_json::from_str(
            r#"{ "ingress_node": "a", "dst_ip": "10.0.0.5", "ip_protocol": "UDP", "dst_port": 53 }"#,
        )
        .unwrap();

        assert_eq!(flow.ingress_vrf.as_ref(), DEFAULT_VRF);
        assert_eq!(flow.ip_protocol, IpProtocol::UDP);
        assert_eq!(flow.dst_port, 53);
        assert_eq!(flow.tcp_flags, TcpFlags::NONE);
    }
}
