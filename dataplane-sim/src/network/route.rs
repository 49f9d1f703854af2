//! Routes and the order in which a device prefers them
//!
//! Every protocol shares a single [`Route`] type: the protocol is a discriminant, and the
//! attributes only some protocols carry (BGP path attributes, OSPF external metadata, etc.) live
//! in [`RouteAttributes`]. Routes are immutable once built.
//!
//! Among routes to the same destination, the preferred route is the lowest under
//! [`Route::compare_preference`]: administrative cost, then metric, then a protocol-specific
//! refinement, then next hop, next hop interface and tag.

use crate::error::InvalidInput;
use crate::network::ip::Prefix;
use bon::bon;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// The next hop interface of routes that discard traffic
pub const NULL_INTERFACE: &str = "null_interface";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutingProtocol {
    Connected,
    Local,
    Static,
    Aggregate,
    Bgp,
    Ibgp,
    Ospf,
    OspfIa,
    OspfE1,
    OspfE2,
    IsisL1,
    IsisL2,
    IsisEl1,
    IsisEl2,
    Rip,
    Eigrp,
    EigrpEx,
}

impl RoutingProtocol {
    /// The administrative distance routes of this protocol get unless configured otherwise
    pub fn default_admin_cost(self) -> u32 {
        match self {
            RoutingProtocol::Connected | RoutingProtocol::Local => 0,
            RoutingProtocol::Static => 1,
            RoutingProtocol::Bgp => 20,
            RoutingProtocol::Eigrp => 90,
            RoutingProtocol::Ospf
            | RoutingProtocol::OspfIa
            | RoutingProtocol::OspfE1
            | RoutingProtocol::OspfE2 => 110,
            RoutingProtocol::IsisL1
            | RoutingProtocol::IsisL2
            | RoutingProtocol::IsisEl1
            | RoutingProtocol::IsisEl2 => 115,
            RoutingProtocol::Rip => 120,
            RoutingProtocol::EigrpEx => 170,
            RoutingProtocol::Ibgp | RoutingProtocol::Aggregate => 200,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoutingProtocol::Connected => "connected",
            RoutingProtocol::Local => "local",
            RoutingProtocol::Static => "static",
            RoutingProtocol::Aggregate => "aggregate",
            RoutingProtocol::Bgp => "bgp",
            RoutingProtocol::Ibgp => "ibgp",
            RoutingProtocol::Ospf => "ospf",
            RoutingProtocol::OspfIa => "ospfIA",
            RoutingProtocol::OspfE1 => "ospfE1",
            RoutingProtocol::OspfE2 => "ospfE2",
            RoutingProtocol::IsisL1 => "isisL1",
            RoutingProtocol::IsisL2 => "isisL2",
            RoutingProtocol::IsisEl1 => "isisEL1",
            RoutingProtocol::IsisEl2 => "isisEL2",
            RoutingProtocol::Rip => "rip",
            RoutingProtocol::Eigrp => "eigrp",
            RoutingProtocol::EigrpEx => "eigrpEX",
        }
    }
}

impl Display for RoutingProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum OriginType {
    #[default]
    Igp,
    Egp,
    Incomplete,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct BgpAttributes {
    #[serde(default)]
    pub as_path: Vec<u32>,
    #[serde(default)]
    pub communities: Vec<u32>,
    #[serde(default)]
    pub origin_type: OriginType,
    #[serde(default = "default_local_preference")]
    pub local_preference: u32,
    #[serde(default)]
    pub med: u32,
    #[serde(default = "unspecified_ip")]
    pub originator_id: Ipv4Addr,
}

impl Default for BgpAttributes {
    fn default() -> Self {
        Self {
            as_path: Vec::new(),
            communities: Vec::new(),
            origin_type: OriginType::Igp,
            local_preference: default_local_preference(),
            med: 0,
            originator_id: Ipv4Addr::UNSPECIFIED,
        }
    }
}

fn default_local_preference() -> u32 {
    100
}

fn unspecified_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OspfMetricType {
    E1,
    E2,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct OspfExternalAttributes {
    pub advertiser: String,
    pub metric_type: OspfMetricType,
    #[serde(default)]
    pub cost_to_advertiser: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsisLevel {
    Level1,
    Level2,
}

/// Protocol-specific route attributes
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RouteAttributes {
    #[default]
    None,
    Bgp(BgpAttributes),
    Ospf {
        area: u32,
    },
    OspfExternal(OspfExternalAttributes),
    Isis {
        level: IsisLevel,
        area: String,
    },
}

impl RouteAttributes {
    fn discriminant(&self) -> u8 {
        match self {
            RouteAttributes::None => 0,
            RouteAttributes::Bgp(_) => 1,
            RouteAttributes::Ospf { .. } => 2,
            RouteAttributes::OspfExternal(_) => 3,
            RouteAttributes::Isis { .. } => 4,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct Route {
    network: Prefix,
    next_hop_ip: Option<Ipv4Addr>,
    #[serde(with = "crate::util::serde_option_arc_str")]
    next_hop_interface: Option<Arc<str>>,
    administrative_cost: u32,
    metric: u64,
    tag: Option<u32>,
    protocol: RoutingProtocol,
    non_routing: bool,
    attributes: RouteAttributes,
}

#[bon]
impl Route {
    /// Builds a route, checking that it has a destination and a way to reach it
    ///
    /// The administrative cost defaults to the protocol's default. Aggregate routes without a
    /// next hop discard traffic.
    #[builder]
    pub fn new(
        network: Option<Prefix>,
        next_hop_ip: Option<Ipv4Addr>,
        #[builder(into)] next_hop_interface: Option<Arc<str>>,
        protocol: RoutingProtocol,
        administrative_cost: Option<u32>,
        #[builder(default)] metric: u64,
        tag: Option<u32>,
        #[builder(default)] non_routing: bool,
        #[builder(default)] attributes: RouteAttributes,
    ) -> Result<Self, InvalidInput> {
        let network = network.ok_or(InvalidInput::MissingNetwork)?;

        let next_hop_interface = match (next_hop_ip, next_hop_interface) {
            (None, None) if protocol == RoutingProtocol::Aggregate => {
                Some(Arc::from(NULL_INTERFACE))
            }
            (None, None) => return Err(InvalidInput::MissingNextHop { network }),
            (_, interface) => interface,
        };

        Ok(Self {
            network,
            next_hop_ip,
            next_hop_interface,
            administrative_cost: administrative_cost.unwrap_or(protocol.default_admin_cost()),
            metric,
            tag,
            protocol,
            non_routing,
            attributes,
        })
    }

    pub fn network(&self) -> Prefix {
        self.network
    }

    pub fn next_hop_ip(&self) -> Option<Ipv4Addr> {
        self.next_hop_ip
    }

    pub fn next_hop_interface(&self) -> Option<&Arc<str>> {
        self.next_hop_interface.as_ref()
    }

    pub fn administrative_cost(&self) -> u32 {
        self.administrative_cost
    }

    pub fn metric(&self) -> u64 {
        self.metric
    }

    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    pub fn protocol(&self) -> RoutingProtocol {
        self.protocol
    }

    pub fn non_routing(&self) -> bool {
        self.non_routing
    }

    pub fn attributes(&self) -> &RouteAttributes {
        &self.attributes
    }

    /// Whether the route discards the traffic it matches
    pub fn is_null_routed(&self) -> bool {
        self.next_hop_interface.as_deref() == Some(NULL_INTERFACE)
    }

    /// Compares two routes to the same destination, the preferred route being the lowest
    ///
    /// # Panics
    ///
    /// Panics if the routes have different networks: preference is only defined between
    /// alternatives for the same destination.
    pub fn compare_preference(&self, other: &Route) -> Ordering {
        assert_eq!(
            self.network, other.network,
            "attempted to compare the preference of routes to different destinations"
        );

        self.preference_cmp(other)
    }

    /// Whether two routes to the same destination are equally preferred as far as the routing
    /// protocol is concerned, which makes them candidates to be installed together (multipath)
    ///
    /// # Panics
    ///
    /// Panics if the routes have different networks.
    pub fn ties_for_multipath(&self, other: &Route) -> bool {
        assert_eq!(
            self.network, other.network,
            "attempted to compare the preference of routes to different destinations"
        );

        self.administrative_cost == other.administrative_cost
            && self.metric == other.metric
            && self.protocol_preference(other) == Ordering::Equal
    }

    fn preference_cmp(&self, other: &Route) -> Ordering {
        self.administrative_cost
            .cmp(&other.administrative_cost)
            .then_with(|| self.metric.cmp(&other.metric))
            .then_with(|| self.route_compare(other))
            .then_with(|| self.next_hop_ip.cmp(&other.next_hop_ip))
            .then_with(|| self.next_hop_interface.cmp(&other.next_hop_interface))
            .then_with(|| self.tag.cmp(&other.tag))
            .then_with(|| self.protocol.cmp(&other.protocol))
            .then_with(|| self.non_routing.cmp(&other.non_routing))
    }

    /// Protocol-specific refinement of the order: the protocol's own preference, followed by a
    /// deterministic tie-break over the remaining attributes
    fn route_compare(&self, other: &Route) -> Ordering {
        self.protocol_preference(other)
            .then_with(|| self.protocol_tie_break(other))
    }

    fn protocol_preference(&self, other: &Route) -> Ordering {
        match (&self.attributes, &other.attributes) {
            (RouteAttributes::Bgp(a), RouteAttributes::Bgp(b)) => b
                .local_preference
                .cmp(&a.local_preference)
                .then_with(|| a.as_path.len().cmp(&b.as_path.len()))
                .then_with(|| a.origin_type.cmp(&b.origin_type))
                .then_with(|| a.med.cmp(&b.med))
                .then_with(|| {
                    // External routes are preferred over internal ones
                    let a_internal = self.protocol == RoutingProtocol::Ibgp;
                    let b_internal = other.protocol == RoutingProtocol::Ibgp;
                    a_internal.cmp(&b_internal)
                }),
            (RouteAttributes::OspfExternal(a), RouteAttributes::OspfExternal(b)) => a
                .metric_type
                .cmp(&b.metric_type)
                .then_with(|| a.cost_to_advertiser.cmp(&b.cost_to_advertiser)),
            (RouteAttributes::Isis { level: a, .. }, RouteAttributes::Isis { level: b, .. }) => {
                a.cmp(b)
            }
            (a, b) => a.discriminant().cmp(&b.discriminant()),
        }
    }

    fn protocol_tie_break(&self, other: &Route) -> Ordering {
        match (&self.attributes, &other.attributes) {
            (RouteAttributes::Bgp(a), RouteAttributes::Bgp(b)) => a
                .originator_id
                .cmp(&b.originator_id)
                .then_with(|| a.as_path.cmp(&b.as_path))
                .then_with(|| a.communities.cmp(&b.communities)),
            (RouteAttributes::Ospf { area: a }, RouteAttributes::Ospf { area: b }) => a.cmp(b),
            (RouteAttributes::OspfExternal(a), RouteAttributes::OspfExternal(b)) => {
                a.advertiser.cmp(&b.advertiser)
            }
            (RouteAttributes::Isis { area: a, .. }, RouteAttributes::Isis { area: b, .. }) => {
                a.cmp(b)
            }
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Route {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Routes are placed in the RIB by destination first, and by preference among routes to the
/// same destination
impl Ord for Route {
    fn cmp(&self, other: &Self) -> Ordering {
        self.network
            .cmp(&other.network)
            .then_with(|| self.preference_cmp(other))
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.protocol, self.network)?;
        match (&self.next_hop_ip, &self.next_hop_interface) {
            (Some(ip), Some(interface)) => write!(f, " via {ip} ({interface})")?,
            (Some(ip), None) => write!(f, " via {ip}")?,
            (None, Some(interface)) => write!(f, " via {interface}")?,
            (None, None) => {}
        }
        write!(f, " [{}/{}]", self.administrative_cost, self.metric)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fastrand::Rng;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    fn bgp(network: &str, attributes: BgpAttributes) -> Route {
        Route::builder()
            .network(prefix(network))
            .next_hop_ip(Ipv4Addr::new(192, 0, 2, 1))
            .protocol(RoutingProtocol::Bgp)
            .attributes(RouteAttributes::Bgp(attributes))
            .build()
            .unwrap()
    }

    #[test]
    fn test_construction_requires_network_and_next_hop() {
        let missing_network = Route::builder()
            .next_hop_interface("eth0")
            .protocol(RoutingProtocol::Static)
            .build();
        assert_eq!(missing_network, Err(InvalidInput::MissingNetwork));

        let missing_next_hop = Route::builder()
            .network(prefix("10.0.0.0/24"))
            .protocol(RoutingProtocol::Static)
            .build();
        assert_eq!(
            missing_next_hop,
            Err(InvalidInput::MissingNextHop {
                network: prefix("10.0.0.0/24")
            })
        );

        let aggregate = Route::builder()
            .network(prefix("10.0.0.0/8"))
            .protocol(RoutingProtocol::Aggregate)
            .build()
            .unwrap();
        assert!(aggregate.is_null_routed());
        assert_eq!(aggregate.administrative_cost(), 200);
    }

    #[test]
    fn test_connected_sorts_before_static_regardless_of_metric() {
        let connected = Route::builder()
            .network(prefix("10.0.0.0/24"))
            .next_hop_interface("eth0")
            .protocol(RoutingProtocol::Connected)
            .metric(1_000)
            .build()
            .unwrap();
        let static_route = Route::builder()
            .network(prefix("10.0.0.0/24"))
            .next_hop_ip(Ipv4Addr::new(10, 0, 1, 1))
            .protocol(RoutingProtocol::Static)
            .build()
            .unwrap();

        assert_eq!(connected.administrative_cost(), 0);
        assert_eq!(static_route.administrative_cost(), 1);
        assert_eq!(connected.compare_preference(&static_route), Ordering::Less);
        assert!(connected < static_route);
    }

    #[test]
    fn test_bgp_refinement() {
        let base = BgpAttributes {
            as_path: vec![65001, 65002],
            ..Default::default()
        };

        let higher_local_pref = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                local_preference: 200,
                as_path: vec![65001, 65002, 65003],
                ..base.clone()
            },
        );
        let shorter_path = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                as_path: vec![65001],
                ..base.clone()
            },
        );
        let incomplete = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                origin_type: OriginType::Incomplete,
                ..base.clone()
            },
        );
        let lower_med = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                med: 0,
                origin_type: OriginType::Incomplete,
                ..base.clone()
            },
        );
        let higher_med = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                med: 50,
                origin_type: OriginType::Incomplete,
                ..base.clone()
            },
        );

        let mut routes = vec![
            higher_med.clone(),
            incomplete.clone(),
            shorter_path.clone(),
            higher_local_pref.clone(),
            bgp("10.0.0.0/8", base.clone()),
        ];
        routes.sort_by(Route::compare_preference);

        assert_eq!(routes[0], higher_local_pref);
        assert_eq!(routes[1], shorter_path);
        assert_eq!(routes[2], bgp("10.0.0.0/8", base.clone()));
        assert_eq!(routes[3], lower_med);
        assert_eq!(routes[4], higher_med);
    }

    #[test]
    fn test_ebgp_preferred_over_ibgp_when_admin_cost_ties() {
        let attributes = RouteAttributes::Bgp(BgpAttributes::default());
        let ebgp = Route::builder()
            .network(prefix("10.0.0.0/8"))
            .next_hop_ip(Ipv4Addr::new(192, 0, 2, 9))
            .protocol(RoutingProtocol::Bgp)
            .administrative_cost(20)
            .attributes(attributes.clone())
            .build()
            .unwrap();
        let ibgp = Route::builder()
            .network(prefix("10.0.0.0/8"))
            .next_hop_ip(Ipv4Addr::new(192, 0, 2, 1))
            .protocol(RoutingProtocol::Ibgp)
            .administrative_cost(20)
            .attributes(attributes)
            .build()
            .unwrap();

        // The internal route has the lower next hop, but the refinement decides first
        assert_eq!(ebgp.compare_preference(&ibgp), Ordering::Less);
        assert!(!ebgp.ties_for_multipath(&ibgp));
    }

    #[test]
    fn test_multipath_ties_ignore_tie_break_attributes() {
        let a = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                originator_id: Ipv4Addr::new(1, 1, 1, 1),
                ..Default::default()
            },
        );
        let b = bgp(
            "10.0.0.0/8",
            BgpAttributes {
                originator_id: Ipv4Addr::new(2, 2, 2, 2),
                ..Default::default()
            },
        );

        assert!(a.ties_for_multipath(&b));
        assert_eq!(a.compare_preference(&b), Ordering::Less);
    }

    #[test]
    fn test_ospf_external_refinement() {
        let external = |metric_type, cost_to_advertiser| {
            Route::builder()
                .network(prefix("0.0.0.0/0"))
                .next_hop_ip(Ipv4Addr::new(10, 0, 0, 1))
                .protocol(match metric_type {
                    OspfMetricType::E1 => RoutingProtocol::OspfE1,
                    OspfMetricType::E2 => RoutingProtocol::OspfE2,
                })
                .metric(20)
                .attributes(RouteAttributes::OspfExternal(OspfExternalAttributes {
                    advertiser: "asbr".to_string(),
                    metric_type,
                    cost_to_advertiser,
                }))
                .build()
                .unwrap()
        };

        let e1 = external(OspfMetricType::E1, 100);
        let e2 = external(OspfMetricType::E2, 1);
        let e2_closer = external(OspfMetricType::E2, 0);

        assert_eq!(e1.compare_preference(&e2), Ordering::Less);
        assert_eq!(e2_closer.compare_preference(&e2), Ordering::Less);
    }

    #[test]
    fn test_next_hop_interface_and_tag_break_ties() {
        let route = |interface: Option<&str>, tag: Option<u32>| {
            Route::builder()
                .network(prefix("10.0.0.0/24"))
                .next_hop_ip(Ipv4Addr::new(10, 0, 1, 1))
                .maybe_next_hop_interface(interface)
                .maybe_tag(tag)
                .protocol(RoutingProtocol::Static)
                .build()
                .unwrap()
        };

        assert_eq!(
            route(None, None).compare_preference(&route(Some("eth0"), None)),
            Ordering::Less
        );
        assert_eq!(
            route(Some("eth0"), None).compare_preference(&route(Some("eth1"), None)),
            Ordering::Less
        );
        assert_eq!(
            route(Some("eth0"), None).compare_preference(&route(Some("eth0"), Some(0))),
            Ordering::Less
        );
        assert_eq!(
            route(Some("eth0"), Some(7)).compare_preference(&route(Some("eth0"), Some(7))),
            Ordering::Equal
        );
    }

    #[test]
    #[should_panic(expected = "different destinations")]
    fn test_comparing_different_destinations_panics() {
        let a = bgp("10.0.0.0/8", BgpAttributes::default());
        let b = bgp("11.0.0.0/8", BgpAttributes::default());
        a.compare_preference(&b);
    }

    fn random_route(rng: &mut Rng) -> Route {
        let protocols = [
            RoutingProtocol::Connected,
            RoutingProtocol::Static,
            RoutingProtocol::Bgp,
            RoutingProtocol::Ibgp,
            RoutingProtocol::Ospf,
            RoutingProtocol::OspfE2,
            RoutingProtocol::IsisL2,
        ];
        let protocol = protocols[rng.usize(..protocols.len())];
        let attributes = match rng.u8(0..5) {
            0 => RouteAttributes::None,
            1 => RouteAttributes::Bgp(BgpAttributes {
                as_path: (0..rng.usize(0..3)).map(|_| rng.u32(65000..65003)).collect(),
                communities: (0..rng.usize(0..2)).map(|_| rng.u32(0..3)).collect(),
                origin_type: [OriginType::Igp, OriginType::Egp, OriginType::Incomplete]
                    [rng.usize(0..3)],
                local_preference: rng.u32(99..=101),
                med: rng.u32(0..2),
                originator_id: Ipv4Addr::new(1, 1, 1, rng.u8(0..2)),
            }),
            2 => RouteAttributes::Ospf { area: rng.u32(0..2) },
            3 => RouteAttributes::OspfExternal(OspfExternalAttributes {
                advertiser: ["r1", "r2"][rng.usize(0..2)].to_string(),
                metric_type: [OspfMetricType::E1, OspfMetricType::E2][rng.usize(0..2)],
                cost_to_advertiser: rng.u64(0..2),
            }),
            _ => RouteAttributes::Isis {
                level: [IsisLevel::Level1, IsisLevel::Level2][rng.usize(0..2)],
                area: ["49.0001", "49.0002"][rng.usize(0..2)].to_string(),
            },
        };

        Route::builder()
            .network(prefix("10.0.0.0/24"))
            .maybe_next_hop_ip(rng.bool().then(|| Ipv4Addr::new(10, 0, 1, rng.u8(1..3))))
            .next_hop_interface(["eth0", "eth1"][rng.usize(0..2)])
            .protocol(protocol)
            .administrative_cost(rng.u32(0..3))
            .metric(rng.u64(0..3))
            .maybe_tag(rng.bool().then(|| rng.u32(0..2)))
            .non_routing(rng.u8(0..10) == 0)
            .attributes(attributes)
            .build()
            .unwrap()
    }

    #[test]
    fn test_preference_is_a_total_order() {
        let mut rng = Rng::with_seed(7);
        let routes: Vec<_> = (0..120).map(|_| random_route(&mut rng)).collect();

        for a in &routes {
            for b in &routes {
                let ab = a.compare_preference(b);
                let ba = b.compare_preference(a);

                // Exactly one of <, ==, > holds, consistently in both directions
                assert_eq!(ab, ba.reverse(), "{a} vs {b}");

                // Equality under the order coincides with structural equality
                assert_eq!(ab == Ordering::Equal, a == b, "{a} vs {b}");
            }
        }

        for a in &routes {
            for b in &routes {
                if a.compare_preference(b) != Ordering::Less {
                    continue;
                }
                for c in &routes {
                    if b.compare_preference(c) == Ordering::Less {
                        assert_eq!(a.compare_preference(c), Ordering::Less, "{a} < {b} < {c}");
                    }
                }
            }
        }
    }
}
