use anyhow::Context;
use dataplane_sim::error::DataPlaneError;
use dataplane_sim::filter::acl::IpAccessList;
use dataplane_sim::network::Interface;
use dataplane_sim::network::ip::Prefix;
use dataplane_sim::network::route::{Route, RouteAttributes, RoutingProtocol};
use dataplane_sim::network::spec::{DataPlaneSpec, DeviceSpec, VrfSpec};
use dataplane_sim::network::topology::{Edge, NodeInterfacePair};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

/// A snapshot ready to be turned into a data plane, together with the devices that had to be
/// left out because their configuration could not be understood
pub struct Snapshot {
    pub spec: DataPlaneSpec,
    pub skipped: Vec<SkippedDevice>,
}

pub struct SkippedDevice {
    pub device: String,
    pub error: anyhow::Error,
}

pub fn load(path: &Path) -> anyhow::Result<Snapshot> {
    let json: SnapshotJson = super::read_json(path, "snapshot")?;
    Ok(json.into_snapshot())
}

#[derive(Deserialize)]
struct SnapshotJson {
    /// Devices are parsed one by one, so a malformed device doesn't invalidate the snapshot
    devices: Vec<serde_json::Value>,
    #[serde(default)]
    links: Vec<LinkJson>,
    #[serde(default)]
    flow_sinks: Vec<NodeInterfacePair>,
}

#[derive(Deserialize)]
struct DeviceJson {
    name: String,
    #[serde(default)]
    interfaces: Vec<Interface>,
    #[serde(default)]
    vrfs: Vec<VrfJson>,
    #[serde(default)]
    filters: Vec<IpAccessList>,
}

#[derive(Deserialize)]
struct VrfJson {
    name: String,
    /// The maximum number of equally good routes installed per destination
    #[serde(default = "default_max_paths")]
    max_paths: usize,
    #[serde(default)]
    routes: Vec<RouteJson>,
}

fn default_max_paths() -> usize {
    1
}

#[derive(Deserialize)]
struct RouteJson {
    #[serde(default)]
    network: Option<Prefix>,
    #[serde(default)]
    next_hop_ip: Option<Ipv4Addr>,
    #[serde(default)]
    next_hop_interface: Option<String>,
    protocol: RoutingProtocol,
    /// Defaults to the protocol's administrative distance
    #[serde(default)]
    administrative_cost: Option<u32>,
    #[serde(default)]
    metric: u64,
    #[serde(default)]
    tag: Option<u32>,
    #[serde(default)]
    non_routing: bool,
    #[serde(default)]
    attributes: RouteAttributes,
}

#[derive(Deserialize)]
struct LinkJson {
    a: NodeInterfacePair,
    b: NodeInterfacePair,
}

impl SnapshotJson {
    fn into_snapshot(self) -> Snapshot {
        let mut devices = Vec::new();
        let mut skipped = Vec::new();
        for (i, value) in self.devices.into_iter().enumerate() {
            let name = value
                .get("name")
                .and_then(|name| name.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{i}"));

            let device = serde_json::from_value::<DeviceJson>(value)
                .context("malformed device")
                .and_then(|device| device.into_spec().map_err(anyhow::Error::from));

            match device {
                Ok(device) => devices.push(device),
                Err(error) => {
                    tracing::warn!(device = %name, "skipping device: {error:#}");
                    skipped.push(SkippedDevice {
                        device: name,
                        error,
                    });
                }
            }
        }

        let links = self
            .links
            .into_iter()
            .map(|link| Edge::new(link.a, link.b))
            .collect();

        Snapshot {
            spec: DataPlaneSpec {
                devices,
                links,
                flow_sinks: self.flow_sinks,
            },
            skipped,
        }
    }
}

impl DeviceJson {
    fn into_spec(self) -> Result<DeviceSpec, DataPlaneError> {
        let device: Arc<str> = self.name.into();

        let mut vrfs = Vec::new();
        for vrf in self.vrfs {
            let routes = vrf
                .routes
                .into_iter()
                .map(|r| r.into_route(&device))
                .collect::<Result<_, _>>()?;

            vrfs.push(VrfSpec {
                name: vrf.name.into(),
                max_paths: vrf.max_paths,
                routes,
            });
        }

        Ok(DeviceSpec {
            name: device,
            interfaces: self.interfaces,
            vrfs,
            filters: self.filters,
        })
    }
}

impl RouteJson {
    fn into_route(self, device: &Arc<str>) -> Result<Route, DataPlaneError> {
        Route::builder()
            .maybe_network(self.network)
            .maybe_next_hop_ip(self.next_hop_ip)
            .maybe_next_hop_interface(self.next_hop_interface)
            .protocol(self.protocol)
            .maybe_administrative_cost(self.administrative_cost)
            .metric(self.metric)
            .maybe_tag(self.tag)
            .non_routing(self.non_routing)
            .attributes(self.attributes)
            .build()
            .map_err(|source| DataPlaneError::InvalidRoute {
                device: device.clone(),
                source,
            })
    }
}
