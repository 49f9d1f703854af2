//! The simulated data plane
//!
//! A [`DataPlane`] is built once from a [`DataPlaneSpec`] and is read-only afterwards, so it can
//! be shared between concurrent traces. Devices that fail validation are left out and reported,
//! without affecting the rest of the network.

pub mod ip;
pub mod rib;
pub mod route;
pub mod spec;
pub mod topology;

use crate::error::DataPlaneError;
use crate::filter::acl::IpAccessList;
use crate::filter::transformation::Transformation;
use crate::network::ip::Ipv4Cidr;
use crate::network::rib::Rib;
use crate::network::route::{NULL_INTERFACE, Route, RoutingProtocol};
use crate::network::spec::{DataPlaneSpec, DeviceSpec};
use crate::network::topology::{NodeInterfacePair, Topology};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// The VRF interfaces and flows belong to unless stated otherwise
pub const DEFAULT_VRF: &str = "default";

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Interface {
    #[serde(with = "crate::util::serde_arc_str")]
    pub name: Arc<str>,
    #[serde(with = "crate::util::serde_arc_str", default = "default_vrf")]
    pub vrf: Arc<str>,
    #[serde(default)]
    pub address: Option<Ipv4Cidr>,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(with = "crate::util::serde_option_arc_str", default)]
    pub incoming_filter: Option<Arc<str>>,
    #[serde(with = "crate::util::serde_option_arc_str", default)]
    pub outgoing_filter: Option<Arc<str>>,
    /// Destination NAT rules applied to traffic entering through this interface
    #[serde(default)]
    pub incoming_transformations: Vec<Transformation>,
    /// Source NAT rules applied to traffic leaving through this interface
    #[serde(default)]
    pub outgoing_transformations: Vec<Transformation>,
}

impl Interface {
    /// An active interface in the default VRF, without filters or NAT
    pub fn new(name: impl Into<Arc<str>>, address: Option<Ipv4Cidr>) -> Self {
        Self {
            name: name.into(),
            vrf: default_vrf(),
            address,
            active: true,
            incoming_filter: None,
            outgoing_filter: None,
            incoming_transformations: Vec::new(),
            outgoing_transformations: Vec::new(),
        }
    }
}

fn default_vrf() -> Arc<str> {
    Arc::from(DEFAULT_VRF)
}

fn active_by_default() -> bool {
    true
}

#[derive(Clone, Debug)]
pub struct Vrf {
    pub name: Arc<str>,
    pub rib: Rib,
}

#[derive(Clone, Debug)]
pub struct Device {
    name: Arc<str>,
    interfaces: BTreeMap<Arc<str>, Interface>,
    vrfs: BTreeMap<Arc<str>, Vrf>,
    filters: BTreeMap<Arc<str>, IpAccessList>,
}

impl Device {
    fn build(spec: DeviceSpec) -> Result<Self, DataPlaneError> {
        let device = spec.name;

        let filters: BTreeMap<_, _> = spec
            .filters
            .into_iter()
            .map(|acl| (acl.name.clone(), acl))
            .collect();

        let mut vrfs: BTreeMap<Arc<str>, Vrf> = BTreeMap::new();
        vrfs.insert(
            default_vrf(),
            Vrf {
                name: default_vrf(),
                rib: Rib::default(),
            },
        );
        let mut declared = BTreeSet::new();
        for vrf in &spec.vrfs {
            if !declared.insert(vrf.name.clone()) {
                return Err(DataPlaneError::DuplicateVrf {
                    device,
                    vrf: vrf.name.clone(),
                });
            }

            vrfs.insert(
                vrf.name.clone(),
                Vrf {
                    name: vrf.name.clone(),
                    rib: Rib::new(vrf.max_paths),
                },
            );
        }

        let mut interfaces = BTreeMap::new();
        for interface in spec.interfaces {
            if !vrfs.contains_key(&interface.vrf) {
                return Err(DataPlaneError::UnknownVrf {
                    device,
                    interface: interface.name,
                    vrf: interface.vrf,
                });
            }

            let filter_names = [&interface.incoming_filter, &interface.outgoing_filter];
            for filter in filter_names.into_iter().flatten() {
                if !filters.contains_key(filter) {
                    return Err(DataPlaneError::UnknownFilter {
                        device,
                        filter: filter.clone(),
                    });
                }
            }

            interfaces.insert(interface.name.clone(), interface);
        }

        for vrf_spec in spec.vrfs {
            for route in vrf_spec.routes {
                if let Some(interface) = route.next_hop_interface() {
                    if &**interface != NULL_INTERFACE && !interfaces.contains_key(interface) {
                        return Err(DataPlaneError::UnknownInterface {
                            device,
                            interface: interface.clone(),
                        });
                    }
                }

                if let Some(vrf) = vrfs.get_mut(&vrf_spec.name) {
                    vrf.rib.add(route);
                }
            }
        }

        // Connected routes for every active, addressed interface
        for interface in interfaces.values().filter(|i| i.active) {
            let Some(address) = interface.address else {
                continue;
            };

            let connected = Route::builder()
                .network(address.prefix())
                .next_hop_interface(interface.name.clone())
                .protocol(RoutingProtocol::Connected)
                .build()
                .map_err(|source| DataPlaneError::InvalidRoute {
                    device: device.clone(),
                    source,
                })?;

            if let Some(vrf) = vrfs.get_mut(&interface.vrf) {
                vrf.rib.add(connected);
            }
        }

        Ok(Self {
            name: device,
            interfaces,
            vrfs,
            filters,
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub fn vrf(&self, name: &str) -> Option<&Vrf> {
        self.vrfs.get(name)
    }

    pub fn vrfs(&self) -> impl Iterator<Item = &Vrf> {
        self.vrfs.values()
    }

    pub fn filter(&self, name: &str) -> Option<&IpAccessList> {
        self.filters.get(name)
    }

    /// Whether `ip` is assigned to one of the device's active interfaces
    pub fn owns_ip(&self, ip: Ipv4Addr) -> bool {
        self.interfaces()
            .any(|i| i.active && i.address.is_some_and(|a| a.address() == ip))
    }

    /// Whether `ip` lies in a subnet directly attached to an active interface in `vrf`
    pub fn connected_subnet_contains(&self, vrf: &str, ip: Ipv4Addr) -> bool {
        self.interfaces().any(|i| {
            i.active && &*i.vrf == vrf && i.address.is_some_and(|a| a.prefix().contains_ip(ip))
        })
    }
}

/// The result of building a data plane: the devices that could be built, and why the others
/// could not
pub struct BuiltDataPlane {
    pub data_plane: DataPlane,
    pub failures: Vec<DataPlaneError>,
}

#[derive(Clone, Debug)]
pub struct DataPlane {
    devices: BTreeMap<Arc<str>, Device>,
    topology: Arc<Topology>,
    flow_sinks: BTreeSet<NodeInterfacePair>,
}

impl DataPlane {
    pub fn build(spec: DataPlaneSpec) -> BuiltDataPlane {
        let mut devices = BTreeMap::new();
        let mut failures = Vec::new();
        let mut seen = BTreeSet::new();

        for device_spec in spec.devices {
            if !seen.insert(device_spec.name.clone()) {
                // Neither definition can be trusted
                devices.remove(&device_spec.name);
                failures.push(DataPlaneError::DuplicateDevice {
                    device: device_spec.name,
                });
                continue;
            }

            match Device::build(device_spec) {
                Ok(device) => {
                    devices.insert(device.name.clone(), device);
                }
                Err(e) => {
                    tracing::warn!(device = %e.device(), "skipping device: {e}");
                    failures.push(e);
                }
            }
        }

        let interface_exists = |pair: &NodeInterfacePair| {
            devices
                .get(&pair.node)
                .is_some_and(|d: &Device| d.interface(&pair.interface).is_some())
        };

        let links = spec.links.into_iter().filter(|edge| {
            let valid = interface_exists(&edge.tail) && interface_exists(&edge.head);
            if !valid {
                tracing::debug!(%edge, "ignoring link with an unknown endpoint");
            }
            valid
        });
        let topology = Arc::new(Topology::new(links));

        let flow_sinks = spec
            .flow_sinks
            .into_iter()
            .filter(|sink| interface_exists(sink))
            .collect();

        BuiltDataPlane {
            data_plane: DataPlane {
                devices,
                topology,
                flow_sinks,
            },
            failures,
        }
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// The topology of the snapshot, restricted to links between known interfaces
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn flow_sinks(&self) -> &BTreeSet<NodeInterfacePair> {
        &self.flow_sinks
    }

    pub fn is_flow_sink(&self, interface: &NodeInterfacePair) -> bool {
        self.flow_sinks.contains(interface)
    }
}
