use crate::filter::acl::IpAccessList;
use crate::network::Interface;
use crate::network::route::Route;
use crate::network::topology::{Edge, NodeInterfacePair};
use std::sync::Arc;

/// Everything needed to build a [`DataPlane`](crate::network::DataPlane)
#[derive(Clone, Debug, Default)]
pub struct DataPlaneSpec {
    pub devices: Vec<DeviceSpec>,
    pub links: Vec<Edge>,
    /// Interfaces delivering traffic to hosts outside the modeled network
    pub flow_sinks: Vec<NodeInterfacePair>,
}

#[derive(Clone, Debug)]
pub struct DeviceSpec {
    pub name: Arc<str>,
    pub interfaces: Vec<Interface>,
    pub vrfs: Vec<VrfSpec>,
    pub filters: Vec<IpAccessList>,
}

#[derive(Clone, Debug)]
pub struct VrfSpec {
    pub name: Arc<str>,
    /// The maximum number of equally preferred routes installed per destination
    pub max_paths: usize,
    /// Candidate routes (connected routes are derived from interface addresses)
    pub routes: Vec<Route>,
}
