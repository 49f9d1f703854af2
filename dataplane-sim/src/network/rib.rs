use crate::network::ip::Prefix;
use crate::network::route::Route;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// The routing table of a single VRF
///
/// Keeps every candidate route, sorted by preference, and the routes installed for forwarding:
/// per destination, the best route plus the routes tying with it for multipath (at most
/// `max_paths` in total). Non-routing routes are kept as candidates but never installed.
#[derive(Clone, Debug)]
pub struct Rib {
    max_paths: usize,
    candidates: BTreeMap<Prefix, Vec<Route>>,
    installed: BTreeMap<Prefix, Vec<Route>>,
}

impl Rib {
    pub fn new(max_paths: usize) -> Self {
        Self {
            max_paths: max_paths.max(1),
            candidates: BTreeMap::new(),
            installed: BTreeMap::new(),
        }
    }

    pub fn max_paths(&self) -> usize {
        self.max_paths
    }

    /// Adds a candidate route, returning false if an identical route was already present
    pub fn add(&mut self, route: Route) -> bool {
        let network = route.network();
        let candidates = self.candidates.entry(network).or_default();
        let Err(position) = candidates.binary_search_by(|r| r.compare_preference(&route)) else {
            return false;
        };

        candidates.insert(position, route);
        self.reinstall(network);
        true
    }

    fn reinstall(&mut self, network: Prefix) {
        let mut routable = self.candidates[&network].iter().filter(|r| !r.non_routing());
        let Some(best) = routable.next() else {
            self.installed.remove(&network);
            return;
        };

        let mut installed = vec![best.clone()];
        installed.extend(
            routable
                .take_while(|r| r.ties_for_multipath(best))
                .take(self.max_paths - 1)
                .cloned(),
        );

        self.installed.insert(network, installed);
    }

    /// All candidate routes to `network`, most preferred first
    pub fn candidates(&self, network: &Prefix) -> &[Route] {
        self.candidates.get(network).map(Vec::as_slice).unwrap_or_default()
    }

    /// The routes to `network` used for forwarding, most preferred first
    pub fn best_routes(&self, network: &Prefix) -> &[Route] {
        self.installed.get(network).map(Vec::as_slice).unwrap_or_default()
    }

    /// Finds the most specific installed network containing `ip`
    pub fn longest_prefix_match(&self, ip: Ipv4Addr) -> Option<(Prefix, &[Route])> {
        (0..=Prefix::MAX_LENGTH).rev().find_map(|length| {
            let prefix = Prefix::new(ip, length).ok()?;
            self.installed
                .get(&prefix)
                .map(|routes| (prefix, routes.as_slice()))
        })
    }

    /// Every installed route, ordered by destination and preference
    pub fn installed_routes(&self) -> impl Iterator<Item = &Route> {
        self.installed.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

impl Default for Rib {
    fn default() -> Self {
        Self::new(1)
    }
}
