use crate::filter::cache::FilterCache;
use crate::filter::transformation::{FlowChange, apply_first};
use crate::flow::Flow;
use crate::network::ip::Prefix;
use crate::network::route::Route;
use crate::network::topology::{Edge, NodeInterfacePair, Topology};
use crate::network::{DataPlane, Device, Vrf};
use crate::trace::flow_trace::{FlowDisposition, FlowTrace, FlowTraceHop};
use crate::trace::settings::{MultipathPolicy, TraceSettings};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// How many recursive lookups are allowed when resolving a next hop ip to an interface
const MAX_RESOLUTION_DEPTH: usize = 8;

/// Upper bound on the number of traces produced for a single flow; further multipath choices
/// follow only the first path
const MAX_TRACES_PER_FLOW: usize = 256;

/// Walks flows hop by hop through a data plane
///
/// The tracer only reads the data plane and topology, so any number of tracers can work on the
/// same snapshot concurrently.
pub struct FlowTracer<'a> {
    data_plane: &'a DataPlane,
    topology: &'a Topology,
    settings: &'a TraceSettings,
    filter_cache: &'a FilterCache,
}

/// A packet sitting at a device, together with the path it took to get there
#[derive(Clone)]
struct Branch {
    node: Arc<str>,
    vrf: Arc<str>,
    ingress_interface: Option<Arc<str>>,
    flow: Flow,
    /// Whether the current device rewrote the flow
    transformed: bool,
    hops: Vec<FlowTraceHop>,
    notes: Vec<String>,
}

impl Branch {
    fn finish(self, disposition: FlowDisposition) -> Step {
        tracing::debug!(
            node = %self.node,
            %disposition,
            hops = self.hops.len(),
            "trace finished"
        );

        Step::Done(FlowTrace {
            disposition,
            hops: self.hops,
            notes: self.notes,
        })
    }

    fn finish_with_note(mut self, disposition: FlowDisposition, note: String) -> Step {
        self.notes.push(note);
        self.finish(disposition)
    }

    fn rewrite(&mut self, device: &Device, flow: Flow) {
        self.notes.push(format!(
            "{}: {}",
            device.name(),
            FlowChange {
                before: &self.flow,
                after: &flow
            }
        ));
        self.flow = flow;
        self.transformed = true;
    }
}

enum Step {
    Continue(Branch),
    Done(FlowTrace),
}

/// An outgoing interface and next hop obtained by resolving one or more routes
#[derive(Clone)]
struct ForwardingPath {
    interface: Arc<str>,
    next_hop: Option<Ipv4Addr>,
    /// The route that matched the destination, followed by the routes used to resolve it
    routes: Vec<Route>,
}

impl<'a> FlowTracer<'a> {
    pub fn new(
        data_plane: &'a DataPlane,
        topology: &'a Topology,
        settings: &'a TraceSettings,
        filter_cache: &'a FilterCache,
    ) -> Self {
        Self {
            data_plane,
            topology,
            settings,
            filter_cache,
        }
    }

    /// Traces a flow from its ingress point, returning one trace per path it can take
    ///
    /// Traces are returned in a deterministic order, following lower interfaces and next hops
    /// first.
    pub fn trace(&self, flow: &Flow) -> Vec<FlowTrace> {
        let start = Branch {
            node: flow.ingress_node.clone(),
            vrf: flow.ingress_vrf.clone(),
            ingress_interface: flow.ingress_interface.clone(),
            flow: flow.clone(),
            transformed: false,
            hops: Vec::new(),
            notes: Vec::new(),
        };

        let mut traces = Vec::new();
        let mut pending = vec![Step::Continue(start)];
        while let Some(next) = pending.pop() {
            match next {
                Step::Done(trace) => traces.push(trace),
                Step::Continue(branch) => {
                    let budget = MAX_TRACES_PER_FLOW.saturating_sub(traces.len() + pending.len());
                    pending.extend(self.step(branch, budget).into_iter().rev());
                }
            }
        }

        traces
    }

    /// Processes a packet at a device, up to the point where it leaves (or is disposed of)
    fn step(&self, mut branch: Branch, budget: usize) -> Vec<Step> {
        let Some(device) = self.data_plane.device(&branch.node) else {
            let note = format!("node `{}` is not part of the data plane", branch.node);
            return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
        };

        if let Some(name) = branch.ingress_interface.clone() {
            let Some(interface) = device.interface(&name) else {
                let note = format!("unknown ingress interface `{}:{name}`", device.name());
                return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
            };

            branch.vrf = interface.vrf.clone();
            if let Some(flow) = apply_first(&interface.incoming_transformations, &branch.flow) {
                branch.rewrite(device, flow);
            }

            if let Some(denial) =
                self.denied_by(device, interface.incoming_filter.as_ref(), &branch.flow)
            {
                return vec![branch.finish_with_note(FlowDisposition::DeniedIn, denial)];
            }
        }

        let dst_ip = branch.flow.dst_ip;
        if device.owns_ip(dst_ip) {
            return vec![branch.finish(FlowDisposition::Accepted)];
        }

        let Some(vrf) = device.vrf(&branch.vrf) else {
            let note = format!("unknown vrf `{}` on `{}`", branch.vrf, device.name());
            return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
        };

        let Some((prefix, routes)) = vrf.rib.longest_prefix_match(dst_ip) else {
            let note = format!(
                "{}: no route to {dst_ip} in vrf `{}`",
                device.name(),
                vrf.name
            );
            return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
        };

        if routes.iter().all(Route::is_null_routed) {
            let note = format!("{}: {prefix} is null routed", device.name());
            return vec![branch.finish_with_note(FlowDisposition::NullRouted, note)];
        }

        let paths = Resolver::new(device, vrf).prefix_paths(prefix, routes, 0);
        if paths.is_empty() {
            let note = format!(
                "{}: unable to resolve the next hop of any route to {prefix}",
                device.name()
            );
            return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
        }

        let paths = self.select(paths, budget, &mut branch.notes, |path| match path.next_hop {
            Some(ip) => format!("{}: {} via {ip}", device.name(), path.interface),
            None => format!("{}: {}", device.name(), path.interface),
        });

        let budget = budget / paths.len();
        paths
            .into_iter()
            .flat_map(|path| self.egress(device, branch.clone(), path, budget))
            .collect()
    }

    /// Sends a packet out of an interface, towards the neighbor on the other side
    fn egress(
        &self,
        device: &Device,
        mut branch: Branch,
        path: ForwardingPath,
        budget: usize,
    ) -> Vec<Step> {
        let Some(interface) = device.interface(&path.interface) else {
            let note = format!("unknown interface `{}:{}`", device.name(), path.interface);
            return vec![branch.finish_with_note(FlowDisposition::NoRoute, note)];
        };

        if let Some(denial) =
            self.denied_by(device, interface.outgoing_filter.as_ref(), &branch.flow)
        {
            return vec![branch.finish_with_note(FlowDisposition::DeniedOut, denial)];
        }

        if let Some(flow) = apply_first(&interface.outgoing_transformations, &branch.flow) {
            branch.rewrite(device, flow);
        }

        let out = NodeInterfacePair::new(device.name().clone(), interface.name.clone());
        if self.data_plane.is_flow_sink(&out) {
            return vec![branch.finish(FlowDisposition::Accepted)];
        }

        let dst_ip = branch.flow.dst_ip;
        let edges: Vec<_> = self
            .topology
            .outgoing_edges(&out)
            .iter()
            .filter(|e| self.is_active(&e.head))
            .collect();

        if edges.is_empty() {
            let disposition = if device.connected_subnet_contains(&interface.vrf, dst_ip) {
                FlowDisposition::NeighborUnreachable
            } else {
                FlowDisposition::NoRoute
            };
            let note = format!("no active neighbor on {out}");
            return vec![branch.finish_with_note(disposition, note)];
        }

        // Prefer the neighbor that owns the address we are sending to
        let target = path.next_hop.unwrap_or(dst_ip);
        let owners: Vec<_> = edges
            .iter()
            .copied()
            .filter(|e| self.interface_address(&e.head) == Some(target))
            .collect();
        let edges = if owners.is_empty() { edges } else { owners };

        let edges = self.select(edges, budget, &mut branch.notes, |edge| edge.to_string());
        edges
            .into_iter()
            .map(|edge| self.cross(branch.clone(), edge, &path.routes))
            .collect()
    }

    fn cross(&self, mut branch: Branch, edge: &Edge, routes: &[Route]) -> Step {
        if branch.hops.len() >= self.settings.max_hops {
            let note = format!("exceeded the limit of {} hops", self.settings.max_hops);
            return branch.finish_with_note(FlowDisposition::HopLimitExceeded, note);
        }

        tracing::debug!(%edge, flow = %branch.flow, "forwarding");

        let transformed_flow = branch.transformed.then(|| branch.flow.clone());
        branch.hops.push(FlowTraceHop {
            edge: edge.clone(),
            routes: routes.to_vec(),
            transformed_flow,
        });

        Step::Continue(Branch {
            node: edge.head.node.clone(),
            ingress_interface: Some(edge.head.interface.clone()),
            transformed: false,
            ..branch
        })
    }

    /// Narrows a set of equally good alternatives according to the multipath policy
    fn select<T>(
        &self,
        mut alternatives: Vec<T>,
        budget: usize,
        notes: &mut Vec<String>,
        describe: impl Fn(&T) -> String,
    ) -> Vec<T> {
        if alternatives.len() <= 1 {
            return alternatives;
        }

        if self.settings.multipath == MultipathPolicy::Branch && alternatives.len() <= budget {
            return alternatives;
        }

        notes.push(format!(
            "multipath: {} alternatives, following {}",
            alternatives.len(),
            describe(&alternatives[0])
        ));
        alternatives.truncate(1);
        alternatives
    }

    /// Describes the filter line denying `flow`, or returns `None` if the flow is permitted
    fn denied_by(&self, device: &Device, filter: Option<&Arc<str>>, flow: &Flow) -> Option<String> {
        let acl = device.filter(filter?)?;
        let result = self.filter_cache.filter(device.name(), acl, flow);
        (!result.is_permitted())
            .then(|| format!("{}: denied by {}", device.name(), acl.describe(&result)))
    }

    fn is_active(&self, pair: &NodeInterfacePair) -> bool {
        self.data_plane
            .device(&pair.node)
            .and_then(|d| d.interface(&pair.interface))
            .is_some_and(|i| i.active)
    }

    fn interface_address(&self, pair: &NodeInterfacePair) -> Option<Ipv4Addr> {
        self.data_plane
            .device(&pair.node)?
            .interface(&pair.interface)?
            .address
            .map(|a| a.address())
    }
}

/// Resolves routes to outgoing interfaces within a single device visit
///
/// Each prefix is resolved at most once. A prefix whose resolution is still in progress resolves
/// to nothing, so a route never resolves through itself (directly or through other routes).
struct Resolver<'a> {
    device: &'a Device,
    vrf: &'a Vrf,
    resolved: BTreeMap<Prefix, Vec<ForwardingPath>>,
    in_progress: BTreeSet<Prefix>,
}

impl<'a> Resolver<'a> {
    fn new(device: &'a Device, vrf: &'a Vrf) -> Self {
        Self {
            device,
            vrf,
            resolved: BTreeMap::new(),
            in_progress: BTreeSet::new(),
        }
    }

    /// The distinct paths of the usable routes installed for `prefix`, lowest first
    fn prefix_paths(
        &mut self,
        prefix: Prefix,
        routes: &'a [Route],
        depth: usize,
    ) -> Vec<ForwardingPath> {
        if let Some(paths) = self.resolved.get(&prefix) {
            return paths.clone();
        }
        if !self.in_progress.insert(prefix) {
            return Vec::new();
        }

        let mut paths = Vec::new();
        for route in routes.iter().filter(|r| !r.is_null_routed()) {
            paths.extend(self.route_paths(route, depth));
        }
        paths.sort_by(|a, b| (&a.interface, a.next_hop).cmp(&(&b.interface, b.next_hop)));
        paths.dedup_by(|a, b| a.interface == b.interface && a.next_hop == b.next_hop);

        self.in_progress.remove(&prefix);
        self.resolved.insert(prefix, paths.clone());
        paths
    }

    /// The paths through which `route` forwards traffic
    fn route_paths(&mut self, route: &Route, depth: usize) -> Vec<ForwardingPath> {
        if let Some(interface) = route.next_hop_interface() {
            if !self.device.interface(interface).is_some_and(|i| i.active) {
                return Vec::new();
            }

            return vec![ForwardingPath {
                interface: interface.clone(),
                next_hop: route.next_hop_ip(),
                routes: vec![route.clone()],
            }];
        }

        let Some(next_hop) = route.next_hop_ip() else {
            return Vec::new();
        };
        if depth == MAX_RESOLUTION_DEPTH {
            return Vec::new();
        }
        let vrf = self.vrf;
        let Some((prefix, resolving_routes)) = vrf.rib.longest_prefix_match(next_hop) else {
            return Vec::new();
        };

        self.prefix_paths(prefix, resolving_routes, depth + 1)
            .into_iter()
            .map(|path| ForwardingPath {
                interface: path.interface,
                next_hop: path.next_hop.or(Some(next_hop)),
                routes: std::iter::once(route.clone()).chain(path.routes).collect(),
            })
            .collect()
    }
}
