use crate::error::InvalidInput;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// An interface, identified by the node it belongs to
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct NodeInterfacePair {
    pub node: Arc<str>,
    pub interface: Arc<str>,
}

impl NodeInterfacePair {
    pub fn new(node: impl Into<Arc<str>>, interface: impl Into<Arc<str>>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }
}

impl Display for NodeInterfacePair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

impl Debug for NodeInterfacePair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for NodeInterfacePair {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((node, interface)) if !node.is_empty() && !interface.is_empty() => {
                Ok(Self::new(node, interface))
            }
            _ => Err(InvalidInput::InvalidInterfaceReference(s.to_string())),
        }
    }
}

/// A directed link between two interfaces
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Edge {
    pub tail: NodeInterfacePair,
    pub head: NodeInterfacePair,
}

impl Edge {
    pub fn new(tail: NodeInterfacePair, head: NodeInterfacePair) -> Self {
        Self { tail, head }
    }

    pub fn reversed(&self) -> Edge {
        Edge {
            tail: self.head.clone(),
            head: self.tail.clone(),
        }
    }

    /// The same link with its endpoints in a fixed order, used to store links undirected
    fn canonical(self) -> Edge {
        if self.tail <= self.head {
            self
        } else {
            self.reversed()
        }
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.tail, self.head)
    }
}

impl Debug for Edge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Layer-3 adjacencies between interfaces
///
/// Links are stored undirected (adding `a -> b` and `b -> a` yields a single link) and can be
/// traversed in both directions. A topology never changes after construction: the `without_*`
/// methods return narrowed copies, to answer what-if questions about failures.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Topology {
    links: BTreeSet<Edge>,
    by_interface: BTreeMap<NodeInterfacePair, Vec<Edge>>,
    by_node: BTreeMap<Arc<str>, Vec<Edge>>,
}

impl Topology {
    pub fn new(links: impl IntoIterator<Item = Edge>) -> Self {
        let links: BTreeSet<_> = links
            .into_iter()
            .filter(|edge| edge.tail != edge.head)
            .map(Edge::canonical)
            .collect();

        let mut by_interface: BTreeMap<_, Vec<_>> = BTreeMap::new();
        let mut by_node: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for link in &links {
            for edge in [link.clone(), link.reversed()] {
                by_interface
                    .entry(edge.tail.clone())
                    .or_default()
                    .push(edge.clone());
                by_node
                    .entry(edge.tail.node.clone())
                    .or_default()
                    .push(edge);
            }
        }

        for edges in by_interface.values_mut().chain(by_node.values_mut()) {
            edges.sort();
        }

        Self {
            links,
            by_interface,
            by_node,
        }
    }

    /// The links of the topology, each reported once in canonical direction
    pub fn links(&self) -> impl Iterator<Item = &Edge> {
        self.links.iter()
    }

    /// The directed edges leaving through `interface`
    pub fn outgoing_edges(&self, interface: &NodeInterfacePair) -> &[Edge] {
        self.by_interface
            .get(interface)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The directed edges leaving `node`, through any of its interfaces
    pub fn node_edges(&self, node: &str) -> &[Edge] {
        self.by_node.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn neighbors(&self, node: &str) -> BTreeSet<Arc<str>> {
        self.node_edges(node)
            .iter()
            .map(|e| e.head.node.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn retain(&self, keep: impl Fn(&Edge) -> bool) -> Topology {
        Topology::new(self.links.iter().filter(|e| keep(e)).cloned())
    }

    pub fn without_node(&self, node: &str) -> Topology {
        self.retain(|e| &*e.tail.node != node && &*e.head.node != node)
    }

    pub fn without_interface(&self, interface: &NodeInterfacePair) -> Topology {
        self.retain(|e| &e.tail != interface && &e.head != interface)
    }

    /// Removes a link, in whichever direction it is given
    pub fn without_edge(&self, edge: &Edge) -> Topology {
        let canonical = edge.clone().canonical();
        self.retain(|e| e != &canonical)
    }
}

impl FromIterator<Edge> for Topology {
    fn from_iter<T: IntoIterator<Item = Edge>>(iter: T) -> Self {
        Topology::new(iter)
    }
}
