use crate::flow::Flow;
use crate::network::route::Route;
use crate::network::topology::Edge;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How a trace ended
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowDisposition {
    /// Delivered to a device owning the destination, or out of a flow sink interface
    Accepted,
    DeniedIn,
    DeniedOut,
    NoRoute,
    NullRouted,
    /// The destination is on an attached subnet, but nothing answers on the other side
    NeighborUnreachable,
    HopLimitExceeded,
}

impl FlowDisposition {
    pub fn is_success(&self) -> bool {
        *self == FlowDisposition::Accepted
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDisposition::Accepted => "ACCEPTED",
            FlowDisposition::DeniedIn => "DENIED_IN",
            FlowDisposition::DeniedOut => "DENIED_OUT",
            FlowDisposition::NoRoute => "NO_ROUTE",
            FlowDisposition::NullRouted => "NULL_ROUTED",
            FlowDisposition::NeighborUnreachable => "NEIGHBOR_UNREACHABLE",
            FlowDisposition::HopLimitExceeded => "HOP_LIMIT_EXCEEDED",
        }
    }
}

impl Display for FlowDisposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link crossed by a traced packet
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct FlowTraceHop {
    pub edge: Edge,
    /// The routes that sent the packet over the edge
    pub routes: Vec<Route>,
    /// The packet as it left, if the sending device rewrote it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformed_flow: Option<Flow>,
}

/// The path of a flow through the network, and what happened to it in the end
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct FlowTrace {
    pub disposition: FlowDisposition,
    pub hops: Vec<FlowTraceHop>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FlowTrace {
    /// The device where the trace ended
    pub fn last_node<'a>(&'a self, flow: &'a Flow) -> &'a str {
        self.hops
            .last()
            .map(|hop| &*hop.edge.head.node)
            .unwrap_or(&*flow.ingress_node)
    }
}

impl Display for FlowTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            write!(f, "Hop {}: {}", i + 1, hop.edge)?;

            if let Some(flow) = &hop.transformed_flow {
                write!(f, " [rewritten: {} -> {}]", flow.src_ip, flow.dst_ip)?;
            }

            let routes: Vec<_> = hop.routes.iter().map(|r| r.to_string()).collect();
            if !routes.is_empty() {
                write!(f, " [{}]", routes.join(", "))?;
            }
            writeln!(f)?;
        }

        write!(f, "{}", self.disposition)?;
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }

        Ok(())
    }
}
