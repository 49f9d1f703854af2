use crate::filter::acl::MatchExpr;
use crate::flow::Flow;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformationKind {
    SourceNat,
    DestinationNat,
}

/// A static NAT rule: flows matching `guard` get one of their addresses rewritten to `pool`
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transformation {
    pub kind: TransformationKind,
    #[serde(rename = "match", default)]
    pub guard: MatchExpr,
    pub pool: Ipv4Addr,
}

impl Transformation {
    pub fn apply(&self, flow: &Flow) -> Option<Flow> {
        if !self.guard.matches(flow) {
            return None;
        }

        Some(match self.kind {
            TransformationKind::SourceNat => flow.with_src_ip(self.pool),
            TransformationKind::DestinationNat => flow.with_dst_ip(self.pool),
        })
    }
}

/// Applies the first transformation whose guard matches, returning the rewritten flow (if any
/// address actually changed)
pub fn apply_first(transformations: &[Transformation], flow: &Flow) -> Option<Flow> {
    transformations
        .iter()
        .find_map(|t| t.apply(flow))
        .filter(|transformed| transformed != flow)
}

/// A short description of how a flow's addresses changed, as shown in traces
pub struct FlowChange<'a> {
    pub before: &'a Flow,
    pub after: &'a Flow,
}

impl Display for FlowChange<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut changes = Vec::new();
        if self.before.src_ip != self.after.src_ip {
            changes.push(format!("src {} -> {}", self.before.src_ip, self.after.src_ip));
        }
        if self.before.dst_ip != self.after.dst_ip {
            changes.push(format!("dst {} -> {}", self.before.dst_ip, self.after.dst_ip));
        }

        write!(f, "nat: {}", changes.join(", "))
    }
}
