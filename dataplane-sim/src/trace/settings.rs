use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// What to do when a device can forward a packet over more than one path
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultipathPolicy {
    /// Follow every path, producing one trace per path
    #[default]
    Branch,
    /// Follow only the lowest path (by outgoing interface, then next hop)
    FirstPath,
}

impl Display for MultipathPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MultipathPolicy::Branch => f.write_str("branch"),
            MultipathPolicy::FirstPath => f.write_str("first-path"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    /// The number of links a packet may cross before the trace is abandoned
    pub max_hops: usize,
    pub multipath: MultipathPolicy,
    /// The number of flows traced concurrently by [`compute_traces`](crate::trace::compute_traces)
    pub workers: usize,
    pub cache_filter_results: bool,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            max_hops: 64,
            multipath: MultipathPolicy::Branch,
            workers: 4,
            cache_filter_results: true,
        }
    }
}
