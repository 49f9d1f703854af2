use clap::{Parser, ValueEnum};
use dataplane_sim::network::topology::NodeInterfacePair;
use dataplane_sim::trace::{MultipathPolicy, TraceSettings};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct CliOpt {
    /// Path to the JSON file containing the network snapshot (devices, links and flow sinks)
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Path to the JSON file containing the flows to trace
    #[arg(long)]
    pub flows: PathBuf,

    /// The number of links a packet may cross before its trace is abandoned
    #[arg(long, default_value_t = 64)]
    pub max_hops: usize,

    /// What to do when a device can forward a packet over more than one path
    #[arg(long, value_enum, default_value_t = MultipathOpt::Branch)]
    pub multipath: MultipathOpt,

    /// The number of flows traced concurrently
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Evaluate access lists every time, instead of memoizing their results
    #[arg(long)]
    pub no_filter_cache: bool,

    /// Trace as if the node had failed (can be repeated)
    #[arg(long)]
    pub remove_node: Vec<String>,

    /// Trace as if the interface (given as `node:interface`) had failed (can be repeated)
    #[arg(long)]
    pub remove_interface: Vec<NodeInterfacePair>,

    /// Where to store the traces as JSON
    #[arg(long)]
    pub output_json: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipathOpt {
    /// Follow every path, producing one trace per path
    Branch,
    /// Follow only the first path
    FirstPath,
}

impl CliOpt {
    pub fn trace_settings(&self) -> TraceSettings {
        TraceSettings {
            max_hops: self.max_hops,
            multipath: match self.multipath {
                MultipathOpt::Branch => MultipathPolicy::Branch,
                MultipathOpt::FirstPath => MultipathPolicy::FirstPath,
            },
            workers: self.workers,
            cache_filter_results: !self.no_filter_cache,
        }
    }
}
