use dataplane_sim::flow::Flow;
use std::path::Path;

/// Loads the flows to trace
///
/// Fields left out of a flow take their default values (e.g. the default VRF, or a source
/// address of 0.0.0.0).
pub fn load(path: &Path) -> anyhow::Result<Vec<Flow>> {
    super::read_json(path, "flows")
}
