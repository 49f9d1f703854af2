use crate::config::snapshot::SkippedDevice;
use dataplane_sim::error::DataPlaneError;
use dataplane_sim::flow::Flow;
use dataplane_sim::network::DataPlane;
use dataplane_sim::network::topology::Topology;
use dataplane_sim::trace::{FlowTrace, TraceBatch};
use serde::Serialize;
use std::path::Path;

pub fn print_data_plane(
    data_plane: &DataPlane,
    topology: &Topology,
    skipped: &[SkippedDevice],
    failures: &[DataPlaneError],
) {
    println!("--- Data plane ---");
    println!("* Devices: {}", data_plane.devices().count());
    println!(
        "* Links: {} ({} after removals)",
        data_plane.topology().len(),
        topology.len()
    );
    println!("* Flow sinks: {}", data_plane.flow_sinks().len());
    for sink in data_plane.flow_sinks() {
        println!("  * {sink}");
    }

    if !skipped.is_empty() || !failures.is_empty() {
        println!("* Skipped devices:");
    }
    for skipped in skipped {
        println!("  * {}: {:#}", skipped.device, skipped.error);
    }
    for failure in failures {
        println!("  * {}: {failure}", failure.device());
    }
}

pub fn print_traces(batch: &TraceBatch) {
    println!("--- Traces ---");
    for (flow, traces) in &batch.traces {
        println!("* {flow}");
        for (i, trace) in traces.iter().enumerate() {
            let indent = if traces.len() > 1 {
                println!("  Path {}:", i + 1);
                "    "
            } else {
                "  "
            };

            for line in trace.to_string().lines() {
                println!("{indent}{line}");
            }
        }
    }
}

pub fn print_summary(batch: &TraceBatch) {
    println!("--- Summary ---");
    println!("* Traced flows: {}", batch.traces.len());
    for (disposition, count) in batch.disposition_counts() {
        println!("  * {disposition}: {count}");
    }

    if batch.skipped > 0 {
        println!(
            "* Skipped flows: {} (tracing was interrupted)",
            batch.skipped
        );
    }
}

#[derive(Serialize)]
struct FlowTracesJson<'a> {
    flow: &'a Flow,
    traces: &'a [FlowTrace],
}

pub fn save_json(batch: &TraceBatch, path: &Path) -> anyhow::Result<()> {
    let traces: Vec<_> = batch
        .traces
        .iter()
        .map(|(flow, traces)| FlowTracesJson { flow, traces })
        .collect();

    let mut json = serde_json::to_vec_pretty(&traces)?;
    json.push(b'\n');
    std::fs::write(path, json)?;
    Ok(())
}
