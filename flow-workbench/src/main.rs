mod config;
mod report;

use crate::config::cli::CliOpt;
use anyhow::Context;
use clap::Parser;
use dataplane_sim::network::DataPlane;
use dataplane_sim::trace::compute_traces;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let options = CliOpt::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize tokio")?;

    rt.block_on(run(options))
}

/// Logs go to stderr, so stdout only contains the report
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(options: CliOpt) -> anyhow::Result<()> {
    let settings = options.trace_settings();

    println!("--- Params ---");
    println!("* Snapshot path: {}", options.snapshot.display());
    println!("* Flows path: {}", options.flows.display());
    println!("* Max hops: {}", settings.max_hops);
    println!("* Multipath: {}", settings.multipath);
    println!(
        "* Filter cache: {}",
        if settings.cache_filter_results {
            "enabled"
        } else {
            "disabled"
        }
    );

    let snapshot = config::snapshot::load(&options.snapshot)?;
    let flows = config::flows::load(&options.flows)?;

    let built = DataPlane::build(snapshot.spec);
    let data_plane = Arc::new(built.data_plane);

    // What-if analysis: trace over a topology without the failed elements
    let mut topology = data_plane.topology().as_ref().clone();
    for node in &options.remove_node {
        topology = topology.without_node(node);
    }
    for interface in &options.remove_interface {
        topology = topology.without_interface(interface);
    }

    report::print_data_plane(&data_plane, &topology, &snapshot.skipped, &built.failures);
    for node in &options.remove_node {
        println!("* Removed node: {node}");
    }
    for interface in &options.remove_interface {
        println!("* Removed interface: {interface}");
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, waiting for running traces to finish");
                cancel.cancel();
            }
        }
    });

    let batch = compute_traces(
        data_plane.clone(),
        Arc::new(topology),
        flows,
        settings,
        cancel,
    )
    .await;

    report::print_traces(&batch);
    report::print_summary(&batch);

    if let Some(path) = &options.output_json {
        report::save_json(&batch, path)
            .with_context(|| format!("failed to write traces to `{}`", path.display()))?;
        println!("* Traces available at {}", path.display());
    }

    Ok(())
}
