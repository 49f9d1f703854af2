use crate::filter::cache::{CacheStats, FilterCache};
use crate::flow::Flow;
use crate::network::DataPlane;
use crate::network::topology::Topology;
use crate::trace::flow_trace::{FlowDisposition, FlowTrace};
use crate::trace::settings::TraceSettings;
use crate::trace::tracer::FlowTracer;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// The traces of a batch of flows
#[derive(Debug, Default)]
pub struct TraceBatch {
    pub traces: BTreeMap<Flow, Vec<FlowTrace>>,
    /// The number of flows that were never traced, because the batch was cancelled
    pub skipped: usize,
    pub cache_stats: CacheStats,
}

impl TraceBatch {
    /// How many traces ended with each disposition
    pub fn disposition_counts(&self) -> BTreeMap<FlowDisposition, usize> {
        let mut counts = BTreeMap::new();
        for trace in self.traces.values().flatten() {
            *counts.entry(trace.disposition).or_default() += 1;
        }
        counts
    }
}

/// Traces every distinct flow in `flows`, using up to `settings.workers` threads
///
/// Once `cancel` is triggered no new traces are started, but traces already running are allowed
/// to finish and are included in the result.
pub async fn compute_traces(
    data_plane: Arc<DataPlane>,
    topology: Arc<Topology>,
    flows: impl IntoIterator<Item = Flow>,
    settings: TraceSettings,
    cancel: CancellationToken,
) -> TraceBatch {
    let flows: BTreeSet<Flow> = flows.into_iter().collect();
    let total = flows.len();

    let settings = Arc::new(settings);
    let filter_cache = Arc::new(FilterCache::new(settings.cache_filter_results));
    let workers = Arc::new(Semaphore::new(settings.workers.max(1)));

    let mut tasks = JoinSet::new();
    let mut pending = flows.into_iter().peekable();
    while pending.peek().is_some() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = workers.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            break;
        };
        let Some(flow) = pending.next() else {
            break;
        };

        let data_plane = data_plane.clone();
        let topology = topology.clone();
        let settings = settings.clone();
        let filter_cache = filter_cache.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let tracer = FlowTracer::new(&data_plane, &topology, &settings, &filter_cache);
            let traces = tracer.trace(&flow);
            (flow, traces)
        });
    }

    let skipped = pending.count();
    if skipped > 0 {
        tracing::warn!(skipped, total, "trace batch cancelled");
    }

    let mut traces = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((flow, flow_traces)) => {
                traces.insert(flow, flow_traces);
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::warn!("trace task did not complete: {e}"),
        }
    }

    let cache_stats = filter_cache.stats();
    tracing::info!(
        traced = traces.len(),
        skipped,
        cache_hits = cache_stats.hits,
        cache_misses = cache_stats.misses,
        "trace batch finished"
    );

    TraceBatch {
        traces,
        skipped,
        cache_stats,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::acl::{AclLine, IpAccessList};
    use crate::filter::header_space::HeaderSpace;
    use crate::network::spec::{DataPlaneSpec, DeviceSpec};
    use crate::network::topology::Edge;
    use crate::network::{DEFAULT_VRF, Interface};
    use std::net::Ipv4Addr;

    fn data_plane() -> Arc<DataPlane> {
        let edge_in = IpAccessList::new(
            "edge-in",
            vec![
                AclLine::deny(HeaderSpace {
                    dst_ports: vec!["23".parse().unwrap()],
                    ..Default::default()
                })
                .named("no telnet"),
                AclLine::permit(HeaderSpace::default()),
            ],
        );

        let a = DeviceSpec {
            name: "a".into(),
            interfaces: vec![Interface::new("eth0", Some("10.0.0.1/24".parse().unwrap()))],
            vrfs: vec![],
            filters: vec![],
        };
        let b = DeviceSpec {
            name: "b".into(),
            interfaces: vec![
                Interface {
                    incoming_filter: Some("edge-in".into()),
                    ..Interface::new("eth0", Some("10.0.0.2/24".parse().unwrap()))
                },
                Interface::new("eth1", Some("10.0.1.1/24".parse().unwrap())),
            ],
            vrfs: vec![],
            filters: vec![edge_in],
        };

        let built = DataPlane::build(DataPlaneSpec {
            devices: vec![a, b],
            links: vec![Edge::new(
                "a:eth0".parse().unwrap(),
                "b:eth0".parse().unwrap(),
            )],
            flow_sinks: vec!["b:eth1".parse().unwrap()],
        });
        assert!(built.failures.is_empty());
        Arc::new(built.data_plane)
    }

    fn flows() -> Vec<Flow> {
        [22, 23, 80, 443, 23]
            .into_iter()
            .map(|port| {
                Flow::builder()
                    .ingress_node("b")
                    .ingress_vrf(DEFAULT_VRF)
                    .ingress_interface("eth0")
                    .dst_ip(Ipv4Addr::new(10, 0, 1, 9))
                    .dst_port(port)
                    .build()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_traces_distinct_flows() {
        let data_plane = data_plane();
        let topology = data_plane.topology().clone();

        let batch = compute_traces(
            data_plane.clone(),
            topology.clone(),
            flows(),
            TraceSettings::default(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(batch.traces.len(), 4);
        assert_eq!(batch.skipped, 0);

        let counts = batch.disposition_counts();
        assert_eq!(counts.get(&FlowDisposition::Accepted), Some(&3));
        assert_eq!(counts.get(&FlowDisposition::DeniedIn), Some(&1));

        // Same results as tracing one flow at a time
        let settings = TraceSettings::default();
        let cache = FilterCache::disabled();
        let tracer = FlowTracer::new(&data_plane, &topology, &settings, &cache);
        for (flow, traces) in &batch.traces {
            assert_eq!(traces, &tracer.trace(flow));
        }
    }

    #[tokio::test]
    async fn test_filter_cache_can_be_disabled() {
        let data_plane = data_plane();
        let topology = data_plane.topology().clone();

        let mut results = Vec::new();
        for cache_filter_results in [true, false] {
            let settings = TraceSettings {
                cache_filter_results,
                workers: 1,
                ..Default::default()
            };
            let batch = compute_traces(
                data_plane.clone(),
                topology.clone(),
                flows(),
                settings,
                CancellationToken::new(),
            )
            .await;
            results.push(batch);
        }

        assert_eq!(results[0].traces, results[1].traces);
        assert_eq!(results[0].cache_stats.misses, 4);
        assert_eq!(results[1].cache_stats, CacheStats::default());
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_remaining_flows() {
        let data_plane = data_plane();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = compute_traces(
            data_plane.clone(),
            data_plane.topology().clone(),
            flows(),
            TraceSettings::default(),
            cancel,
        )
        .await;

        assert!(batch.traces.is_empty());
        assert_eq!(batch.skipped, 4);
    }

    #[tokio::test]
    async fn test_narrowed_topology() {
        let data_plane = data_plane();
        let topology = Arc::new(data_plane.topology().without_node("b"));
        let flow = Flow::builder()
            .ingress_node("a")
            .dst_ip(Ipv4Addr::new(10, 0, 0, 2))
            .build();

        let batch = compute_traces(
            data_plane,
            topology,
            [flow.clone()],
            TraceSettings::default(),
            CancellationToken::new(),
        )
        .await;

        let traces = &batch.traces[&flow];
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].disposition, FlowDisposition::NeighborUnreachable);
    }
}
