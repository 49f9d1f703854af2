use crate::filter::acl::{FilterResult, IpAccessList};
use crate::flow::Flow;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The number of results kept by [`FilterCache::new`]
pub const DEFAULT_CACHE_CAPACITY: usize = 1 << 20;

/// Memoizes access list results per (device, filter, flow)
///
/// Caching never changes a result: a disabled cache simply evaluates the filter every time.
/// The cache can be shared by concurrent traces and cleared independently of the data plane.
/// Entries live until [`FilterCache::invalidate`] is called; once `capacity` results are
/// stored, further results are computed but not remembered.
pub struct FilterCache {
    enabled: bool,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, FilterResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(PartialEq, Eq, Hash)]
struct CacheKey {
    device: Arc<str>,
    filter: Arc<str>,
    flow: Flow,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl FilterCache {
    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            entries: Mutex::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn filter(&self, device: &Arc<str>, acl: &IpAccessList, flow: &Flow) -> FilterResult {
        if !self.enabled {
            return acl.filter(flow);
        }

        let key = CacheKey {
            device: device.clone(),
            filter: acl.name.clone(),
            flow: flow.clone(),
        };

        // Concurrency: the lock is released while the filter is evaluated, so two traces may
        // occasionally compute the same entry (which is harmless, since results are identical)
        if let Some(result) = self.entries.lock().get(&key).copied() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return result;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = acl.filter(flow);
        let mut entries = self.entries.lock();
        if entries.len() < self.capacity {
            entries.insert(key, result);
        }
        result
    }

    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::acl::AclLine;
    use crate::filter::header_space::HeaderSpace;
    use crate::flow::IpProtocol;
    use std::net::Ipv4Addr;

    fn acl() -> IpAccessList {
        IpAccessList::new(
            "no-udp",
            vec![
                AclLine::deny(HeaderSpace {
                    ip_protocols: vec![IpProtocol::UDP],
                    ..Default::default()
                }),
                AclLine::permit(HeaderSpace::default()),
            ],
        )
    }

    fn flows() -> Vec<Flow> {
        [IpProtocol::TCP, IpProtocol::UDP, IpProtocol::ICMP]
            .into_iter()
            .map(|ip_protocol| {
                Flow::builder()
                    .ingress_node("a")
                    .dst_ip(Ipv4Addr::new(10, 0, 0, 1))
                    .ip_protocol(ip_protocol)
                    .build()
            })
            .collect()
    }

    #[test]
    fn test_cached_results_match_uncached() {
        let device: Arc<str> = Arc::from("a");
        let acl = acl();
        let enabled = FilterCache::new(true);
        let disabled = FilterCache::disabled();

        for _ in 0..2 {
            for flow in flows() {
                assert_eq!(
                    enabled.filter(&device, &acl, &flow),
                    disabled.filter(&device, &acl, &flow)
                );
            }
        }

        assert_eq!(enabled.stats(), CacheStats { hits: 3, misses: 3 });
        assert_eq!(disabled.stats(), CacheStats::default());

        enabled.invalidate();
        enabled.filter(&device, &acl, &flows()[0]);
        assert_eq!(enabled.stats().misses, 4);
    }

    #[test]
    fn test_capacity_bounds_stored_results() {
        let device: Arc<str> = Arc::from("a");
        let acl = acl();
        let cache = FilterCache::with_capacity(true, 2);

        for _ in 0..2 {
            for flow in flows() {
                assert_eq!(cache.filter(&device, &acl, &flow), acl.filter(&flow));
            }
        }

        assert_eq!(cache.entries.lock().len(), 2);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 4 });
    }
}
