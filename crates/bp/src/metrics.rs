//! Scraped node metrics, as read by the allocator.
//!
//! Collection itself happens elsewhere; this map only stores already-scraped
//! Prometheus metric families per node and answers the allocator's
//! free-memory probe.

use std::collections::HashMap;
use std::sync::RwLock;

use prometheus::proto::{MetricFamily, MetricType};
use thiserror::Error;

use cql_core::NodeId;

/// Free-memory metric keys, probed in order. The first present gauge or
/// counter wins.
pub const METRIC_KEYS_FREE_MEMORY: [&str; 2] = [
    "node_memory_free_bytes_total", // mac
    "node_memory_MemFree_bytes",    // linux
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetricError {
    /// The node published none of the probed keys. Never surfaced to
    /// clients; the allocator excludes the node instead.
    #[error("Metric not collected")]
    MetricUnavailable,
}

/// Latest metric family set per node.
#[derive(Default)]
pub struct NodeMetricMap {
    inner: RwLock<HashMap<NodeId, HashMap<String, MetricFamily>>>,
}

impl NodeMetricMap {
    pub fn new() -> Self {
        NodeMetricMap::default()
    }

    /// Replace the stored family set for one node with a fresh scrape.
    pub fn set_metrics(&self, node: NodeId, families: Vec<MetricFamily>) {
        let map = families
            .into_iter()
            .map(|f| (f.get_name().to_string(), f))
            .collect();
        self.inner
            .write()
            .expect("metric map poisoned")
            .insert(node, map);
    }

    pub fn remove(&self, node: &NodeId) {
        self.inner.write().expect("metric map poisoned").remove(node);
    }

    /// Probe `keys` in order against a node's families and read the first
    /// present gauge or counter as a u64.
    pub fn get_metric(&self, node: &NodeId, keys: &[&str]) -> Result<u64, MetricError> {
        let inner = self.inner.read().expect("metric map poisoned");
        let families = inner.get(node).ok_or(MetricError::MetricUnavailable)?;

        for key in keys {
            let Some(family) = families.get(*key) else {
                continue;
            };
            let Some(metric) = family.get_metric().first() else {
                continue;
            };
            match family.get_field_type() {
                MetricType::GAUGE => return Ok(metric.get_gauge().get_value() as u64),
                MetricType::COUNTER => return Ok(metric.get_counter().get_value() as u64),
                _ => continue,
            }
        }

        Err(MetricError::MetricUnavailable)
    }

    /// Free memory in bytes as reported by the node's latest scrape.
    pub fn free_memory(&self, node: &NodeId) -> Result<u64, MetricError> {
        self.get_metric(node, &METRIC_KEYS_FREE_MEMORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::proto::{Counter, Gauge, Metric};

    fn gauge_family(name: &str, value: f64) -> MetricFamily {
        let mut gauge = Gauge::new();
        gauge.set_value(value);
        let mut metric = Metric::new();
        metric.set_gauge(gauge);
        let mut family = MetricFamily::new();
        family.set_name(name.to_string());
        family.set_field_type(MetricType::GAUGE);
        family.mut_metric().push(metric);
        family
    }

    fn counter_family(name: &str, value: f64) -> MetricFamily {
        let mut counter = Counter::new();
        counter.set_value(value);
        let mut metric = Metric::new();
        metric.set_counter(counter);
        let mut family = MetricFamily::new();
        family.set_name(name.to_string());
        family.set_field_type(MetricType::COUNTER);
        family.mut_metric().push(metric);
        family
    }

    #[test]
    fn test_gauge_read() {
        let map = NodeMetricMap::new();
        let node = NodeId([1u8; 32]);
        map.set_metrics(
            node,
            vec![gauge_family("node_memory_free_bytes_total", 8e9)],
        );

        assert_eq!(map.free_memory(&node).unwrap(), 8_000_000_000);
    }

    #[test]
    fn test_counter_read() {
        let map = NodeMetricMap::new();
        let node = NodeId([1u8; 32]);
        map.set_metrics(node, vec![counter_family("node_memory_MemFree_bytes", 4e9)]);

        assert_eq!(map.free_memory(&node).unwrap(), 4_000_000_000);
    }

    #[test]
    fn test_key_probe_order() {
        let map = NodeMetricMap::new();
        let node = NodeId([1u8; 32]);
        map.set_metrics(
            node,
            vec![
                gauge_family("node_memory_MemFree_bytes", 1e9),
                gauge_family("node_memory_free_bytes_total", 2e9),
            ],
        );

        // first key in probe order wins
        assert_eq!(map.free_memory(&node).unwrap(), 2_000_000_000);
    }

    #[test]
    fn test_missing_node_unavailable() {
        let map = NodeMetricMap::new();
        assert_eq!(
            map.free_memory(&NodeId([9u8; 32])),
            Err(MetricError::MetricUnavailable)
        );
    }

    #[test]
    fn test_missing_key_unavailable() {
        let map = NodeMetricMap::new();
        let node = NodeId([1u8; 32]);
        map.set_metrics(node, vec![gauge_family("node_cpu_seconds_total", 1.0)]);

        assert_eq!(map.free_memory(&node), Err(MetricError::MetricUnavailable));
    }

    #[test]
    fn test_rescrape_replaces() {
        let map = NodeMetricMap::new();
        let node = NodeId([1u8; 32]);
        map.set_metrics(node, vec![gauge_family("node_memory_MemFree_bytes", 1e9)]);
        map.set_metrics(node, vec![gauge_family("node_memory_MemFree_bytes", 3e9)]);

        assert_eq!(map.free_memory(&node).unwrap(), 3_000_000_000);
    }
}
