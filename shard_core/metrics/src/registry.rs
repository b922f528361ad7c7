use crate::{Counter, Gauge, Histogram};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Composite metric key: name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// Process-wide metric registry. Lookup is read-locked; instrument creation
/// takes the write lock once per key.
#[derive(Default)]
pub struct Registry {
    counters: RwLock<HashMap<MetricKey, Arc<Counter>>>,
    gauges: RwLock<HashMap<MetricKey, Arc<Gauge>>>,
    histograms: RwLock<HashMap<MetricKey, Arc<Histogram>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Counter> {
        let key = MetricKey::new(name, labels);
        if let Some(found) = self.counters.read().get(&key) {
            return Arc::clone(found);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Counter::new())),
        )
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Gauge> {
        let key = MetricKey::new(name, labels);
        if let Some(found) = self.gauges.read().get(&key) {
            return Arc::clone(found);
        }
        Arc::clone(
            self.gauges
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Gauge::new())),
        )
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)], buckets: Vec<f64>) -> Arc<Histogram> {
        let key = MetricKey::new(name, labels);
        if let Some(found) = self.histograms.read().get(&key) {
            return Arc::clone(found);
        }
        Arc::clone(
            self.histograms
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Histogram::new(buckets))),
        )
    }
}

/// The instruments threaded through the executor and transaction paths.
pub struct CoreMetrics {
    pub query_total: Arc<Counter>,
    pub query_duration_seconds: Arc<Histogram>,
    pub query_errors_total: Arc<Counter>,
    pub transaction_total: Arc<Counter>,
    pub transaction_duration_seconds: Arc<Histogram>,
    pub transaction_errors_total: Arc<Counter>,
    pub sharding_routes_total: Arc<Counter>,
    pub cross_shard_queries_total: Arc<Counter>,
    pub connections_active: Arc<Gauge>,
    pub connections_total: Arc<Counter>,
}

impl CoreMetrics {
    pub fn register(registry: &Registry) -> Self {
        let duration_buckets = vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];
        Self {
            query_total: registry.counter("query_total", &[]),
            query_duration_seconds: registry.histogram(
                "query_duration_seconds",
                &[],
                duration_buckets.clone(),
            ),
            query_errors_total: registry.counter("query_errors_total", &[]),
            transaction_total: registry.counter("transaction_total", &[]),
            transaction_duration_seconds: registry.histogram(
                "transaction_duration_seconds",
                &[],
                duration_buckets,
            ),
            transaction_errors_total: registry.counter("transaction_errors_total", &[]),
            sharding_routes_total: registry.counter("sharding_routes_total", &[]),
            cross_shard_queries_total: registry.counter("cross_shard_queries_total", &[]),
            connections_active: registry.gauge("connections_active", &[]),
            connections_total: registry.counter("connections_total", &[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_instrument() {
        let registry = Registry::new();
        let a = registry.counter("query_total", &[("table", "t_order")]);
        let b = registry.counter("query_total", &[("table", "t_order")]);
        a.inc();
        b.inc();
        assert_eq!(a.value(), 2);
    }

    #[test]
    fn test_label_order_is_irrelevant() {
        let registry = Registry::new();
        let a = registry.counter("c", &[("x", "1"), ("y", "2")]);
        let b = registry.counter("c", &[("y", "2"), ("x", "1")]);
        a.inc();
        assert_eq!(b.value(), 1);
    }

    #[test]
    fn test_distinct_labels_distinct_instruments() {
        let registry = Registry::new();
        let a = registry.counter("c", &[("ds", "ds_0")]);
        let b = registry.counter("c", &[("ds", "ds_1")]);
        a.inc();
        assert_eq!(b.value(), 0);
    }

    #[test]
    fn test_core_metrics_shared_through_registry() {
        let registry = Registry::new();
        let core = CoreMetrics::register(&registry);
        core.query_total.inc();
        assert_eq!(registry.counter("query_total", &[]).value(), 1);
    }
}
