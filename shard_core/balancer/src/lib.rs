use common::config::components::readwrite::{LoadBalanceAlgorithm, ReadWriteSplitConfig};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Read/write-split balancer for one group: writes go to the master, reads
/// are spread over the slaves by the configured algorithm.
pub struct ReadWriteSplit {
    name: String,
    master: String,
    slaves: Vec<String>,
    algorithm: LoadBalanceAlgorithm,
    cursor: AtomicUsize,
    /// Slave indices repeated proportionally to their weights; only built
    /// for the weighted algorithm.
    weighted_ring: Vec<usize>,
}

impl ReadWriteSplit {
    pub fn new(name: &str, config: &ReadWriteSplitConfig) -> Self {
        let mut weighted_ring = Vec::new();
        if config.load_balance_algorithm == LoadBalanceAlgorithm::Weighted {
            for (idx, _) in config.slave_data_sources.iter().enumerate() {
                for _ in 0..config.weight_of(idx) {
                    weighted_ring.push(idx);
                }
            }
        }
        Self {
            name: name.to_string(),
            master: config.master_data_source.clone(),
            slaves: config.slave_data_sources.clone(),
            algorithm: config.load_balance_algorithm,
            cursor: AtomicUsize::new(0),
            weighted_ring,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    /// Pick the datasource for one statement. Writes, in-transaction
    /// statements, and forced reads land on the master; everything else on a
    /// slave (master when no slaves are configured).
    pub fn pick(&self, is_write: bool, force_master: bool) -> &str {
        if is_write || force_master || self.slaves.is_empty() {
            return &self.master;
        }
        let slave = match self.algorithm {
            LoadBalanceAlgorithm::RoundRobin => {
                let n = self.cursor.fetch_add(1, Ordering::Relaxed);
                &self.slaves[n % self.slaves.len()]
            }
            LoadBalanceAlgorithm::Random => {
                let idx = rand::thread_rng().gen_range(0..self.slaves.len());
                &self.slaves[idx]
            }
            LoadBalanceAlgorithm::Weighted => {
                if self.weighted_ring.is_empty() {
                    &self.master
                } else {
                    let idx = rand::thread_rng().gen_range(0..self.weighted_ring.len());
                    &self.slaves[self.weighted_ring[idx]]
                }
            }
        };
        debug!(group = %self.name, slave = %slave, "read routed to slave");
        slave
    }
}

/// Syntactic read classification: SELECT / SHOW / DESCRIBE outside an active
/// transaction. Everything else, and everything inside a transaction, is a
/// write.
pub fn is_read_statement(sql: &str, in_transaction: bool) -> bool {
    if in_transaction {
        return false;
    }
    let keyword = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    matches!(keyword.as_str(), "SELECT" | "SHOW" | "DESCRIBE" | "DESC")
}
