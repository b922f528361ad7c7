use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceAlgorithm {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

/// A read/write-split group: one master, any number of slaves.
///
/// Slaves may be empty, in which case the group degenerates to master-only
/// and every read lands on the master.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadWriteSplitConfig {
    pub master_data_source: String,
    #[serde(default)]
    pub slave_data_sources: Vec<String>,
    #[serde(default)]
    pub load_balance_algorithm: LoadBalanceAlgorithm,
    /// Integer weights parallel to `slaveDataSources`; only consulted by the
    /// weighted algorithm. Missing entries weigh 1.
    #[serde(default)]
    pub slave_weights: Vec<u32>,
}

impl ReadWriteSplitConfig {
    /// Weight for the slave at `index`, defaulting to 1.
    pub fn weight_of(&self, index: usize) -> u32 {
        self.slave_weights.get(index).copied().unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_split_with_algorithm() {
        let yaml = r#"
masterDataSource: ds_master
slaveDataSources: [ds_slave_0, ds_slave_1]
loadBalanceAlgorithm: weighted
slaveWeights: [5, 3]
"#;
        let split: ReadWriteSplitConfig = serde_yaml::from_str(yaml).expect("parse split");
        assert_eq!(split.master_data_source, "ds_master");
        assert_eq!(split.slave_data_sources.len(), 2);
        assert_eq!(split.load_balance_algorithm, LoadBalanceAlgorithm::Weighted);
        assert_eq!(split.weight_of(0), 5);
        assert_eq!(split.weight_of(1), 3);
        assert_eq!(split.weight_of(2), 1, "missing weights default to 1");
    }

    #[test]
    fn test_master_only_split() {
        let yaml = "masterDataSource: ds_0";
        let split: ReadWriteSplitConfig = serde_yaml::from_str(yaml).expect("parse split");
        assert!(split.slave_data_sources.is_empty());
        assert_eq!(split.load_balance_algorithm, LoadBalanceAlgorithm::RoundRobin);
    }
}
