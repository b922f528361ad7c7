use backend::{Backend, MemoryBackend};
use common::config::loader::from_yaml_str;
use common::config::ShardingConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// The canonical two-by-two fixture: two datasources, `t_order` sharded by
/// `user_id` across datasources and `order_id` across tables.
pub fn two_by_two_config() -> ShardingConfig {
    from_yaml_str(
        r#"
dataSources:
  ds_0:
    driverName: mysql
    url: "root@tcp(localhost:3306)/ds_0"
  ds_1:
    driverName: mysql
    url: "root@tcp(localhost:3306)/ds_1"
shardingRule:
  tables:
    t_order:
      actualDataNodes: "ds_${0..1}.t_order_${0..1}"
      databaseStrategy:
        shardingColumn: user_id
        algorithmExpression: "ds_${user_id % 2}"
      tableStrategy:
        shardingColumn: order_id
        algorithmExpression: "t_order_${order_id % 2}"
"#,
    )
    .expect("fixture config parses")
}

/// Same topology with a snowflake key generator on `order_id`.
pub fn two_by_two_with_keygen_config() -> ShardingConfig {
    from_yaml_str(
        r#"
dataSources:
  ds_0:
    driverName: mysql
    url: "root@tcp(localhost:3306)/ds_0"
  ds_1:
    driverName: mysql
    url: "root@tcp(localhost:3306)/ds_1"
shardingRule:
  tables:
    t_order:
      actualDataNodes: "ds_${0..1}.t_order_${0..1}"
      databaseStrategy:
        shardingColumn: user_id
        algorithmExpression: "ds_${user_id % 2}"
      tableStrategy:
        shardingColumn: order_id
        algorithmExpression: "t_order_${order_id % 2}"
      keyGenerator:
        column: order_id
        type: snowflake
        workerId: 1
        datacenterId: 1
"#,
    )
    .expect("fixture config parses")
}

/// Read/write-split fixture: one sharded group name per datasource slot.
pub fn split_config() -> ShardingConfig {
    from_yaml_str(
        r#"
dataSources:
  ds_master:
    driverName: mysql
    url: "root@tcp(localhost:3306)/master"
  ds_slave_0:
    driverName: mysql
    url: "root@tcp(localhost:3307)/slave0"
  ds_slave_1:
    driverName: mysql
    url: "root@tcp(localhost:3308)/slave1"
readWriteSplits:
  ds_rw:
    masterDataSource: ds_master
    slaveDataSources: [ds_slave_0, ds_slave_1]
    loadBalanceAlgorithm: round_robin
shardingRule:
  tables:
    t_order:
      actualDataNodes: "ds_rw.t_order_${0..1}"
      tableStrategy:
        shardingColumn: order_id
        algorithmExpression: "t_order_${order_id % 2}"
"#,
    )
    .expect("fixture config parses")
}

/// Memory backends for every datasource a config declares.
pub fn memory_backends(config: &ShardingConfig) -> HashMap<String, Arc<MemoryBackend>> {
    config
        .data_sources
        .keys()
        .map(|name| (name.clone(), Arc::new(MemoryBackend::new(name))))
        .collect()
}

/// Upcast the concrete memory backends into the trait-object map the
/// executor consumes.
pub fn as_backend_map(
    backends: &HashMap<String, Arc<MemoryBackend>>,
) -> HashMap<String, Arc<dyn Backend>> {
    backends
        .iter()
        .map(|(name, b)| (name.clone(), Arc::clone(b) as Arc<dyn Backend>))
        .collect()
}
