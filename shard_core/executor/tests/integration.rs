use common::{RequestContext, Value};
use executor::{ShardError, ShardingDataSource};
use std::time::Duration;
use test_utils::{
    as_backend_map, memory_backends, split_config, two_by_two_config,
    two_by_two_with_keygen_config,
};
use txn::{TxKind, TxStatus};

#[tokio::test]
async fn test_single_shard_read() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_rows(
        "ds_0.t_order_1",
        &["order_id", "user_id"],
        vec![vec![Value::Int(1001), Value::Int(2)]],
    );
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let mut rows = handle
        .query(
            "SELECT * FROM t_order WHERE user_id = ? AND order_id = ?",
            &[Value::Int(2), Value::Int(1001)],
        )
        .await
        .expect("query");

    assert!(rows.next());
    let mut out = vec![Value::Null, Value::Null];
    rows.scan(&mut out).expect("scan");
    assert_eq!(out, vec![Value::Int(1001), Value::Int(2)]);
    assert!(!rows.next());

    let ds0_calls = backends["ds_0"].calls();
    assert_eq!(ds0_calls.len(), 1, "exactly one shard receives the query");
    assert_eq!(
        ds0_calls[0].sql,
        "SELECT * FROM ds_0.t_order_1 WHERE user_id = ? AND order_id = ?"
    );
    assert_eq!(ds0_calls[0].params, vec![Value::Int(2), Value::Int(1001)]);
    assert!(backends["ds_1"].calls().is_empty(), "ds_1 is not involved");
}

#[tokio::test]
async fn test_broadcast_aggregate_sums_counts() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_rows("t_order_0", &["c"], vec![vec![Value::Int(10)]]);
    backends["ds_0"].respond_rows("t_order_1", &["c"], vec![vec![Value::Int(5)]]);
    backends["ds_1"].respond_rows("t_order_0", &["c"], vec![vec![Value::Int(7)]]);
    backends["ds_1"].respond_rows("t_order_1", &["c"], vec![vec![Value::Int(0)]]);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let mut rows = handle
        .query("SELECT COUNT(*) AS c FROM t_order", &[])
        .await
        .expect("query");

    assert_eq!(backends["ds_0"].calls().len(), 2, "two tables per datasource");
    assert_eq!(backends["ds_1"].calls().len(), 2);

    assert!(rows.next());
    let mut out = vec![Value::Null];
    rows.scan(&mut out).expect("scan");
    assert_eq!(out, vec![Value::Int(22)], "10 + 5 + 7 + 0");
    assert!(!rows.next(), "one merged row");
}

#[tokio::test]
async fn test_broadcast_offset_window_applied_once() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_rows("t_order_0", &["id"], vec![vec![Value::Int(1)], vec![Value::Int(5)]]);
    backends["ds_0"].respond_rows("t_order_1", &["id"], vec![vec![Value::Int(3)]]);
    backends["ds_1"].respond_rows("t_order_0", &["id"], vec![vec![Value::Int(2)]]);
    backends["ds_1"].respond_rows("t_order_1", &["id"], vec![vec![Value::Int(4)]]);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let mut rows = handle
        .query("SELECT id FROM t_order ORDER BY id LIMIT 2 OFFSET 1", &[])
        .await
        .expect("query");

    // Each shard receives the widened window so the merger can cut the
    // real one; the original OFFSET must not reach the shards.
    for name in ["ds_0", "ds_1"] {
        for call in backends[name].calls() {
            assert!(
                call.sql.ends_with("ORDER BY id LIMIT 3"),
                "shard got the wrong window: {}",
                call.sql
            );
        }
    }

    // Global sorted ids are 1..=5; offset 1, count 2 -> [2, 3].
    let mut out = vec![Value::Null];
    assert!(rows.next());
    rows.scan(&mut out).expect("scan");
    assert_eq!(out, vec![Value::Int(2)]);
    assert!(rows.next());
    rows.scan(&mut out).expect("scan");
    assert_eq!(out, vec![Value::Int(3)]);
    assert!(!rows.next(), "exactly the requested window");
}

#[tokio::test]
async fn test_broadcast_average_weights_by_shard_counts() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let avg_columns = &["a", "AVG_WEIGHT_0"];
    backends["ds_0"].respond_rows(
        "t_order_0",
        avg_columns,
        vec![vec![Value::Float(10.0), Value::Int(1)]],
    );
    backends["ds_0"].respond_rows("t_order_1", avg_columns, vec![vec![Value::Null, Value::Int(0)]]);
    backends["ds_1"].respond_rows(
        "t_order_0",
        avg_columns,
        vec![vec![Value::Float(100.0), Value::Int(3)]],
    );
    backends["ds_1"].respond_rows("t_order_1", avg_columns, vec![vec![Value::Null, Value::Int(0)]]);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let mut rows = handle
        .query("SELECT AVG(amount) AS a FROM t_order", &[])
        .await
        .expect("query");

    // Every shard statement carries the derived count helper.
    for call in backends["ds_0"].calls() {
        assert!(
            call.sql.contains("COUNT(amount) AS AVG_WEIGHT_0"),
            "average must ship with its weight: {}",
            call.sql
        );
    }

    // 1 row at 10 and 3 rows at 100 average to 77.5, not 55.
    assert_eq!(rows.columns(), &["a".to_string()], "helper column is dropped");
    assert!(rows.next());
    let mut out = vec![Value::Null];
    rows.scan(&mut out).expect("scan");
    assert_eq!(out, vec![Value::Float(77.5)]);
    assert!(!rows.next());
}

#[tokio::test]
async fn test_postgres_placeholder_conversion() {
    let config = common::config::loader::from_yaml_str(
        r#"
dataSources:
  ds_0:
    driverName: postgres
    url: "host=localhost dbname=ds_0"
  ds_1:
    driverName: postgres
    url: "host=localhost dbname=ds_1"
shardingRule:
  tables:
    t_order:
      actualDataNodes: "ds_${0..1}.t_order_${0..1}"
      databaseStrategy:
        shardingColumn: user_id
        algorithmExpression: "ds_${user_id % 2}"
"#,
    )
    .expect("pg config");
    let backends: std::collections::HashMap<_, _> = config
        .data_sources
        .keys()
        .map(|name| {
            (
                name.clone(),
                std::sync::Arc::new(backend::MemoryBackend::with_dialect(
                    name,
                    common::Dialect::Postgres,
                )),
            )
        })
        .collect();
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let summary = handle
        .exec(
            "INSERT INTO t_order (user_id, amount) VALUES (?, ?)",
            &[Value::Int(1), Value::Float(99.99)],
        )
        .await
        .expect("exec");
    // user_id 1 -> ds_1; no table strategy value -> both suffixes there.
    assert_eq!(summary.rows_affected, 2);

    let calls = backends["ds_1"].calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(
            call.sql.ends_with("(user_id, amount) VALUES ($1, $2)"),
            "placeholders must be numbered: {}",
            call.sql
        );
        assert_eq!(call.params, vec![Value::Int(1), Value::Float(99.99)]);
    }
    assert!(backends["ds_0"].calls().is_empty());
}

#[tokio::test]
async fn test_insert_key_injection_routes_by_generated_id() {
    let config = two_by_two_with_keygen_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    handle
        .exec(
            "INSERT INTO t_order (user_id, amount) VALUES (?, ?)",
            &[Value::Int(2), Value::Float(9.99)],
        )
        .await
        .expect("exec");

    // user_id 2 -> ds_0; the generated order_id pins exactly one table.
    let calls = backends["ds_0"].calls();
    assert_eq!(calls.len(), 1, "generated key must avoid table broadcast");
    assert!(backends["ds_1"].calls().is_empty());

    let call = &calls[0];
    assert!(
        call.sql.contains("(user_id, amount, order_id) VALUES (?, ?, ?)"),
        "column list and VALUES row must both gain the key: {}",
        call.sql
    );
    assert_eq!(call.params.len(), 3);
    let Value::Int(generated) = call.params[2] else {
        panic!("generated key must be the trailing parameter");
    };
    assert!(generated > 0);
    let suffix = (generated % 2) as usize;
    assert!(call.sql.contains(&format!("ds_0.t_order_{suffix}")));
}

#[tokio::test]
async fn test_read_write_split_routing() {
    let config = split_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    handle
        .query("SELECT * FROM t_order WHERE order_id = ?", &[Value::Int(3)])
        .await
        .expect("read 1");
    handle
        .query("SELECT * FROM t_order WHERE order_id = ?", &[Value::Int(3)])
        .await
        .expect("read 2");
    assert_eq!(backends["ds_slave_0"].calls().len(), 1, "round robin starts at slave 0");
    assert_eq!(backends["ds_slave_1"].calls().len(), 1);
    assert!(backends["ds_master"].calls().is_empty());

    handle
        .exec(
            "UPDATE t_order SET amount = ? WHERE order_id = ?",
            &[Value::Float(1.0), Value::Int(3)],
        )
        .await
        .expect("write");
    assert_eq!(backends["ds_master"].calls().len(), 1, "writes go to the master");

    let ctx = RequestContext::new().with_force_master();
    handle
        .query_with_context(&ctx, "SELECT * FROM t_order WHERE order_id = ?", &[Value::Int(3)])
        .await
        .expect("forced read");
    assert_eq!(
        backends["ds_master"].calls().len(),
        2,
        "force_master sends the read to the master"
    );
}

#[tokio::test]
async fn test_unsharded_statement_uses_default_target() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_rows("t_settings", &["k"], vec![vec![Value::Text("v".into())]]);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let mut rows = handle
        .query("SELECT * FROM t_settings", &[])
        .await
        .expect("query");
    assert!(rows.next());
    assert_eq!(backends["ds_0"].calls().len(), 1);
    assert!(backends["ds_1"].calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_context_aborts() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let ctx = RequestContext::new();
    ctx.cancellation.cancel();
    let err = handle
        .query_with_context(&ctx, "SELECT * FROM t_order", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::Cancelled));
}

#[tokio::test]
async fn test_expired_deadline_times_out() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let ctx = RequestContext::new().with_timeout(Duration::ZERO);
    let err = handle
        .query_with_context(&ctx, "SELECT * FROM t_order", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::Timeout));
}

#[tokio::test]
async fn test_shard_failure_discards_partial_results() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_rows("t_order_0", &["c"], vec![vec![Value::Int(1)]]);
    backends["ds_1"].fail_matching("t_order_1", "disk on fire");
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let err = handle
        .query("SELECT COUNT(*) AS c FROM t_order", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::Merge(_)), "got {err:?}");
}

#[tokio::test]
async fn test_local_transaction_pins_statements() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let tx = handle.begin(TxKind::Local).await.expect("begin");
    let ctx = handle.context_for(&tx);

    // user_id 2 routes to ds_0, which is the pinned default target.
    handle
        .exec_with_context(
            &ctx,
            "UPDATE t_order SET amount = ? WHERE user_id = ? AND order_id = ?",
            &[Value::Float(5.0), Value::Int(2), Value::Int(4)],
        )
        .await
        .expect("pinned write");

    // user_id 1 routes to ds_1: not the pinned datasource.
    let err = handle
        .exec_with_context(
            &ctx,
            "UPDATE t_order SET amount = ? WHERE user_id = ? AND order_id = ?",
            &[Value::Float(5.0), Value::Int(1), Value::Int(4)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShardError::Transaction(txn::TxError::DataSourceNotPinned { .. })
    ));

    tx.commit().await.expect("commit");
    assert_eq!(tx.status(), TxStatus::Committed);

    let sqls: Vec<String> = backends["ds_0"].calls().into_iter().map(|c| c.sql).collect();
    assert_eq!(sqls.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(sqls.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn test_xa_transaction_enlists_and_commits_branches() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let tx = handle.begin(TxKind::Xa).await.expect("begin");
    let ctx = handle.context_for(&tx);

    // No sharding values: the update broadcasts to both datasources.
    handle
        .exec_with_context(&ctx, "UPDATE t_order SET amount = ?", &[Value::Float(0.0)])
        .await
        .expect("broadcast write");

    tx.commit().await.expect("commit");
    assert_eq!(tx.status(), TxStatus::Committed);

    for name in ["ds_0", "ds_1"] {
        let sqls: Vec<String> = backends[name].calls().into_iter().map(|c| c.sql).collect();
        assert!(
            sqls.iter().any(|s| s.starts_with("XA START")),
            "{name} must open a branch: {sqls:?}"
        );
        assert!(sqls.iter().any(|s| s.starts_with("XA PREPARE")));
        assert!(sqls.iter().any(|s| s.starts_with("XA COMMIT")));
    }
}

#[tokio::test]
async fn test_base_transaction_queues_statements() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let tx = handle.begin(TxKind::Base).await.expect("begin");
    let ctx = handle.context_for(&tx);

    let summary = handle
        .exec_with_context(
            &ctx,
            "UPDATE t_order SET amount = ? WHERE user_id = ? AND order_id = ?",
            &[Value::Float(5.0), Value::Int(2), Value::Int(4)],
        )
        .await
        .expect("queued write");
    assert_eq!(summary.rows_affected, 0, "nothing executes while Active");
    assert!(backends["ds_0"].calls().is_empty());

    let txn::Transaction::Base(base) = &*tx else {
        panic!("base transaction expected");
    };
    base.set_backoff_unit(Duration::from_millis(1));
    assert_eq!(base.operations().len(), 1);

    tx.commit().await.expect("commit");
    base.wait().await;
    assert_eq!(tx.status(), TxStatus::Committed);
    assert_eq!(backends["ds_0"].calls().len(), 1, "queued op ran in the background");
}

#[tokio::test]
async fn test_exec_summary_last_insert_id() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    backends["ds_0"].respond_exec("t_order_0", 1, 0);
    backends["ds_0"].respond_exec("t_order_1", 1, 77);
    backends["ds_1"].respond_exec("t_order", 1, 0);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let summary = handle
        .exec("UPDATE t_order SET amount = ?", &[Value::Float(1.0)])
        .await
        .expect("exec");
    assert_eq!(summary.rows_affected, 4);
    assert_eq!(summary.last_insert_id, 77, "last non-zero id wins");
}

#[tokio::test]
async fn test_close_rolls_back_active_transactions() {
    let config = two_by_two_config();
    let backends = memory_backends(&config);
    let handle = ShardingDataSource::new(config, as_backend_map(&backends)).expect("build handle");

    let tx = handle.begin(TxKind::Local).await.expect("begin");
    assert_eq!(tx.status(), TxStatus::Active);
    handle.close().await;
    assert_eq!(tx.status(), TxStatus::RolledBack);
}
