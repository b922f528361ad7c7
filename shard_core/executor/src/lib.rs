pub mod pipeline;
pub mod rows;

use analyzer::{advise, complexity_score, Analyzer, AnalyzerError, StatementKind};
use backend::{Backend, BackendError, QueryOutcome};
use balancer::{is_read_statement, ReadWriteSplit};
use common::config::components::sharding::KeyGeneratorConfig;
use common::config::error::ConfigError;
use common::config::ShardingConfig;
use common::{Dialect, DialectRegistry, RequestContext, Value};
use keygen::{create_key_generator, KeyGenerator, KeyGeneratorError};
use merger::{
    AggregateKind, AvgPair, LimitSpec, MergeContext, MergeError, MergedResult, OrderByKey,
    ShardRows,
};
use metrics::{CoreMetrics, Registry};
use rewriter::{RewriteContext, RewriteError, RouteUnit};
use router::{DataNode, RouteError, Router};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use txn::{Transaction, TransactionManager, TxError, TxKind};

pub use rows::{ExecSummary, QueryRows};

const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Analyze(#[from] AnalyzerError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Transaction(#[from] TxError),
    #[error(transparent)]
    KeyGenerator(#[from] KeyGeneratorError),
    #[error("no opened backend for datasource `{0}`")]
    UnknownBackend(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
    #[error("row access error: {0}")]
    RowAccess(String),
}

/// One statement ready for dispatch: the route-level datasource (possibly a
/// read/write-split group name), the rewritten SQL, and its parameters.
#[derive(Debug, Clone)]
struct PlannedUnit {
    route_target: String,
    sql: String,
    params: Vec<Value>,
}

/// Everything planning decided for one statement. On multi-route plans the
/// shard SQL has its LIMIT clause widened to `offset + count` and its AVG
/// projections paired with derived COUNT helpers, so the merger alone
/// applies the final window and weights partial averages.
struct Plan {
    units: Vec<PlannedUnit>,
    multi_route: bool,
    avg_pairs: Vec<AvgPair>,
}

/// The public handle: analyze, route, rewrite, dispatch, merge.
///
/// Owns the immutable configuration, the opened backends, and everything
/// built from them. Per-request state lives on the stack of `query`/`exec`.
pub struct ShardingDataSource {
    analyzer: Analyzer,
    router: Router,
    backends: HashMap<String, Arc<dyn Backend>>,
    balancers: HashMap<String, ReadWriteSplit>,
    key_generators: HashMap<String, (String, Arc<dyn KeyGenerator>)>,
    source_dialect: Dialect,
    default_target: String,
    tx: Arc<TransactionManager>,
    metrics: CoreMetrics,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl ShardingDataSource {
    /// Build the handle from a validated configuration and the opened
    /// backends (one per configured datasource).
    pub fn new(
        config: ShardingConfig,
        backends: HashMap<String, Arc<dyn Backend>>,
    ) -> Result<Self, ShardError> {
        config.validate()?;

        let dialect_registry = DialectRegistry::new();
        let mut dialects = Vec::new();
        for (name, ds) in &config.data_sources {
            if !backends.contains_key(name) {
                return Err(ConfigError::InvalidDataSource {
                    name: name.clone(),
                    reason: "no opened backend supplied".to_string(),
                }
                .into());
            }
            dialects.push(dialect_registry.dialect_for_driver(&ds.driver_name)?);
        }
        let source_dialect = match dialects.split_first() {
            Some((first, rest)) if rest.iter().all(|d| d == first) => *first,
            _ => Dialect::MySql,
        };

        let router = Router::new(&config)?;

        let mut balancers = HashMap::new();
        for (name, split_config) in &config.read_write_splits {
            balancers.insert(name.clone(), ReadWriteSplit::new(name, split_config));
        }

        let mut key_generators = HashMap::new();
        for (key, rule) in &config.sharding_rule.tables {
            let logical = rule.logical_table.clone().unwrap_or_else(|| key.clone());
            let generator_config: Option<&KeyGeneratorConfig> = rule
                .key_generator
                .as_ref()
                .or(config.sharding_rule.default_key_generator.as_ref());
            if let Some(generator_config) = generator_config {
                key_generators.insert(
                    logical,
                    (
                        generator_config.column.clone(),
                        create_key_generator(generator_config)?,
                    ),
                );
            }
        }

        let default_target = {
            let mut split_names: Vec<&String> = config.read_write_splits.keys().collect();
            split_names.sort();
            match split_names.first() {
                Some(name) => (*name).clone(),
                None => {
                    let mut names: Vec<&String> = config.data_sources.keys().collect();
                    names.sort();
                    (*names.first().expect("validated: >=1 datasource")).clone()
                }
            }
        };

        let registry = Arc::new(Registry::new());
        let metrics = CoreMetrics::register(&registry);
        metrics.connections_total.add(backends.len() as i64);
        metrics.connections_active.set(backends.len() as f64);

        let analyzer = Analyzer::new(config.parser_config());
        let tx = Arc::new(TransactionManager::new(backends.clone()));

        Ok(Self {
            analyzer,
            router,
            backends,
            balancers,
            key_generators,
            source_dialect,
            default_target,
            tx,
            metrics,
            registry,
        })
    }

    pub fn transaction_manager(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.tx)
    }

    /// Begin a transaction of the requested flavor. Local transactions pin
    /// the default target's master.
    pub async fn begin(&self, kind: TxKind) -> Result<Arc<Transaction>, ShardError> {
        self.metrics.transaction_total.inc();
        let pinned = self.master_of(&self.default_target);
        let data_source = match kind {
            TxKind::Local => Some(pinned.as_str()),
            _ => None,
        };
        let tx = match self.tx.begin(kind, data_source, DEFAULT_TX_TIMEOUT).await {
            Ok(tx) => tx,
            Err(e) => {
                self.metrics.transaction_errors_total.inc();
                return Err(e.into());
            }
        };
        info!(tx = tx.id(), ?kind, "transaction started");
        Ok(tx)
    }

    /// Context pre-populated for statements running under `tx`.
    pub fn context_for(&self, tx: &Transaction) -> RequestContext {
        RequestContext::new().with_transaction(tx.id())
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryRows, ShardError> {
        self.query_with_context(&RequestContext::new(), sql, params)
            .await
    }

    pub async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecSummary, ShardError> {
        self.exec_with_context(&RequestContext::new(), sql, params)
            .await
    }

    pub async fn query_with_context(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryRows, ShardError> {
        self.metrics.query_total.inc();
        let result = logging::timed!(self.metrics.query_duration_seconds, {
            self.run_query(ctx, sql, params).await
        });
        if result.is_err() {
            self.metrics.query_errors_total.inc();
        }
        result
    }

    pub async fn exec_with_context(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecSummary, ShardError> {
        self.metrics.query_total.inc();
        let result = logging::timed!(self.metrics.query_duration_seconds, {
            self.run_exec(ctx, sql, params).await
        });
        if result.is_err() {
            self.metrics.query_errors_total.inc();
        }
        result
    }

    /// Health-check every opened backend, returning the names that failed.
    pub async fn ping(&self) -> Vec<(String, BackendError)> {
        let mut failures = Vec::new();
        for (name, backend) in &self.backends {
            if let Err(e) = backend.ping().await {
                warn!(data_source = %name, error = %e, "ping failed");
                failures.push((name.clone(), e));
            }
        }
        failures
    }

    /// Roll back whatever is still active and release the backends.
    pub async fn close(&self) {
        self.tx.close().await;
        self.metrics.connections_active.set(0.0);
        info!("sharding datasource closed");
    }

    async fn run_query(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryRows, ShardError> {
        let analyzed = self.analyzer.analyze(sql, self.source_dialect)?;
        self.log_advisories(&analyzed);
        let plan = self.plan(&analyzed, sql, params)?;
        let is_write = !is_read_statement(sql, ctx.in_transaction());

        let outcomes = self.dispatch_query(ctx, &plan.units, is_write).await?;
        let merged = self.merge_outcomes(&analyzed, outcomes, &plan)?;
        Ok(QueryRows::from_merged(merged))
    }

    async fn run_exec(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecSummary, ShardError> {
        let analyzed = self.analyzer.analyze(sql, self.source_dialect)?;
        self.log_advisories(&analyzed);
        let plan = self.plan(&analyzed, sql, params)?;

        let outcomes = self.dispatch_exec(ctx, &plan.units).await?;
        let mut summary = ExecSummary::default();
        for outcome in outcomes {
            summary.rows_affected += outcome.rows_affected;
            if outcome.last_insert_id != 0 {
                summary.last_insert_id = outcome.last_insert_id;
            }
        }
        Ok(summary)
    }

    fn log_advisories(&self, analyzed: &analyzer::AnalyzedStatement) {
        let advisories = advise(analyzed);
        if !advisories.is_empty() {
            debug!(
                score = complexity_score(analyzed),
                advisories = advisories.len(),
                "statement advisories"
            );
            for advisory in &advisories {
                debug!(kind = ?advisory.kind, severity = ?advisory.severity, message = %advisory.message, suggestion = %advisory.suggestion, "advisory");
            }
        }
    }

    /// Analyze-to-rewrite planning: key injection, sharding-value
    /// extraction, routing, multi-route AVG/LIMIT adjustments, per-route
    /// rewrite.
    fn plan(
        &self,
        analyzed: &analyzer::AnalyzedStatement,
        sql: &str,
        params: &[Value],
    ) -> Result<Plan, ShardError> {
        let mut sql = sql.to_string();
        let mut params = params.to_vec();
        let mut generated_key: Option<(String, Vec<i64>)> = None;

        if analyzed.kind == StatementKind::Insert {
            if let Some(insert) = &analyzed.insert {
                if let Some((column, generator)) = self.key_generators.get(&insert.table) {
                    if let Some(injected) = pipeline::inject_generated_key(
                        &sql,
                        analyzed,
                        &params,
                        column,
                        generator.as_ref(),
                    )? {
                        debug!(table = %insert.table, column = %column, ids = injected.generated.len(), "generated keys injected");
                        sql = injected.sql;
                        generated_key = Some((column.clone(), injected.generated.clone()));
                        params = injected.params;
                    }
                }
            }
        }

        let sharded_tables: Vec<&String> = analyzed
            .tables
            .iter()
            .filter(|t| self.router.is_sharded(t))
            .collect();

        if sharded_tables.is_empty() {
            return Ok(Plan {
                units: vec![PlannedUnit {
                    route_target: self.default_target.clone(),
                    sql: rewriter::convert_placeholders(
                        &sql,
                        self.target_dialect(&self.default_target),
                    ),
                    params,
                }],
                multi_route: false,
                avg_pairs: Vec::new(),
            });
        }

        // Route every sharded table; the union of route sets drives fan-out.
        let mut table_routes: Vec<(String, Vec<DataNode>)> = Vec::new();
        for table in &sharded_tables {
            let rule = self.router.rule(table).expect("is_sharded checked");
            let mut values = pipeline::sharding_values_for(rule, analyzed, &params);
            if let Some((column, ids)) = &generated_key {
                let entry = values.entry(column.clone()).or_insert_with(Vec::new);
                for id in ids {
                    entry.push(Value::Int(*id));
                }
            }
            let routes = self.router.route(table, &values)?;
            table_routes.push(((*table).clone(), routes));
        }

        let route_count = table_routes
            .iter()
            .flat_map(|(_, routes)| routes)
            .collect::<std::collections::HashSet<&DataNode>>()
            .len();
        self.metrics.sharding_routes_total.add(route_count as i64);
        let multi_route = route_count > 1;
        if multi_route {
            self.metrics.cross_shard_queries_total.inc();
        }

        // Across several shards the backends only see partial results, so
        // the merger must own the final window and the average math: widen
        // LIMIT/OFFSET to `offset + count` per shard and pair every AVG
        // with a derived COUNT helper.
        let mut avg_pairs: Vec<AvgPair> = Vec::new();
        if multi_route {
            if analyzed.kind == StatementKind::Select && analyzed.ctes.is_empty() {
                if let Some((derived, pairs)) = pipeline::derive_avg_weights(&sql) {
                    debug!(pairs = pairs.len(), "paired average columns with count helpers");
                    sql = derived;
                    avg_pairs = pairs;
                }
            }
            if let Some(limit) = analyzed.limit {
                let pushdown = limit.offset.unwrap_or(0) + limit.count;
                if let Some(widened) = pipeline::push_down_limit(&sql, pushdown) {
                    debug!(pushdown, "limit widened for per-shard dispatch");
                    sql = widened;
                }
            }
        }

        let mut units: Vec<PlannedUnit> = Vec::new();
        for (table, routes) in &table_routes {
            for node in routes {
                let mut mappings = HashMap::new();
                mappings.insert(
                    table.clone(),
                    format!("{}.{}", node.data_source, node.table),
                );
                // Other sharded tables joining this statement map on the
                // same datasource only when unambiguous there.
                for (other, other_routes) in &table_routes {
                    if other == table {
                        continue;
                    }
                    let on_same: Vec<&DataNode> = other_routes
                        .iter()
                        .filter(|n| n.data_source == node.data_source)
                        .collect();
                    if let [only] = on_same.as_slice() {
                        mappings.insert(
                            other.clone(),
                            format!("{}.{}", only.data_source, only.table),
                        );
                    }
                }

                let rewrite_ctx = RewriteContext {
                    sql: &sql,
                    parameters: &params,
                    source: self.source_dialect,
                };
                let unit = RouteUnit {
                    data_source: node.data_source.clone(),
                    table_mappings: mappings,
                };
                let rewritten =
                    rewriter::rewrite(&rewrite_ctx, &unit, self.target_dialect(&node.data_source))?;
                if units
                    .iter()
                    .any(|u| u.route_target == rewritten.data_source && u.sql == rewritten.sql)
                {
                    continue;
                }
                units.push(PlannedUnit {
                    route_target: rewritten.data_source,
                    sql: rewritten.sql,
                    params: rewritten.parameters,
                });
            }
        }
        Ok(Plan {
            units,
            multi_route,
            avg_pairs,
        })
    }

    /// Dialect a route-level target speaks: for a read/write-split group,
    /// the master's dialect; otherwise the datasource's own.
    fn target_dialect(&self, route_target: &str) -> Dialect {
        let concrete = self.master_of(route_target);
        self.backends
            .get(&concrete)
            .map(|b| b.dialect())
            .unwrap_or(self.source_dialect)
    }

    fn master_of(&self, route_target: &str) -> String {
        match self.balancers.get(route_target) {
            Some(split) => split.master().to_string(),
            None => route_target.to_string(),
        }
    }

    fn resolve_backend(
        &self,
        route_target: &str,
        is_write: bool,
        force_master: bool,
    ) -> Result<Arc<dyn Backend>, ShardError> {
        let concrete = match self.balancers.get(route_target) {
            Some(split) => split.pick(is_write, force_master).to_string(),
            None => route_target.to_string(),
        };
        self.backends
            .get(&concrete)
            .cloned()
            .ok_or_else(|| ShardError::UnknownBackend(concrete))
    }

    async fn dispatch_query(
        &self,
        ctx: &RequestContext,
        units: &[PlannedUnit],
        is_write: bool,
    ) -> Result<Vec<(String, QueryOutcome)>, ShardError> {
        if let Some(tx_id) = ctx.transaction_id.clone() {
            return self.dispatch_query_in_tx(&tx_id, units).await;
        }

        let mut set: JoinSet<(usize, Result<QueryOutcome, BackendError>)> = JoinSet::new();
        for (idx, unit) in units.iter().enumerate() {
            let backend = self.resolve_backend(&unit.route_target, is_write, ctx.force_master)?;
            let sql = unit.sql.clone();
            let params = unit.params.clone();
            set.spawn(async move { (idx, backend.query(&sql, &params).await) });
        }

        let collected = guard(ctx, async move {
            let mut outcomes: Vec<Option<QueryOutcome>> = vec![None; set.len()];
            while let Some(joined) = set.join_next().await {
                let (idx, result) = joined.map_err(|e| {
                    ShardError::RowAccess(format!("dispatch task failed: {e}"))
                })?;
                match result {
                    Ok(outcome) => outcomes[idx] = Some(outcome),
                    Err(e) => {
                        // Partial results are discarded with the JoinSet.
                        return Err(MergeError::Scan {
                            shard: e.data_source().to_string(),
                            message: e.to_string(),
                        }
                        .into());
                    }
                }
            }
            Ok(outcomes)
        })
        .await?;

        Ok(units
            .iter()
            .zip(collected)
            .map(|(unit, outcome)| (unit.route_target.clone(), outcome.unwrap_or_default()))
            .collect())
    }

    async fn dispatch_query_in_tx(
        &self,
        tx_id: &str,
        units: &[PlannedUnit],
    ) -> Result<Vec<(String, QueryOutcome)>, ShardError> {
        let tx = self
            .tx
            .current(tx_id)
            .ok_or_else(|| TxError::NotStarted(tx_id.to_string()))?;
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            let backend = self.transactional_backend(&tx, &unit.route_target).await?;
            let outcome = backend.query(&unit.sql, &unit.params).await?;
            outcomes.push((unit.route_target.clone(), outcome));
        }
        Ok(outcomes)
    }

    async fn dispatch_exec(
        &self,
        ctx: &RequestContext,
        units: &[PlannedUnit],
    ) -> Result<Vec<backend::ExecOutcome>, ShardError> {
        if let Some(tx_id) = ctx.transaction_id.clone() {
            return self.dispatch_exec_in_tx(&tx_id, units).await;
        }

        let mut set: JoinSet<(usize, Result<backend::ExecOutcome, BackendError>)> = JoinSet::new();
        for (idx, unit) in units.iter().enumerate() {
            let backend = self.resolve_backend(&unit.route_target, true, ctx.force_master)?;
            let sql = unit.sql.clone();
            let params = unit.params.clone();
            set.spawn(async move { (idx, backend.exec(&sql, &params).await) });
        }

        let collected = guard(ctx, async move {
            let mut outcomes: Vec<Option<backend::ExecOutcome>> = vec![None; set.len()];
            while let Some(joined) = set.join_next().await {
                let (idx, result) = joined.map_err(|e| {
                    ShardError::RowAccess(format!("dispatch task failed: {e}"))
                })?;
                outcomes[idx] = Some(result?);
            }
            Ok(outcomes)
        })
        .await?;

        Ok(collected.into_iter().flatten().collect())
    }

    async fn dispatch_exec_in_tx(
        &self,
        tx_id: &str,
        units: &[PlannedUnit],
    ) -> Result<Vec<backend::ExecOutcome>, ShardError> {
        let tx = self
            .tx
            .current(tx_id)
            .ok_or_else(|| TxError::NotStarted(tx_id.to_string()))?;

        if let Transaction::Base(base) = &*tx {
            // BASE never executes inline: statements queue for the
            // asynchronous phase, compensations come from the caller.
            for unit in units {
                let master = self.master_of(&unit.route_target);
                let backend = self
                    .backends
                    .get(&master)
                    .cloned()
                    .ok_or_else(|| ShardError::UnknownBackend(master))?;
                base.queue_operation(backend, &unit.sql, unit.params.clone())?;
            }
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            let backend = self.transactional_backend(&tx, &unit.route_target).await?;
            outcomes.push(backend.exec(&unit.sql, &unit.params).await?);
        }
        Ok(outcomes)
    }

    /// The session a statement must use inside a transaction: the pinned
    /// backend for Local (any other datasource is an error), the enlisted
    /// branch for XA.
    async fn transactional_backend(
        &self,
        tx: &Transaction,
        route_target: &str,
    ) -> Result<Arc<dyn Backend>, ShardError> {
        let master = self.master_of(route_target);
        match tx {
            Transaction::Local(local) => {
                if local.pinned_data_source() != master {
                    return Err(TxError::DataSourceNotPinned {
                        id: local.id().to_string(),
                        pinned: local.pinned_data_source().to_string(),
                        requested: master,
                    }
                    .into());
                }
                Ok(local.backend())
            }
            Transaction::Xa(xa) => {
                let backend = self
                    .backends
                    .get(&master)
                    .cloned()
                    .ok_or_else(|| ShardError::UnknownBackend(master.clone()))?;
                xa.enlist(Arc::clone(&backend)).await?;
                Ok(xa.branch_backend(&master).unwrap_or(backend))
            }
            Transaction::Base(_) => {
                let backend = self
                    .backends
                    .get(&master)
                    .cloned()
                    .ok_or_else(|| ShardError::UnknownBackend(master))?;
                Ok(backend)
            }
        }
    }

    fn merge_outcomes(
        &self,
        analyzed: &analyzer::AnalyzedStatement,
        outcomes: Vec<(String, QueryOutcome)>,
        plan: &Plan,
    ) -> Result<MergedResult, ShardError> {
        // Shards with nothing at all (no columns, no rows) carry no schema;
        // drop them unless every shard is like that.
        let mut sources: Vec<ShardRows> = outcomes
            .into_iter()
            .filter(|(_, o)| !(o.columns.is_empty() && o.rows.is_empty()))
            .map(|(shard, o)| ShardRows {
                shard,
                columns: o.columns,
                rows: o.rows,
            })
            .collect();
        if sources.is_empty() {
            return Ok(MergedResult {
                columns: Vec::new(),
                rows: Vec::new(),
            });
        }
        if sources.len() > 1 {
            debug!(shards = sources.len(), "merging multi-shard result");
        }

        let mut aggregate_aliases = HashMap::new();
        for alias in &analyzed.aggregate_aliases {
            let kind = match alias.function.as_str() {
                "COUNT" => AggregateKind::Count,
                "SUM" => AggregateKind::Sum,
                "AVG" => AggregateKind::Avg,
                "MIN" => AggregateKind::Min,
                "MAX" => AggregateKind::Max,
                _ => continue,
            };
            aggregate_aliases.insert(alias.alias.clone(), kind);
        }

        // On a single-route plan the shard applied the exact window itself;
        // re-slicing in the merger would apply it twice. Multi-route plans
        // dispatched the widened `LIMIT offset + count`, so the original
        // window is the merger's to apply.
        let limit = if plan.multi_route {
            analyzed.limit.map(|l| LimitSpec {
                offset: l.offset.unwrap_or(0),
                count: l.count,
            })
        } else {
            None
        };

        let merge_ctx = MergeContext {
            order_by: analyzed
                .order_by
                .iter()
                .map(|o| OrderByKey {
                    column: o.column.clone(),
                    desc: o.desc,
                })
                .collect(),
            group_by: analyzed.group_by.clone(),
            limit,
            aggregate_aliases,
            avg_pairs: plan.avg_pairs.clone(),
        };

        // Single-shard results skip the merge entirely when nothing needs
        // recomputation; the shard already applied ORDER/LIMIT.
        if sources.len() == 1
            && merge_ctx.group_by.is_empty()
            && merge_ctx.limit.is_none()
            && merge_ctx.avg_pairs.is_empty()
        {
            let only = sources.remove(0);
            return Ok(MergedResult {
                columns: only.columns,
                rows: only.rows,
            });
        }

        Ok(merger::merge(sources, &merge_ctx)?)
    }
}

/// Wrap a dispatch future with the request's cancellation token and
/// deadline.
async fn guard<T>(
    ctx: &RequestContext,
    fut: impl Future<Output = Result<T, ShardError>>,
) -> Result<T, ShardError> {
    let cancellation = ctx.cancellation.clone();
    let guarded = async {
        tokio::select! {
            _ = cancellation.cancelled() => Err(ShardError::Cancelled),
            result = fut => result,
        }
    };
    match ctx.remaining() {
        Some(remaining) => {
            if remaining.is_zero() {
                warn!("request deadline already passed before dispatch");
                return Err(ShardError::Timeout);
            }
            tokio::time::timeout(remaining, guarded)
                .await
                .map_err(|_| ShardError::Timeout)?
        }
        None => guarded.await,
    }
}
