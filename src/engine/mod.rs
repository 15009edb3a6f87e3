//! The anonymization engine.
//!
//! [`Anonymizer::run`] copies every table of the scope, in scope order, from
//! the source to the destination:
//!
//! 1. truncate the destination table
//! 2. set up and prepare the strategies with rules on the table
//! 3. stream the source rows, and for each row
//!    - drop it if a parent row was deleted, unless it is retained
//!    - apply whole-row rules, then each column's rule chain
//!    - expand the per-column value sets into their Cartesian product
//! 4. insert the resulting rows in batches, committing after each batch
//!
//! Row-local and batch-local failures are logged and counted in the
//! [`RunReport`]; setup failures and retention mark failures abort the run.

mod report;

pub use report::{RunReport, TableReport};

use crate::cascade::ordering::{dependency_graph, misordered};
use crate::cascade::CascadeTracker;
use crate::context::{RunContext, TableShape};
use crate::database::{resolve_name, ColumnKind, ColumnMeta};
use crate::error::{error_chain, AnonymizerError, DbError, StrategyError};
use crate::model::{BoundRule, PrimaryKey, Rule, TableRuleMap, TableRules};
use crate::strategy::{StrategyId, StrategyRegistry};
use crate::value::{Row, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Rule chains of one table, resolved against its columns
struct TablePlan {
    whole_row: Vec<BoundRule>,
    /// One chain per source column, in column order
    chains: Vec<Vec<BoundRule>>,
    kinds: Vec<ColumnKind>,
}

impl TablePlan {
    fn new(shape: &TableShape, rules: Option<&TableRules>) -> Self {
        let kinds = shape.columns.iter().map(ColumnMeta::kind).collect();
        let Some(rules) = rules else {
            return Self {
                whole_row: Vec::new(),
                chains: vec![Vec::new(); shape.columns.len()],
                kinds,
            };
        };
        for column in rules.columns() {
            if shape.column(column).is_none() {
                log::warn!("rules on {}.{column} are ignored, the column does not exist", shape.name);
            }
        }
        Self {
            whole_row: rules.whole_row().to_vec(),
            chains: shape
                .columns
                .iter()
                .map(|c| rules.for_column(&c.name).to_vec())
                .collect(),
            kinds,
        }
    }
}

/// Why a source row produced no destination rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deletion {
    Rule,
    Cascade,
}

impl Deletion {
    fn label(self) -> &'static str {
        match self {
            Deletion::Rule => "rule",
            Deletion::Cascade => "cascade",
        }
    }
}

enum RowOutcome {
    Deleted(Deletion),
    Rows(Vec<Vec<Value>>),
}

/// Runs a rule set over a scope of tables
pub struct Anonymizer<'a> {
    ctx: RunContext<'a>,
    registry: StrategyRegistry,
    rules: Vec<BoundRule>,
    scope: Vec<String>,
    batch_size: usize,
    /// Ids of the rules already set up
    set_up: HashSet<usize>,
    destination_tables: HashMap<String, String>,
}

impl<'a> Anonymizer<'a> {
    /// Bind every rule to its strategy.
    ///
    /// # Errors
    ///
    /// Returns `AnonymizerError::UnknownStrategy` for a rule whose strategy is
    /// not registered.
    pub fn new(
        ctx: RunContext<'a>,
        registry: StrategyRegistry,
        rules: Vec<Rule>,
        scope: Vec<String>,
    ) -> Result<Self, AnonymizerError> {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(id, rule)| match registry.resolve(rule.strategy()) {
                Some(strategy) => Ok(BoundRule {
                    id,
                    rule: Arc::new(rule),
                    strategy,
                }),
                None => Err(AnonymizerError::UnknownStrategy {
                    strategy: rule.strategy().to_string(),
                    field: rule.field().to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ctx,
            registry,
            rules,
            scope,
            batch_size: DEFAULT_BATCH_SIZE,
            set_up: HashSet::new(),
            destination_tables: HashMap::new(),
        })
    }

    /// Rows per insert batch and commit; zero is treated as one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn context(&self) -> &RunContext<'a> {
        &self.ctx
    }

    /// Run over every table of the scope
    ///
    /// # Errors
    ///
    /// Returns `AnonymizerError` when the destination lacks a table of the
    /// scope, a table's metadata cannot be read, a strategy fails to set up,
    /// the destination cannot be truncated or a retention mark cannot be
    /// written. The full cause chain is logged before returning.
    pub fn run(&mut self) -> Result<RunReport, AnonymizerError> {
        let result = self.run_inner();
        if let Err(e) = &result {
            log::error!("anonymization aborted: {}", error_chain(e));
        }
        result
    }

    fn run_inner(&mut self) -> Result<RunReport, AnonymizerError> {
        let started = Instant::now();
        self.check_destination()?;
        let mut cascade = self.build_cascade();
        let rule_map = TableRuleMap::build(&self.rules, &self.scope);

        let schema = self.ctx.schema().to_string();
        if let Err(e) = self.ctx.transformation().create_schema(&schema) {
            log::warn!("cannot create schema {schema} in the transformation database, assuming it exists: {e}");
        }
        if let Err(e) = self.ctx.destination().set_referential_integrity(false) {
            log::warn!("cannot disable referential integrity on the destination: {e}");
        }

        let mut report = RunReport::default();
        let mut outcome = Ok(());
        for table in self.scope.clone() {
            match self.anonymize_table(&table, &rule_map, &mut cascade) {
                Ok(table_report) => report.tables.push(table_report),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = self.ctx.destination().set_referential_integrity(true) {
            log::warn!("cannot re-enable referential integrity on the destination: {e}");
        }
        outcome?;

        for strategy in self.registry.iter() {
            if let Some(line) = strategy.summary() {
                log::info!("{}: {line}", strategy.name());
                report.summaries.push(line);
            }
        }
        report.elapsed_seconds = started.elapsed().as_secs_f64();
        log::info!(
            "anonymized {} tables, {} rows written in {:.1}s",
            report.tables.len(),
            report.rows_written(),
            report.elapsed_seconds
        );
        Ok(report)
    }

    /// Every table of the scope must exist in the destination.
    fn check_destination(&mut self) -> Result<(), AnonymizerError> {
        let names = self
            .ctx
            .destination()
            .table_names(self.ctx.schema())
            .map_err(|source| AnonymizerError::Database {
                context: "reading destination tables".to_string(),
                source,
            })?;
        let mut missing = Vec::new();
        for table in &self.scope {
            match resolve_name(&names, table) {
                Some(name) => {
                    self.destination_tables.insert(table.to_uppercase(), name.to_string());
                }
                None => missing.push(table.clone()),
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AnonymizerError::MissingDestinationTables(missing))
        }
    }

    fn build_cascade(&self) -> CascadeTracker {
        match self.ctx.source().foreign_keys(self.ctx.schema()) {
            Ok(fks) => {
                for (child, parent) in misordered(&dependency_graph(&fks, &self.scope)) {
                    log::warn!(
                        "{child} is processed before its parent {parent}, rows referencing deleted {parent} rows will be kept"
                    );
                }
                CascadeTracker::build(&self.ctx, &fks, &self.scope)
            }
            Err(e) => {
                log::warn!(
                    "cannot read foreign keys of {}, cascade deletion is disabled: {}",
                    self.ctx.schema(),
                    error_chain(&e)
                );
                CascadeTracker::empty()
            }
        }
    }

    /// Run `set_up` for rules not set up yet and `prepare_for_table` for every
    /// strategy with rules on `table`.
    fn prepare_strategies(&mut self, table: &str, rules: &TableRules) -> Result<(), AnonymizerError> {
        let mut by_strategy: Vec<(StrategyId, Vec<&BoundRule>)> = Vec::new();
        for bound in rules.rules() {
            match by_strategy.iter_mut().find(|(id, _)| *id == bound.strategy) {
                Some((_, group)) => group.push(bound),
                None => by_strategy.push((bound.strategy, vec![bound])),
            }
        }

        for (id, bound_group) in by_strategy {
            let fresh: Vec<Arc<Rule>> = bound_group
                .iter()
                .filter(|bound| self.set_up.insert(bound.id))
                .map(|bound| Arc::clone(&bound.rule))
                .collect();
            let group: Vec<Arc<Rule>> = bound_group.iter().map(|bound| Arc::clone(&bound.rule)).collect();
            let strategy = self.registry.get_mut(id).ok_or_else(|| AnonymizerError::UnknownStrategy {
                strategy: format!("{id:?}"),
                field: table.to_string(),
            })?;
            let name = strategy.name().to_string();
            let setup_failed = |source: StrategyError| AnonymizerError::Setup {
                table: table.to_string(),
                strategy: name.clone(),
                source,
            };
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::strategy_setup_span(&name, table).entered();
            if !fresh.is_empty() {
                log::debug!("setting up {} rules of {name} for {table}", fresh.len());
                if let Err(e) = strategy.set_up(&self.ctx, &fresh) {
                    return Err(setup_failed(e));
                }
            }
            if let Err(e) = strategy.prepare_for_table(&self.ctx, table, &group) {
                return Err(setup_failed(e));
            }
        }
        Ok(())
    }

    fn anonymize_table(
        &mut self,
        table: &str,
        rule_map: &TableRuleMap,
        cascade: &mut CascadeTracker,
    ) -> Result<TableReport, AnonymizerError> {
        let started = Instant::now();
        let schema = self.ctx.schema().to_string();
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::anonymize_table_span(&schema, table).entered();

        let shape = self.ctx.table_shape(table)?;
        let key = self.ctx.primary_key(table)?;
        let destination = self
            .destination_tables
            .get(&table.to_uppercase())
            .cloned()
            .unwrap_or_else(|| shape.name.clone());
        let dst = self.ctx.destination();
        let database_error = |context: String| move |source: DbError| AnonymizerError::Database { context, source };

        let target_columns = self.destination_columns(&shape, &destination)?;
        dst.truncate(&schema, &destination)
            .map_err(database_error(format!("truncating {schema}.{destination}")))?;

        let rules = rule_map.for_table(&shape.name);
        if let Some(rules) = rules {
            self.prepare_strategies(&shape.name, rules)?;
        }
        let plan = TablePlan::new(&shape, rules);
        log::info!(
            "anonymizing {schema}.{} ({} rules)",
            shape.name,
            rules.map_or(0, |r| r.rules().len())
        );

        let mut report = TableReport::new(shape.name.clone());
        let stream = self
            .ctx
            .source()
            .rows(&schema, &shape.name, &shape.column_names())
            .map_err(database_error(format!("reading {schema}.{}", shape.name)))?;
        if let Err(e) = dst.begin() {
            log::warn!("cannot open a transaction on {destination}, inserting in auto-commit: {e}");
        }

        let mut batch: Vec<Vec<Value>> = Vec::with_capacity(self.batch_size);
        for item in stream {
            let row = match item {
                Ok(row) => row,
                Err(e) => {
                    log::error!("cannot read a row of {}: {}", shape.name, error_chain(&e));
                    report.failed_rows += 1;
                    continue;
                }
            };
            report.rows_read += 1;

            match self.process_row(&row, &plan, &key, cascade, &mut report) {
                Ok(RowOutcome::Rows(rows)) => {
                    batch.extend(rows);
                    if batch.len() >= self.batch_size {
                        self.flush(&destination, &target_columns, &mut batch, &mut report);
                        if let Err(e) = dst.begin() {
                            log::warn!("cannot open a transaction on {destination}: {e}");
                        }
                    }
                }
                Ok(RowOutcome::Deleted(cause)) => {
                    if let Some(values) = key.values_of(&row) {
                        cascade.record_deleted(row.table(), values);
                    }
                    match cause {
                        Deletion::Rule => report.deleted_by_rule += 1,
                        Deletion::Cascade => report.deleted_by_cascade += 1,
                    }
                    #[cfg(feature = "metrics")]
                    METRICS.record_row_deleted(&shape.name, cause.label());
                    log::trace!("row of {} deleted by {}", shape.name, cause.label());
                }
                Err(e) if e.is_fatal() => {
                    if let Err(rollback) = dst.rollback() {
                        log::error!("rollback on {destination} failed: {rollback}");
                    }
                    return Err(AnonymizerError::RetentionMarkFailed {
                        table: shape.name.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    log::error!("skipping a row of {}: {}", shape.name, error_chain(&e));
                    report.failed_rows += 1;
                }
            }
        }
        self.flush(&destination, &target_columns, &mut batch, &mut report);

        #[cfg(feature = "metrics")]
        {
            METRICS.record_rows_read(&shape.name, report.rows_read);
            METRICS.record_table(&shape.name, started.elapsed());
        }
        log::info!(
            "{}: {} rows read, {} written, {} deleted by rules, {} by cascade, {} failed, in {:?}",
            shape.name,
            report.rows_read,
            report.rows_written,
            report.deleted_by_rule,
            report.deleted_by_cascade,
            report.failed_rows,
            started.elapsed()
        );
        Ok(report)
    }

    /// Destination spelling of every source column, in source order
    fn destination_columns(&self, shape: &TableShape, destination: &str) -> Result<Vec<String>, AnonymizerError> {
        let schema = self.ctx.schema();
        let columns = self
            .ctx
            .destination()
            .columns(schema, destination)
            .map_err(|source| AnonymizerError::Database {
                context: format!("reading columns of {schema}.{destination}"),
                source,
            })?;
        let names: Vec<String> = columns.into_iter().map(|c| c.name).collect();
        shape
            .columns
            .iter()
            .map(|c| {
                resolve_name(&names, &c.name)
                    .map(str::to_string)
                    .ok_or_else(|| AnonymizerError::Database {
                        context: format!("destination {schema}.{destination}"),
                        source: DbError::Query(format!("column {} does not exist", c.name)),
                    })
            })
            .collect()
    }

    /// Insert `batch` and commit, or roll back and count the batch as lost.
    /// Leaves `batch` empty.
    fn flush(&self, destination: &str, columns: &[String], batch: &mut Vec<Vec<Value>>, report: &mut TableReport) {
        let dst = self.ctx.destination();
        let inserted = if batch.is_empty() {
            Ok(0)
        } else {
            dst.insert_rows(self.ctx.schema(), destination, columns, batch)
        };
        match inserted {
            Ok(count) => {
                report.rows_written += count;
                #[cfg(feature = "metrics")]
                METRICS.record_rows_written(destination, count);
                if let Err(e) = dst.commit() {
                    log::error!("commit on {destination} failed: {}", error_chain(&e));
                }
            }
            Err(e) => {
                log::error!(
                    "batch of {} rows for {destination} lost: {}",
                    batch.len(),
                    error_chain(&e)
                );
                report.failed_batches += 1;
                #[cfg(feature = "metrics")]
                METRICS.record_batch_failed(destination);
                if let Err(e) = dst.rollback() {
                    log::error!("rollback on {destination} failed: {}", error_chain(&e));
                }
            }
        }
        batch.clear();
    }

    fn process_row(
        &mut self,
        row: &Row,
        plan: &TablePlan,
        key: &PrimaryKey,
        cascade: &CascadeTracker,
        report: &mut TableReport,
    ) -> Result<RowOutcome, StrategyError> {
        if cascade.parent_was_deleted(row) {
            if !self.ctx.is_retained(row)? {
                return Ok(RowOutcome::Deleted(Deletion::Cascade));
            }
            log::warn!(
                "keeping retained row {} of {} although its parent was deleted",
                describe_key(key, row),
                row.table()
            );
            report.retention_overrides += 1;
        }

        for bound in &plan.whole_row {
            if self.apply(bound, &Value::Null, None, row)?.is_empty() {
                if !self.ctx.is_retained(row)? {
                    return Ok(RowOutcome::Deleted(Deletion::Rule));
                }
                log::debug!("{} would delete retained row {}", bound.rule, describe_key(key, row));
                report.retention_overrides += 1;
            }
        }

        let mut columns = Vec::with_capacity(plan.chains.len());
        for ((original, chain), kind) in row.values().iter().zip(&plan.chains).zip(&plan.kinds) {
            let mut values = vec![original.clone()];
            for bound in chain {
                let mut next = Vec::with_capacity(values.len());
                for value in &values {
                    next.extend(self.apply(bound, value, Some(*kind), row)?);
                }
                if !next.is_empty() {
                    values = next;
                } else if self.ctx.is_retained(row)? {
                    log::debug!("{} would delete retained row {}", bound.rule, describe_key(key, row));
                    report.retention_overrides += 1;
                } else {
                    return Ok(RowOutcome::Deleted(Deletion::Rule));
                }
            }
            columns.push(values);
        }
        Ok(RowOutcome::Rows(cartesian_product(&columns)))
    }

    /// Apply one rule. A missing pseudonym is replaced by an empty string in a
    /// text column; in any other column the row fails.
    fn apply(
        &mut self,
        bound: &BoundRule,
        value: &Value,
        kind: Option<ColumnKind>,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        let strategy = self
            .registry
            .get_mut(bound.strategy)
            .ok_or_else(|| StrategyError::TransformationFailed {
                rule: bound.rule.to_string(),
                reason: "strategy is not registered".to_string(),
            })?;
        match strategy.transform(&self.ctx, value, &bound.rule, row) {
            Err(StrategyError::KeyNotFound { table, value }) if kind == Some(ColumnKind::Text) => {
                log::error!("no pseudonym for {value} in {table}, writing an empty string");
                Ok(vec![Value::Text(String::new())])
            }
            other => other,
        }
    }
}

fn describe_key(key: &PrimaryKey, row: &Row) -> String {
    match key.values_of(row) {
        Some(values) => {
            let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
            format!("({})", rendered.join(", "))
        }
        None => "(unknown key)".to_string(),
    }
}

/// Every combination of one value per column, first column varying slowest
pub fn cartesian_product(columns: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(columns.len())];
    for values in columns {
        let mut next = Vec::with_capacity(rows.len() * values.len());
        for prefix in &rows {
            for value in values {
                let mut row = prefix.clone();
                row.push(value.clone());
                next.push(row);
            }
        }
        rows = next;
    }
    rows
}

#[cfg(test)]
mod tests;
