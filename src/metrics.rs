//! Process-wide OpenTelemetry instruments for anonymization runs.
//!
//! Counters are labelled with the table name so a Prometheus scrape shows
//! progress per table. Spans for `tracing` live in [`tracing_helpers`].

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
#[cfg(feature = "metrics")]
use opentelemetry_prometheus::PrometheusExporter;
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<VeilguardMetrics> = Lazy::new(VeilguardMetrics::init);

#[cfg(feature = "metrics")]
pub struct VeilguardMetrics {
    pub exporter: Option<PrometheusExporter>,
    pub queries_total: Counter<u64>,
    pub query_errors_total: Counter<u64>,
    pub query_duration: Histogram<f64>,
    pub rows_read: Counter<u64>,
    pub rows_written: Counter<u64>,
    pub rows_deleted: Counter<u64>,
    pub batches_failed: Counter<u64>,
    pub table_duration: Histogram<f64>,
}

#[cfg(feature = "metrics")]
impl VeilguardMetrics {
    pub fn init() -> Self {
        let exporter = match opentelemetry_prometheus::exporter().build() {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                log::warn!("prometheus exporter unavailable: {e}");
                None
            }
        };
        let meter = global::meter("veilguard");

        let queries_total = meter
            .u64_counter("veilguard_queries_total")
            .with_description("Total queries executed")
            .build();

        let query_errors_total = meter
            .u64_counter("veilguard_query_errors_total")
            .with_description("Queries that returned an error")
            .build();

        let query_duration = meter
            .f64_histogram("veilguard_query_duration_seconds")
            .with_description("Duration of queries")
            .build();

        let rows_read = meter
            .u64_counter("veilguard_rows_read_total")
            .with_description("Source rows streamed")
            .build();

        let rows_written = meter
            .u64_counter("veilguard_rows_written_total")
            .with_description("Destination rows inserted")
            .build();

        let rows_deleted = meter
            .u64_counter("veilguard_rows_deleted_total")
            .with_description("Source rows suppressed, by cause")
            .build();

        let batches_failed = meter
            .u64_counter("veilguard_batches_failed_total")
            .with_description("Insert batches lost to an error")
            .build();

        let table_duration = meter
            .f64_histogram("veilguard_table_duration_seconds")
            .with_description("Time spent anonymizing one table")
            .build();

        Self {
            exporter,
            queries_total,
            query_errors_total,
            query_duration,
            rows_read,
            rows_written,
            rows_deleted,
            batches_failed,
            table_duration,
        }
    }

    pub fn record_query(&self, elapsed: Duration) {
        self.queries_total.add(1, &[]);
        self.query_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_query_error(&self) {
        self.query_errors_total.add(1, &[]);
    }

    pub fn record_rows_read(&self, table: &str, count: u64) {
        self.rows_read
            .add(count, &[KeyValue::new("table", table.to_string())]);
    }

    pub fn record_rows_written(&self, table: &str, count: u64) {
        self.rows_written
            .add(count, &[KeyValue::new("table", table.to_string())]);
    }

    /// `cause` is `rule` or `cascade`.
    pub fn record_row_deleted(&self, table: &str, cause: &'static str) {
        self.rows_deleted.add(
            1,
            &[
                KeyValue::new("table", table.to_string()),
                KeyValue::new("cause", cause),
            ],
        );
    }

    pub fn record_batch_failed(&self, table: &str) {
        self.batches_failed
            .add(1, &[KeyValue::new("table", table.to_string())]);
    }

    pub fn record_table(&self, table: &str, elapsed: Duration) {
        self.table_duration.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("table", table.to_string())],
        );
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span around one SQL statement; the text is truncated to keep spans small.
    pub fn execute_query_span(query: &str) -> Span {
        let statement: String = query.chars().take(120).collect();
        info_span!("execute_query", db.statement = %statement)
    }

    /// Span around the processing of one table.
    pub fn anonymize_table_span(schema: &str, table: &str) -> Span {
        info_span!("anonymize_table", db.schema = %schema, db.table = %table)
    }

    /// Span around strategy setup for one table.
    pub fn strategy_setup_span(strategy: &str, table: &str) -> Span {
        info_span!("strategy_setup", strategy = %strategy, db.table = %table)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_panicking() {
        METRICS.record_query(Duration::from_millis(3));
        METRICS.record_query_error();
        METRICS.record_rows_read("VISITOR", 10);
        METRICS.record_rows_written("VISITOR", 9);
        METRICS.record_row_deleted("VISITOR", "rule");
        METRICS.record_batch_failed("VISITOR");
        METRICS.record_table("VISITOR", Duration::from_secs(1));
    }
}
