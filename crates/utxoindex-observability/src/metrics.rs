//! Metric instruments for ingesters and adapters.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

use utxoindex_core::metrics::{label_or_unknown, status_label};
use utxoindex_core::{ChainScope, IngestError, IngestMetrics, OperationMetrics};

/// `count` bucket boundaries starting at `start`, each `factor` times the last.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |b| Some(b * factor))
        .take(count)
        .collect()
}

fn duration_buckets() -> Vec<f64> {
    // 1ms .. ~33s
    exponential_buckets(0.001, 2.0, 16)
}

/// One duration histogram plus its call counter.
#[derive(Clone)]
struct Timed {
    duration: Histogram<f64>,
    total: Counter<u64>,
}

impl Timed {
    fn new(meter: &Meter, name: &str, what: &str) -> Self {
        Self {
            duration: meter
                .f64_histogram(format!("{name}.duration"))
                .with_description(format!("Duration of {what} in seconds"))
                .with_unit("s")
                .with_boundaries(duration_buckets())
                .build(),
            total: meter
                .u64_counter(format!("{name}.total"))
                .with_description(format!("Number of {what}"))
                .build(),
        }
    }

    fn record(&self, start: Instant, labels: &[KeyValue]) {
        self.duration
            .record(start.elapsed().as_secs_f64(), labels);
        self.total.add(1, labels);
    }
}

/// Pipeline metrics for one ingester of one `(coin, network)`.
#[derive(Clone)]
pub struct OtelIngestMetrics {
    pipeline: String,
    coin: String,
    network: String,
    fetch_missing: Timed,
    process_batch: Timed,
    process_batch_heights: Histogram<u64>,
    process_height: Timed,
}

impl OtelIngestMetrics {
    pub fn new(meter: &Meter, pipeline: &str, scope: &ChainScope) -> Self {
        Self {
            pipeline: label_or_unknown(pipeline),
            coin: label_or_unknown(&scope.coin),
            network: label_or_unknown(&scope.network),
            fetch_missing: Timed::new(meter, "utxoindex.fetch_missing", "height selections"),
            process_batch: Timed::new(meter, "utxoindex.process_batch", "processed batches"),
            process_batch_heights: meter
                .u64_histogram("utxoindex.process_batch.heights")
                .with_description("Heights per processed batch")
                .with_boundaries(exponential_buckets(1.0, 2.0, 12))
                .build(),
            process_height: Timed::new(meter, "utxoindex.process_height", "processed heights"),
        }
    }

    fn labels(&self, err: Option<&IngestError>) -> [KeyValue; 4] {
        [
            KeyValue::new("pipeline", self.pipeline.clone()),
            KeyValue::new("coin", self.coin.clone()),
            KeyValue::new("network", self.network.clone()),
            KeyValue::new("status", status_label(err)),
        ]
    }
}

impl IngestMetrics for OtelIngestMetrics {
    fn observe_fetch_missing(&self, err: Option<&IngestError>, start: Instant) {
        self.fetch_missing.record(start, &self.labels(err));
    }

    fn observe_process_batch(&self, err: Option<&IngestError>, heights: usize, start: Instant) {
        let labels = self.labels(err);
        self.process_batch.record(start, &labels);
        self.process_batch_heights
            .record(heights as u64, &labels);
    }

    fn observe_process_height(&self, err: Option<&IngestError>, _height: u64, start: Instant) {
        self.process_height.record(start, &self.labels(err));
    }
}

/// Per-operation metrics for one adapter component (`repository`, `rpc`).
#[derive(Clone)]
pub struct OtelOperationMetrics {
    timed: Timed,
}

impl OtelOperationMetrics {
    pub fn new(meter: &Meter, component: &str) -> Self {
        let component = label_or_unknown(component);
        Self {
            timed: Timed::new(
                meter,
                &format!("utxoindex.{component}"),
                &format!("{component} operations"),
            ),
        }
    }

    pub fn repository(meter: &Meter) -> Self {
        Self::new(meter, "repository")
    }

    pub fn rpc(meter: &Meter) -> Self {
        Self::new(meter, "rpc")
    }
}

impl OperationMetrics for OtelOperationMetrics {
    fn observe(
        &self,
        operation: &str,
        scope: &ChainScope,
        err: Option<&IngestError>,
        start: Instant,
    ) {
        let labels = [
            KeyValue::new("operation", label_or_unknown(operation)),
            KeyValue::new("coin", label_or_unknown(&scope.coin)),
            KeyValue::new("network", label_or_unknown(&scope.network)),
            KeyValue::new("status", status_label(err)),
        ];
        self.timed.record(start, &labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_buckets_double_up_to_2048() {
        let buckets = exponential_buckets(1.0, 2.0, 12);
        assert_eq!(buckets.first(), Some(&1.0));
        assert_eq!(buckets.last(), Some(&2048.0));
        assert_eq!(buckets.len(), 12);
    }

    #[test]
    fn observes_without_a_provider() {
        // The global meter is a no-op until a provider is installed.
        let meter = opentelemetry::global::meter("utxoindex-test");
        let scope = ChainScope::new("btc", "");
        let ingest = OtelIngestMetrics::new(&meter, "history", &scope);
        assert_eq!(ingest.network, "unknown");

        let start = Instant::now();
        ingest.observe_fetch_missing(None, start);
        ingest.observe_process_batch(Some(&IngestError::Cancelled), 12, start);
        ingest.observe_process_height(None, 7, start);

        let repo = OtelOperationMetrics::repository(&meter);
        repo.observe("insert_blocks", &scope, None, start);
        OtelOperationMetrics::rpc(&meter).observe("getblock", &scope, None, start);
    }
}
