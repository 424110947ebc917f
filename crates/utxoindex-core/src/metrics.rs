//! Metrics contracts.
//!
//! Ingesters report three families, each labelled by `(coin, network, status)`:
//! `fetch_missing`, `process_batch` and `process_height`. Repository and RPC
//! adapters report a single per-operation family. Implementations live in
//! `utxoindex-observability`; [`NoopMetrics`] discards everything.

use std::time::Instant;

use crate::error::IngestError;
use crate::types::ChainScope;

/// Per-ingester observations. The `(coin, network)` labels are bound at construction.
pub trait IngestMetrics: Send + Sync {
    /// One observation per height-selection attempt.
    fn observe_fetch_missing(&self, err: Option<&IngestError>, start: Instant);

    /// One observation per worker-pool invocation.
    fn observe_process_batch(&self, err: Option<&IngestError>, heights: usize, start: Instant);

    /// One observation per per-height function invocation.
    fn observe_process_height(&self, err: Option<&IngestError>, height: u64, start: Instant);
}

/// Per-operation observations for repository and RPC adapters.
pub trait OperationMetrics: Send + Sync {
    fn observe(
        &self,
        operation: &str,
        scope: &ChainScope,
        err: Option<&IngestError>,
        start: Instant,
    );
}

/// Discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl IngestMetrics for NoopMetrics {
    fn observe_fetch_missing(&self, _err: Option<&IngestError>, _start: Instant) {}
    fn observe_process_batch(&self, _err: Option<&IngestError>, _heights: usize, _start: Instant) {}
    fn observe_process_height(&self, _err: Option<&IngestError>, _height: u64, _start: Instant) {}
}

impl OperationMetrics for NoopMetrics {
    fn observe(
        &self,
        _operation: &str,
        _scope: &ChainScope,
        _err: Option<&IngestError>,
        _start: Instant,
    ) {
    }
}

/// `"success"` or `"error"`.
pub fn status_label(err: Option<&IngestError>) -> &'static str {
    if err.is_some() {
        "error"
    } else {
        "success"
    }
}

/// Empty label values are reported as `"unknown"`.
pub fn label_or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}
