//! # utxoindex-observability
//!
//! OpenTelemetry implementations of the engine's metrics contracts.
//!
//! ## Pipeline metrics
//! Labelled `pipeline`, `coin`, `network`, `status`:
//! - `utxoindex.fetch_missing.duration` : histogram (seconds), `.total` counter
//! - `utxoindex.process_batch.duration` : histogram (seconds), `.total` counter
//! - `utxoindex.process_batch.heights`  : histogram, buckets `[1, 2, 4, …, 2048]`
//! - `utxoindex.process_height.duration`: histogram (seconds), `.total` counter
//!
//! ## Adapter metrics
//! `utxoindex.<component>.duration` and `.total`, labelled `operation`,
//! `coin`, `network`, `status`. Components are `repository` and `rpc`.
//!
//! ## Structured logging
//! [`init_tracing`] installs a `tracing-subscriber` registry with per-component
//! levels, emitting text or JSON lines.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{exponential_buckets, OtelIngestMetrics, OtelOperationMetrics};
pub use tracing_setup::{init_tracing, LogConfig};
