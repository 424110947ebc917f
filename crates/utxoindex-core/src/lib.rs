//! utxoindex-core: foundation for the multi-coin UTXO ingestion engine.
//!
//! # Architecture
//!
//! ```text
//! Ingester (history / backfill / follower)
//!     ├── HeightFetcher   (which heights to work on next)
//!     ├── BlockProcessor  (worker pool → source → writer)
//!     ├── BlockWriter     (Batcher → Repository, rows before blocks)
//!     └── IngestMetrics   (fetch_missing / process_batch / process_height)
//! ```
//!
//! This crate holds the leaf primitives ([`sleep`], [`convert`], [`pool`],
//! [`batcher`]), the data model, and the contracts external collaborators
//! implement ([`Repository`], [`HistorySource`], [`BackfillSource`]).

pub mod batcher;
pub mod config;
pub mod convert;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod pool;
pub mod repository;
pub mod sleep;
pub mod source;
pub mod types;

pub use batcher::{Batcher, BatcherConfig, FlushHandler};
pub use config::{IngestConfig, PacingConfig};
pub use error::IngestError;
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use metrics::{IngestMetrics, NoopMetrics, OperationMetrics};
pub use pool::CancelHook;
pub use repository::{InstrumentedRepository, Repository};
pub use sleep::{cancellable, sleep};
pub use source::{BackfillSource, ChainTip, HistorySource};
pub use types::{
    BackfillBlock, BackfillTransaction, Block, BlockStatus, ChainScope, HistoryBlock,
    InsertBlock, Transaction, TransactionInput, TransactionOutput, TransactionOutputLookup,
    ZERO_HASH,
};

pub use tokio_util::sync::CancellationToken;

/// Convenience alias used throughout the engine.
pub type Result<T, E = IngestError> = std::result::Result<T, E>;
