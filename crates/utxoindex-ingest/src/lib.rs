//! utxoindex-ingest: the history, backfill and follower ingesters.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use utxoindex_core::{BackfillSource, HistorySource, IngestConfig, Repository};
//! # async fn demo<S>(source: Arc<S>, repo: Arc<dyn Repository>)
//! # where S: HistorySource + BackfillSource + 'static {
//! use utxoindex_core::CancellationToken;
//! use utxoindex_ingest::{block_signal, IngesterBuilder};
//!
//! let config = IngestConfig::new("btc", "mainnet");
//! let (notifier, signal) = block_signal();
//!
//! let mut history = IngesterBuilder::new(config.clone())
//!     .history(source.clone(), repo.clone())
//!     .unwrap();
//! let mut backfill = IngesterBuilder::new(config.clone())
//!     .backfill(source.clone(), repo.clone())
//!     .unwrap();
//! let mut follower = IngesterBuilder::new(config).signal(signal).follower(source, repo).unwrap();
//!
//! let cancel = CancellationToken::new();
//! let _ = tokio::join!(history.run(&cancel), backfill.run(&cancel), follower.run(&cancel));
//! # drop(notifier);
//! # }
//! ```

pub mod builder;
pub mod fetcher;
pub mod processor;
pub mod resolver;
pub mod service;
pub mod signal;
pub mod writer;

pub use builder::IngesterBuilder;
pub use fetcher::{BackfillFetcher, FollowerFetcher, HeightFetcher, HistoryFetcher};
pub use processor::{BackfillProcessor, BlockProcessor, FollowerProcessor, HistoryProcessor};
pub use resolver::OutputResolver;
pub use service::{Ingester, IngesterKind};
pub use signal::{block_signal, BlockNotifier, BlockSignal};
pub use writer::{BlockWriter, FlushThresholds};
