//! Fluent builder for the three ingesters of one chain.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use utxoindex_core::{IngestConfig, Repository, HistorySource};
//! # async fn demo<S: HistorySource + 'static>(source: Arc<S>, repo: Arc<dyn Repository>) {
//! use utxoindex_ingest::IngesterBuilder;
//!
//! let history = IngesterBuilder::new(IngestConfig::new("btc", "mainnet"))
//!     .worker_count(16)
//!     .history(source, repo)
//!     .expect("valid config");
//! # }
//! ```

use std::sync::Arc;

use tracing::debug;

use utxoindex_core::{
    BackfillSource, ChainScope, ChainTip, HistorySource, IngestConfig, IngestError, IngestMetrics,
    InstrumentedRepository, NoopMetrics, OperationMetrics, Repository,
};

use crate::fetcher::{BackfillFetcher, FollowerFetcher, HistoryFetcher};
use crate::processor::{BackfillProcessor, FollowerProcessor, HistoryProcessor};
use crate::service::{Ingester, IngesterKind};
use crate::signal::BlockSignal;
use crate::writer::{BlockWriter, FlushThresholds};

/// Assembles an [`Ingester`] from a config, a store and a chain source.
pub struct IngesterBuilder {
    config: IngestConfig,
    metrics: Arc<dyn IngestMetrics>,
    operation_metrics: Option<Arc<dyn OperationMetrics>>,
    signal: Option<BlockSignal>,
}

impl Default for IngesterBuilder {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

impl IngesterBuilder {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetrics),
            operation_metrics: None,
            signal: None,
        }
    }

    /// Set the chain scope.
    pub fn chain(mut self, coin: impl Into<String>, network: impl Into<String>) -> Self {
        self.config.coin = coin.into();
        self.config.network = network.into();
        self
    }

    /// Set per-height concurrency.
    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n;
        self
    }

    /// Set the selection batch size.
    pub fn random_height_limit(mut self, n: usize) -> Self {
        self.config.random_height_limit = n;
        self
    }

    /// Pipeline metrics. The sink should already carry this ingester's labels.
    pub fn metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Observe every repository call through an [`InstrumentedRepository`].
    pub fn repository_metrics(mut self, metrics: Arc<dyn OperationMetrics>) -> Self {
        self.operation_metrics = Some(metrics);
        self
    }

    /// Block-arrival signal; only the follower listens to it.
    pub fn signal(mut self, signal: BlockSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn prepare(
        &self,
        repo: Arc<dyn Repository>,
    ) -> Result<(ChainScope, Arc<dyn Repository>), IngestError> {
        self.config.validate()?;
        let scope = self.config.scope();
        let repo = match &self.operation_metrics {
            Some(metrics) => Arc::new(InstrumentedRepository::new(
                repo,
                scope.clone(),
                Arc::clone(metrics),
            )) as Arc<dyn Repository>,
            None => repo,
        };
        Ok((scope, repo))
    }

    fn ignore_signal(&self, kind: IngesterKind) {
        if self.signal.is_some() {
            debug!(pipeline = kind.as_str(), "block signal ignored outside the follower");
        }
    }

    /// Raw block, transaction and output ingestion (status `unprocessed`).
    pub fn history<S>(
        self,
        source: Arc<S>,
        repo: Arc<dyn Repository>,
    ) -> Result<Ingester, IngestError>
    where
        S: HistorySource + 'static,
    {
        let (scope, repo) = self.prepare(repo)?;
        self.ignore_signal(IngesterKind::History);
        let config = self.config;

        let writer = Arc::new(BlockWriter::history(
            Arc::clone(&repo),
            FlushThresholds::from(&config),
            config.batcher_config(),
        ));
        let tip: Arc<dyn ChainTip> = source.clone();
        let fetcher = HistoryFetcher::new(tip, repo, scope.clone(), config.random_height_limit);
        let processor = HistoryProcessor::new(
            source,
            Arc::clone(&writer),
            Arc::clone(&self.metrics),
            scope.clone(),
            config.worker_count,
        );

        Ok(Ingester::new(
            IngesterKind::History,
            scope,
            Arc::new(fetcher),
            Arc::new(processor),
            Some(writer),
            self.metrics,
            config.history,
            None,
        ))
    }

    /// Input resolution (status `processed`).
    pub fn backfill<S>(
        self,
        source: Arc<S>,
        repo: Arc<dyn Repository>,
    ) -> Result<Ingester, IngestError>
    where
        S: BackfillSource + 'static,
    {
        let (scope, repo) = self.prepare(repo)?;
        self.ignore_signal(IngesterKind::Backfill);
        let config = self.config;

        let writer = Arc::new(BlockWriter::backfill(
            Arc::clone(&repo),
            FlushThresholds::from(&config),
            config.batcher_config(),
        ));
        let fetcher =
            BackfillFetcher::new(Arc::clone(&repo), scope.clone(), config.random_height_limit);
        let processor = BackfillProcessor::new(
            source,
            repo,
            Arc::clone(&writer),
            Arc::clone(&self.metrics),
            scope.clone(),
            config.worker_count,
        );

        Ok(Ingester::new(
            IngesterKind::Backfill,
            scope,
            Arc::new(fetcher),
            Arc::new(processor),
            Some(writer),
            self.metrics,
            config.backfill,
            None,
        ))
    }

    /// Tip placeholders (status `new`).
    pub fn follower<S>(
        self,
        source: Arc<S>,
        repo: Arc<dyn Repository>,
    ) -> Result<Ingester, IngestError>
    where
        S: ChainTip + 'static,
    {
        let (scope, repo) = self.prepare(repo)?;
        let config = self.config;

        let tip: Arc<dyn ChainTip> = source;
        let fetcher = FollowerFetcher::new(
            tip,
            Arc::clone(&repo),
            scope.clone(),
            config.random_height_limit,
        );
        let processor = FollowerProcessor::new(
            repo,
            Arc::clone(&self.metrics),
            scope.clone(),
            config.batcher_config(),
        );

        Ok(Ingester::new(
            IngesterKind::Follower,
            scope,
            Arc::new(fetcher),
            Arc::new(processor),
            None,
            self.metrics,
            config.follower,
            self.signal,
        ))
    }
}
