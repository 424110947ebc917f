//! Ingester services: the top-level loops wiring fetcher, processor,
//! writer, pacing and metrics together.
//!
//! ```text
//! loop {
//!     heights = fetcher.fetch()          → observe fetch_missing
//!     empty?  → idle sleep (follower: or block signal)
//!     processor.process(heights, hook)   → observe process_batch
//!     post-batch sleep
//! }
//! ```
//!
//! A failed iteration is logged and followed by a back-off sleep; only
//! cancellation of the root token ends the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use utxoindex_core::{sleep, CancelHook, ChainScope, IngestError, IngestMetrics, PacingConfig};

use crate::fetcher::HeightFetcher;
use crate::processor::BlockProcessor;
use crate::signal::BlockSignal;
use crate::writer::BlockWriter;

/// Which of the three loops an [`Ingester`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngesterKind {
    History,
    Backfill,
    Follower,
}

impl IngesterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Backfill => "backfill",
            Self::Follower => "follower",
        }
    }
}

impl std::fmt::Display for IngesterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion loop for one `(coin, network)`.
pub struct Ingester {
    kind: IngesterKind,
    scope: ChainScope,
    fetcher: Arc<dyn HeightFetcher>,
    processor: Arc<dyn BlockProcessor>,
    /// Shared with the processor; `None` for the follower, whose processor
    /// owns its writer.
    writer: Option<Arc<BlockWriter>>,
    metrics: Arc<dyn IngestMetrics>,
    pacing: PacingConfig,
    signal: Option<BlockSignal>,
}

impl Ingester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: IngesterKind,
        scope: ChainScope,
        fetcher: Arc<dyn HeightFetcher>,
        processor: Arc<dyn BlockProcessor>,
        writer: Option<Arc<BlockWriter>>,
        metrics: Arc<dyn IngestMetrics>,
        pacing: PacingConfig,
        signal: Option<BlockSignal>,
    ) -> Self {
        Self {
            kind,
            scope,
            fetcher,
            processor,
            writer,
            metrics,
            pacing,
            signal,
        }
    }

    pub fn kind(&self) -> IngesterKind {
        self.kind
    }

    pub fn scope(&self) -> &ChainScope {
        &self.scope
    }

    /// Run until `cancel` fires. Always returns [`IngestError::Cancelled`],
    /// after the writer has drained.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        info!(
            pipeline = self.kind.as_str(),
            coin = %self.scope.coin,
            network = %self.scope.network,
            "ingester started"
        );

        let mut writer_token = cancel.child_token();
        if let Some(writer) = &self.writer {
            writer.start(&writer_token);
        }

        while !cancel.is_cancelled() {
            if let Some(writer) = &self.writer {
                if !writer.is_running() {
                    // A failed batch cancelled the writer through the pool hook.
                    writer.stop().await;
                    writer_token = cancel.child_token();
                    writer.start(&writer_token);
                    debug!(pipeline = self.kind.as_str(), "writer restarted");
                }
            }

            match self.iterate(cancel, &writer_token).await {
                Ok(()) => {}
                Err(_) if cancel.is_cancelled() => break,
                Err(err) => {
                    warn!(
                        pipeline = self.kind.as_str(),
                        coin = %self.scope.coin,
                        network = %self.scope.network,
                        error = %err,
                        backoff_ms = self.pacing.error_backoff_ms,
                        "ingest iteration failed, backing off"
                    );
                    if sleep(cancel, self.pacing.error_backoff()).await.is_err() {
                        break;
                    }
                }
            }
        }

        writer_token.cancel();
        if let Some(writer) = &self.writer {
            writer.stop().await;
        }
        info!(
            pipeline = self.kind.as_str(),
            coin = %self.scope.coin,
            network = %self.scope.network,
            "ingester stopped"
        );
        Err(IngestError::Cancelled)
    }

    /// One fetch → process cycle.
    async fn iterate(
        &mut self,
        cancel: &CancellationToken,
        writer_token: &CancellationToken,
    ) -> Result<(), IngestError> {
        let start = Instant::now();
        let fetched = self.fetcher.fetch(cancel).await;
        self.metrics.observe_fetch_missing(fetched.as_ref().err(), start);
        let heights = fetched?;

        if heights.is_empty() {
            debug!(
                pipeline = self.kind.as_str(),
                idle_ms = self.pacing.idle_ms,
                "no heights to process"
            );
            return self.pause(cancel, self.pacing.idle()).await;
        }

        let count = heights.len();
        let hook: CancelHook = {
            let writer_token = writer_token.clone();
            Arc::new(move || writer_token.cancel())
        };
        let start = Instant::now();
        let result = self.processor.process(cancel, heights, Some(hook)).await;
        self.metrics
            .observe_process_batch(result.as_ref().err(), count, start);
        result?;

        info!(
            pipeline = self.kind.as_str(),
            coin = %self.scope.coin,
            network = %self.scope.network,
            heights = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch processed"
        );
        self.pause(cancel, self.pacing.post_batch()).await
    }

    /// Sleep for `duration`; with a block signal, a notification ends the wait early.
    async fn pause(
        &mut self,
        cancel: &CancellationToken,
        duration: Duration,
    ) -> Result<(), IngestError> {
        let Some(signal) = self.signal.as_mut() else {
            return sleep(cancel, duration).await;
        };

        let timer = tokio::time::sleep(duration);
        tokio::pin!(timer);
        let woken = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            received = signal.recv() => Some(received.is_some()),
            _ = &mut timer => None,
        };
        match woken {
            Some(true) => {
                debug!(pipeline = self.kind.as_str(), "block signal received");
                Ok(())
            }
            Some(false) => {
                // Every notifier is gone; plain sleeping from here on.
                self.signal = None;
                sleep(cancel, duration).await
            }
            None => Ok(()),
        }
    }
}
