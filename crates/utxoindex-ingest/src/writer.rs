//! Block writers: a batcher of [`InsertBlock`] bundles exploded into row
//! families on flush.
//!
//! Within a flush, rows are written strictly before the block headers that
//! reference them. A block's status upgrade is therefore never visible before
//! its transactions, outputs or inputs are durable.
//!
//! A writer also tracks the heights it has queued but not yet flushed.
//! Processors skip those heights, so a height is never written twice by the
//! same pipeline with a stale row landing after a newer status.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use utxoindex_core::{
    Batcher, BatcherConfig, BlockStatus, FlushHandler, IngestConfig, IngestError, InsertBlock,
    Repository, TransactionOutput, TransactionOutputLookup,
};

/// Row counts that trigger an intermediate insert inside one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub transactions: usize,
    pub outputs: usize,
    pub inputs: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            transactions: 1_000,
            outputs: 1_000,
            inputs: 1_000,
        }
    }
}

impl From<&IngestConfig> for FlushThresholds {
    fn from(config: &IngestConfig) -> Self {
        Self {
            transactions: config.transaction_flush_threshold.max(1),
            outputs: config.output_flush_threshold.max(1),
            inputs: config.input_flush_threshold.max(1),
        }
    }
}

// ─── Flush handlers ───────────────────────────────────────────────────────────

/// Transactions, outputs and the output lookup projection, then headers at
/// `unprocessed`.
struct HistoryFlush {
    repo: Arc<dyn Repository>,
    thresholds: FlushThresholds,
}

impl HistoryFlush {
    async fn insert_outputs(&self, outputs: Vec<TransactionOutput>) -> Result<(), IngestError> {
        let lookups = outputs.iter().map(TransactionOutputLookup::from).collect();
        self.repo.insert_transaction_outputs(outputs).await?;
        self.repo.insert_transaction_outputs_lookup(lookups).await
    }
}

#[async_trait]
impl FlushHandler<InsertBlock> for HistoryFlush {
    async fn flush(&self, items: Vec<InsertBlock>) -> Result<(), IngestError> {
        let mut blocks = Vec::with_capacity(items.len());
        let mut transactions = Vec::new();
        let mut outputs = Vec::new();

        for item in items {
            blocks.push(item.block.with_status(BlockStatus::Unprocessed));
            transactions.extend(item.transactions);
            outputs.extend(item.outputs);

            if transactions.len() >= self.thresholds.transactions {
                self.repo.insert_transactions(mem::take(&mut transactions)).await?;
            }
            if outputs.len() >= self.thresholds.outputs {
                self.insert_outputs(mem::take(&mut outputs)).await?;
            }
        }

        if !transactions.is_empty() {
            self.repo.insert_transactions(transactions).await?;
        }
        if !outputs.is_empty() {
            self.insert_outputs(outputs).await?;
        }
        debug!(blocks = blocks.len(), "history flush inserting blocks");
        self.repo.insert_blocks(blocks).await
    }
}

/// Inputs, then headers at `processed`.
struct BackfillFlush {
    repo: Arc<dyn Repository>,
    thresholds: FlushThresholds,
}

#[async_trait]
impl FlushHandler<InsertBlock> for BackfillFlush {
    async fn flush(&self, items: Vec<InsertBlock>) -> Result<(), IngestError> {
        let mut blocks = Vec::with_capacity(items.len());
        let mut inputs = Vec::new();

        for item in items {
            blocks.push(item.block.with_status(BlockStatus::Processed));
            inputs.extend(item.inputs);

            if inputs.len() >= self.thresholds.inputs {
                self.repo.insert_transaction_inputs(mem::take(&mut inputs)).await?;
            }
        }

        if !inputs.is_empty() {
            self.repo.insert_transaction_inputs(inputs).await?;
        }
        debug!(blocks = blocks.len(), "backfill flush inserting blocks");
        self.repo.insert_blocks(blocks).await
    }
}

/// Placeholder headers only.
struct FollowerFlush {
    repo: Arc<dyn Repository>,
}

#[async_trait]
impl FlushHandler<InsertBlock> for FollowerFlush {
    async fn flush(&self, items: Vec<InsertBlock>) -> Result<(), IngestError> {
        let blocks = items
            .into_iter()
            .map(|item| item.block.with_status(BlockStatus::New))
            .collect();
        self.repo.insert_blocks(blocks).await
    }
}

// ─── Pending heights ──────────────────────────────────────────────────────────

/// Heights queued in a writer, plus the first flush error not yet taken.
#[derive(Default)]
struct Pending {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    heights: HashMap<u64, usize>,
    error: Option<IngestError>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, height: u64) {
        *self.lock().heights.entry(height).or_insert(0) += 1;
    }

    fn release(&self, heights: &[u64]) {
        let mut state = self.lock();
        for height in heights {
            if let Some(count) = state.heights.get_mut(height) {
                *count -= 1;
                if *count == 0 {
                    state.heights.remove(height);
                }
            }
        }
    }
}

/// Releases flushed heights and keeps the first flush error.
struct TrackedFlush {
    inner: Arc<dyn FlushHandler<InsertBlock>>,
    pending: Arc<Pending>,
}

#[async_trait]
impl FlushHandler<InsertBlock> for TrackedFlush {
    async fn flush(&self, items: Vec<InsertBlock>) -> Result<(), IngestError> {
        let heights: Vec<u64> = items.iter().map(|item| item.block.height).collect();
        let result = self.inner.flush(items).await;
        let mut state = self.pending.lock();
        if let Err(err) = &result {
            if state.error.is_none() {
                state.error = Some(IngestError::Flush(err.to_string()));
            }
        }
        drop(state);
        self.pending.release(&heights);
        result
    }
}

// ─── BlockWriter ──────────────────────────────────────────────────────────────

/// A batcher of block bundles with a pipeline-specific flush.
pub struct BlockWriter {
    batcher: Batcher<InsertBlock>,
    pending: Arc<Pending>,
}

impl BlockWriter {
    /// Writer for the history path (outputs, status `unprocessed`).
    pub fn history(
        repo: Arc<dyn Repository>,
        thresholds: FlushThresholds,
        config: BatcherConfig,
    ) -> Self {
        Self::with_handler("history", Arc::new(HistoryFlush { repo, thresholds }), config)
    }

    /// Writer for the backfill path (inputs, status `processed`).
    pub fn backfill(
        repo: Arc<dyn Repository>,
        thresholds: FlushThresholds,
        config: BatcherConfig,
    ) -> Self {
        Self::with_handler("backfill", Arc::new(BackfillFlush { repo, thresholds }), config)
    }

    /// Writer for follower placeholders (status `new`).
    pub fn follower(repo: Arc<dyn Repository>, config: BatcherConfig) -> Self {
        Self::with_handler("follower", Arc::new(FollowerFlush { repo }), config)
    }

    fn with_handler(
        name: &'static str,
        handler: Arc<dyn FlushHandler<InsertBlock>>,
        config: BatcherConfig,
    ) -> Self {
        let pending = Arc::new(Pending::default());
        let tracked = TrackedFlush {
            inner: handler,
            pending: Arc::clone(&pending),
        };
        Self {
            batcher: Batcher::new(name, Arc::new(tracked), config),
            pending,
        }
    }

    pub fn name(&self) -> &'static str {
        self.batcher.name()
    }

    pub fn start(&self, cancel: &CancellationToken) {
        self.batcher.start(cancel);
    }

    /// Drain buffered bundles and join the flushing worker.
    pub async fn stop(&self) {
        self.batcher.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.batcher.is_running()
    }

    /// Returns `true` while a bundle for `height` is queued and not yet flushed.
    pub fn is_pending(&self, height: u64) -> bool {
        self.pending.lock().heights.contains_key(&height)
    }

    /// The first flush failure since the last call, if any.
    pub fn take_flush_error(&self) -> Option<IngestError> {
        self.pending.lock().error.take()
    }

    /// Queue one bundle. The repository write happens on the batcher's worker.
    pub async fn write_block(
        &self,
        cancel: &CancellationToken,
        bundle: InsertBlock,
    ) -> Result<(), IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let height = bundle.block.height;
        self.pending.acquire(height);
        let result = self.batcher.add(cancel, bundle).await;
        if result.is_err() {
            self.pending.release(&[height]);
        }
        result
    }
}
