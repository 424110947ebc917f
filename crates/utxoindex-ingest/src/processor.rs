//! Block processors: fetch each height from the source and hand the bundle
//! to a writer, across a bounded worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use utxoindex_core::pool;
use utxoindex_core::{
    cancellable, BackfillBlock, BackfillSource, BatcherConfig, Block, CancelHook, ChainScope,
    HistorySource, IngestError, IngestMetrics, InsertBlock, Repository,
};

use crate::resolver::OutputResolver;
use crate::writer::BlockWriter;

/// Default per-height concurrency.
pub const DEFAULT_WORKER_COUNT: usize = 50;

/// Processes a batch of heights. `on_cancel` fires once if the batch aborts
/// on its first failure.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    async fn process(
        &self,
        cancel: &CancellationToken,
        heights: Vec<u64>,
        on_cancel: Option<CancelHook>,
    ) -> Result<(), IngestError>;
}

/// Log a per-height failure and record its observation.
fn finish_height(
    pipeline: &'static str,
    scope: &ChainScope,
    metrics: &dyn IngestMetrics,
    height: u64,
    start: Instant,
    result: &Result<(), IngestError>,
) {
    if let Err(err) = result {
        if !err.is_cancelled() {
            warn!(
                pipeline,
                coin = %scope.coin,
                network = %scope.network,
                height,
                error = %err,
                "process height failed"
            );
        }
    }
    metrics.observe_process_height(result.as_ref().err(), height, start);
}

/// Drop heights whose bundle is still queued in `writer`.
fn unqueued(pipeline: &'static str, writer: &BlockWriter, heights: Vec<u64>) -> Vec<u64> {
    let total = heights.len();
    let heights: Vec<u64> = heights.into_iter().filter(|h| !writer.is_pending(*h)).collect();
    if heights.len() < total {
        debug!(pipeline, skipped = total - heights.len(), "heights still queued for flush");
    }
    heights
}

// ─── History ──────────────────────────────────────────────────────────────────

struct HistoryTask {
    source: Arc<dyn HistorySource>,
    writer: Arc<BlockWriter>,
    metrics: Arc<dyn IngestMetrics>,
    scope: ChainScope,
}

impl HistoryTask {
    async fn process_height(
        &self,
        cancel: CancellationToken,
        height: u64,
    ) -> Result<(), IngestError> {
        let start = Instant::now();
        let result = self.fetch_and_write(&cancel, height).await;
        finish_height("history", &self.scope, self.metrics.as_ref(), height, start, &result);
        result
    }

    async fn fetch_and_write(
        &self,
        cancel: &CancellationToken,
        height: u64,
    ) -> Result<(), IngestError> {
        let block = cancellable(cancel, self.source.fetch_history_block(height))
            .await
            .map_err(|e| IngestError::fetch_block(height, e))?;
        self.writer
            .write_block(cancel, block.into())
            .await
            .map_err(|e| IngestError::write_block(height, e))
    }
}

/// Fetches header, transactions and outputs for each height.
pub struct HistoryProcessor {
    task: Arc<HistoryTask>,
    worker_count: usize,
}

impl HistoryProcessor {
    pub fn new(
        source: Arc<dyn HistorySource>,
        writer: Arc<BlockWriter>,
        metrics: Arc<dyn IngestMetrics>,
        scope: ChainScope,
        worker_count: usize,
    ) -> Self {
        Self {
            task: Arc::new(HistoryTask {
                source,
                writer,
                metrics,
                scope,
            }),
            worker_count,
        }
    }
}

#[async_trait]
impl BlockProcessor for HistoryProcessor {
    async fn process(
        &self,
        cancel: &CancellationToken,
        heights: Vec<u64>,
        on_cancel: Option<CancelHook>,
    ) -> Result<(), IngestError> {
        let heights = unqueued("history", &self.task.writer, heights);
        let task = Arc::clone(&self.task);
        pool::process(
            cancel,
            self.worker_count,
            heights,
            move |token, height| {
                let task = Arc::clone(&task);
                async move { task.process_height(token, height).await }
            },
            on_cancel,
        )
        .await
    }
}

// ─── Backfill ─────────────────────────────────────────────────────────────────

struct BackfillTask {
    source: Arc<dyn BackfillSource>,
    repo: Arc<dyn Repository>,
    writer: Arc<BlockWriter>,
    metrics: Arc<dyn IngestMetrics>,
    scope: ChainScope,
}

impl BackfillTask {
    async fn process_height(
        &self,
        cancel: CancellationToken,
        height: u64,
    ) -> Result<(), IngestError> {
        let start = Instant::now();
        let result = self.fetch_and_write(&cancel, height).await;
        finish_height("backfill", &self.scope, self.metrics.as_ref(), height, start, &result);
        result
    }

    async fn fetch_and_write(
        &self,
        cancel: &CancellationToken,
        height: u64,
    ) -> Result<(), IngestError> {
        let block = cancellable(cancel, self.source.fetch_backfill_block(height))
            .await
            .map_err(|e| IngestError::fetch_block(height, e))?;
        let bundle = self
            .resolve_inputs(cancel, block)
            .await
            .map_err(|e| IngestError::fetch_block(height, e))?;
        self.writer
            .write_block(cancel, bundle)
            .await
            .map_err(|e| IngestError::write_block(height, e))
    }

    /// Fill value and addresses of every non-coinbase input.
    async fn resolve_inputs(
        &self,
        cancel: &CancellationToken,
        block: BackfillBlock,
    ) -> Result<InsertBlock, IngestError> {
        let mut resolver = OutputResolver::new(Arc::clone(&self.repo), self.scope.clone());
        let local: HashSet<&str> = block.transactions.iter().map(|tx| tx.txid.as_str()).collect();
        for tx in &block.transactions {
            resolver.seed(tx.txid.clone(), tx.outputs.clone());
        }

        let external: Vec<String> = block
            .transactions
            .iter()
            .flat_map(|tx| &tx.inputs)
            .filter(|input| !input.is_coinbase && !local.contains(input.prev_txid.as_str()))
            .map(|input| input.prev_txid.clone())
            .collect();
        resolver.prefetch(cancel, external).await?;

        let mut inputs = Vec::new();
        for tx in block.transactions {
            for mut input in tx.inputs {
                if !input.is_coinbase {
                    let prev = resolver
                        .resolve_output(cancel, &input.prev_txid, input.prev_vout)
                        .await?;
                    input.value = prev.value;
                    input.addresses = prev.addresses.clone();
                }
                inputs.push(input);
            }
        }

        Ok(InsertBlock {
            block: block.block,
            transactions: Vec::new(),
            outputs: Vec::new(),
            inputs,
        })
    }
}

/// Fetches inputs for each height and resolves the outputs they spend.
pub struct BackfillProcessor {
    task: Arc<BackfillTask>,
    worker_count: usize,
}

impl BackfillProcessor {
    pub fn new(
        source: Arc<dyn BackfillSource>,
        repo: Arc<dyn Repository>,
        writer: Arc<BlockWriter>,
        metrics: Arc<dyn IngestMetrics>,
        scope: ChainScope,
        worker_count: usize,
    ) -> Self {
        Self {
            task: Arc::new(BackfillTask {
                source,
                repo,
                writer,
                metrics,
                scope,
            }),
            worker_count,
        }
    }
}

#[async_trait]
impl BlockProcessor for BackfillProcessor {
    async fn process(
        &self,
        cancel: &CancellationToken,
        heights: Vec<u64>,
        on_cancel: Option<CancelHook>,
    ) -> Result<(), IngestError> {
        let heights = unqueued("backfill", &self.task.writer, heights);
        let task = Arc::clone(&self.task);
        pool::process(
            cancel,
            self.worker_count,
            heights,
            move |token, height| {
                let task = Arc::clone(&task);
                async move { task.process_height(token, height).await }
            },
            on_cancel,
        )
        .await
    }
}

// ─── Follower ─────────────────────────────────────────────────────────────────

/// Writes `new` placeholders for each height through its own writer.
///
/// `process` returns only after the writer has drained, so every placeholder
/// handed to the store has been flushed. A failed flush fails the batch.
pub struct FollowerProcessor {
    writer: BlockWriter,
    metrics: Arc<dyn IngestMetrics>,
    scope: ChainScope,
}

impl FollowerProcessor {
    pub fn new(
        repo: Arc<dyn Repository>,
        metrics: Arc<dyn IngestMetrics>,
        scope: ChainScope,
        config: BatcherConfig,
    ) -> Self {
        Self {
            writer: BlockWriter::follower(repo, config),
            metrics,
            scope,
        }
    }

    async fn write_all(
        &self,
        cancel: &CancellationToken,
        heights: Vec<u64>,
    ) -> Result<(), IngestError> {
        for height in heights {
            let start = Instant::now();
            let result = self
                .writer
                .write_block(cancel, InsertBlock::header(Block::placeholder(&self.scope, height)))
                .await
                .map_err(|e| IngestError::write_block(height, e));
            finish_height("follower", &self.scope, self.metrics.as_ref(), height, start, &result);
            result?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockProcessor for FollowerProcessor {
    async fn process(
        &self,
        cancel: &CancellationToken,
        heights: Vec<u64>,
        on_cancel: Option<CancelHook>,
    ) -> Result<(), IngestError> {
        let token = cancel.child_token();
        self.writer.start(&token);
        let mut result = self.write_all(&token, heights).await;
        self.writer.stop().await;
        if let Some(err) = self.writer.take_flush_error() {
            if result.is_ok() {
                result = Err(err);
            }
        }

        match result {
            Err(err) if !err.is_cancelled() => {
                if let Some(hook) = on_cancel {
                    hook();
                }
                Err(err)
            }
            Err(err) => Err(err),
            Ok(()) if cancel.is_cancelled() => Err(IngestError::Cancelled),
            Ok(()) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use utxoindex_core::{
        BackfillTransaction, BlockStatus, ChainTip, HistoryBlock, NoopMetrics, TransactionInput,
        TransactionOutput, TransactionOutputLookup,
    };
    use utxoindex_storage::InMemoryRepository;

    use crate::writer::FlushThresholds;

    fn scope() -> ChainScope {
        ChainScope::new("btc", "mainnet")
    }

    fn batcher() -> BatcherConfig {
        BatcherConfig {
            flush_size: 100,
            flush_interval: Duration::from_secs(3600),
            rps: 0.0,
        }
    }

    /// Records per-height observations.
    #[derive(Default)]
    struct HeightLog(Mutex<Vec<(u64, bool)>>);

    impl IngestMetrics for HeightLog {
        fn observe_fetch_missing(&self, _err: Option<&IngestError>, _start: Instant) {}
        fn observe_process_batch(
            &self,
            _err: Option<&IngestError>,
            _heights: usize,
            _start: Instant,
        ) {
        }
        fn observe_process_height(&self, err: Option<&IngestError>, height: u64, _start: Instant) {
            self.0.lock().unwrap().push((height, err.is_none()));
        }
    }

    /// History source that fails at one height.
    struct Chain {
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl ChainTip for Chain {
        async fn latest_height(&self) -> Result<u64, IngestError> {
            Ok(100)
        }
    }

    #[async_trait]
    impl HistorySource for Chain {
        async fn fetch_history_block(&self, height: u64) -> Result<HistoryBlock, IngestError> {
            if self.fail_at == Some(height) {
                return Err(IngestError::Source("rpc timeout".into()));
            }
            Ok(HistoryBlock {
                block: Block::placeholder(&scope(), height),
                transactions: vec![],
                outputs: vec![],
            })
        }
    }

    /// Backfill source serving one fixed block.
    struct OneBlock(BackfillBlock);

    #[async_trait]
    impl ChainTip for OneBlock {
        async fn latest_height(&self) -> Result<u64, IngestError> {
            Ok(self.0.block.height)
        }
    }

    #[async_trait]
    impl BackfillSource for OneBlock {
        async fn fetch_backfill_block(&self, _height: u64) -> Result<BackfillBlock, IngestError> {
            Ok(self.0.clone())
        }
    }

    fn input(
        txid: &str,
        index: u32,
        prev_txid: &str,
        prev_vout: u32,
        coinbase: bool,
    ) -> TransactionInput {
        TransactionInput {
            coin: "btc".into(),
            network: "mainnet".into(),
            block_height: 20,
            block_time: Utc::now(),
            txid: txid.into(),
            input_index: index,
            prev_txid: prev_txid.into(),
            prev_vout,
            sequence: u32::MAX,
            is_coinbase: coinbase,
            value: 0,
            script_sig_hex: String::new(),
            script_sig_asm: String::new(),
            witness: vec![],
            addresses: vec![],
        }
    }

    fn lookup(txid: &str, index: u32, value: u64, address: &str) -> TransactionOutputLookup {
        TransactionOutputLookup {
            coin: "btc".into(),
            network: "mainnet".into(),
            txid: txid.into(),
            output_index: index,
            value,
            addresses: vec![address.into()],
        }
    }

    #[tokio::test]
    async fn history_processes_every_height() {
        let repo = Arc::new(InMemoryRepository::new());
        let writer =
            Arc::new(BlockWriter::history(repo.clone(), FlushThresholds::default(), batcher()));
        let metrics = Arc::new(HeightLog::default());
        let processor = HistoryProcessor::new(
            Arc::new(Chain { fail_at: None }),
            writer.clone(),
            metrics.clone(),
            scope(),
            4,
        );
        let cancel = CancellationToken::new();
        writer.start(&cancel);

        processor.process(&cancel, (1..=10).collect(), None).await.unwrap();
        writer.stop().await;

        assert_eq!(repo.winning_blocks(&scope()).len(), 10);
        assert_eq!(metrics.0.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn history_failure_wraps_height_and_fires_hook() {
        let repo = Arc::new(InMemoryRepository::new());
        let writer = Arc::new(BlockWriter::history(repo, FlushThresholds::default(), batcher()));
        let processor = HistoryProcessor::new(
            Arc::new(Chain { fail_at: Some(3) }),
            writer.clone(),
            Arc::new(NoopMetrics),
            scope(),
            1,
        );
        let cancel = CancellationToken::new();
        writer.start(&cancel);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hook: CancelHook = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = processor
            .process(&cancel, vec![1, 2, 3, 4], Some(hook))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fetch block height 3: source error: rpc timeout");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        writer.stop().await;
    }

    #[tokio::test]
    async fn backfill_resolves_in_block_and_stored_outputs() {
        let repo = Arc::new(InMemoryRepository::new());
        let old = TransactionOutput {
            coin: "btc".into(),
            network: "mainnet".into(),
            block_height: 5,
            block_time: Utc::now(),
            txid: "old".into(),
            output_index: 1,
            value: 700,
            script_type: "pubkeyhash".into(),
            script_hex: String::new(),
            script_asm: String::new(),
            addresses: vec!["1Old".into()],
        };
        repo.seed_lookup([TransactionOutputLookup::from(&old)]);
        repo.seed_outputs([old]);
        repo.seed_blocks([Block::placeholder(&scope(), 20).with_status(BlockStatus::Unprocessed)]);

        let block = BackfillBlock {
            block: Block::placeholder(&scope(), 20),
            transactions: vec![
                BackfillTransaction {
                    txid: "cb".into(),
                    inputs: vec![input("cb", 0, "", 0, true)],
                    outputs: vec![lookup("cb", 0, 5_000, "1Miner")],
                },
                BackfillTransaction {
                    txid: "spend".into(),
                    inputs: vec![
                        input("spend", 0, "cb", 0, false),
                        input("spend", 1, "old", 1, false),
                    ],
                    outputs: vec![],
                },
            ],
        };

        let writer =
            Arc::new(BlockWriter::backfill(repo.clone(), FlushThresholds::default(), batcher()));
        let processor = BackfillProcessor::new(
            Arc::new(OneBlock(block)),
            repo.clone(),
            writer.clone(),
            Arc::new(NoopMetrics),
            scope(),
            2,
        );
        let cancel = CancellationToken::new();
        writer.start(&cancel);
        processor.process(&cancel, vec![20], None).await.unwrap();
        writer.stop().await;

        let inputs = repo.inputs();
        assert_eq!(inputs.len(), 3);
        let by_index = |txid: &str, i: u32| {
            inputs
                .iter()
                .find(|x| x.txid == txid && x.input_index == i)
                .cloned()
                .unwrap()
        };
        assert_eq!(by_index("cb", 0).value, 0);
        assert_eq!(by_index("spend", 0).value, 5_000);
        assert_eq!(by_index("spend", 0).addresses, vec!["1Miner".to_string()]);
        assert_eq!(by_index("spend", 1).value, 700);
        assert_eq!(repo.block_status(&scope(), 20), Some(BlockStatus::Processed));

        // In-block spends never reach the store; "old" costs one batched query.
        let lookups = repo
            .calls()
            .iter()
            .filter(|c| c.operation.starts_with("transaction_outputs"))
            .count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn backfill_missing_output_fails_height() {
        let repo = Arc::new(InMemoryRepository::new());
        let block = BackfillBlock {
            block: Block::placeholder(&scope(), 30),
            transactions: vec![BackfillTransaction {
                txid: "t".into(),
                inputs: vec![input("t", 0, "ghost", 2, false)],
                outputs: vec![],
            }],
        };
        let writer =
            Arc::new(BlockWriter::backfill(repo.clone(), FlushThresholds::default(), batcher()));
        let processor = BackfillProcessor::new(
            Arc::new(OneBlock(block)),
            repo.clone(),
            writer.clone(),
            Arc::new(NoopMetrics),
            scope(),
            1,
        );
        let cancel = CancellationToken::new();
        writer.start(&cancel);
        let err = processor.process(&cancel, vec![30], None).await.unwrap_err();
        writer.stop().await;

        assert!(err.to_string().starts_with("fetch block height 30:"));
        assert!(repo.inputs().is_empty());
        assert_eq!(repo.block_status(&scope(), 30), None);
    }

    #[tokio::test]
    async fn follower_inserts_placeholders_before_returning() {
        let repo = Arc::new(InMemoryRepository::new());
        let metrics = Arc::new(HeightLog::default());
        let processor = FollowerProcessor::new(repo.clone(), metrics.clone(), scope(), batcher());
        let cancel = CancellationToken::new();

        processor.process(&cancel, vec![7, 8, 9], None).await.unwrap();
        for h in 7..=9 {
            assert_eq!(repo.block_status(&scope(), h), Some(BlockStatus::New));
        }
        assert_eq!(metrics.0.lock().unwrap().len(), 3);

        // The writer is reusable across batches.
        processor.process(&cancel, vec![10], None).await.unwrap();
        assert_eq!(repo.block_status(&scope(), 10), Some(BlockStatus::New));
    }

    #[tokio::test]
    async fn follower_reports_failed_flush() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.fail_operation("insert_blocks");
        let processor =
            FollowerProcessor::new(repo.clone(), Arc::new(NoopMetrics), scope(), batcher());
        let cancel = CancellationToken::new();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hook: CancelHook = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = processor.process(&cancel, vec![1, 2], Some(hook)).await.unwrap_err();
        assert!(matches!(err, IngestError::Flush(_)), "{err}");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(repo.block_status(&scope(), 1), None);

        // The next batch succeeds once the store recovers.
        repo.restore_operation("insert_blocks");
        processor.process(&cancel, vec![1, 2], None).await.unwrap();
        assert_eq!(repo.block_status(&scope(), 2), Some(BlockStatus::New));
    }

    #[tokio::test]
    async fn history_skips_heights_still_queued() {
        let repo = Arc::new(InMemoryRepository::new());
        let writer =
            Arc::new(BlockWriter::history(repo.clone(), FlushThresholds::default(), batcher()));
        let metrics = Arc::new(HeightLog::default());
        let processor = HistoryProcessor::new(
            Arc::new(Chain { fail_at: None }),
            writer.clone(),
            metrics.clone(),
            scope(),
            2,
        );
        let cancel = CancellationToken::new();
        writer.start(&cancel);

        processor.process(&cancel, vec![1, 2], None).await.unwrap();
        processor.process(&cancel, vec![2, 3], None).await.unwrap();
        writer.stop().await;

        let mut seen: Vec<u64> = metrics.0.lock().unwrap().iter().map(|(h, _)| *h).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(repo.status_history(&scope(), 2), vec![BlockStatus::Unprocessed]);
    }
}
