//! In-memory storage backend.
//!
//! Rows are append-only, like the analytical store it stands in for. A block
//! height's status is `argMax(status, updated_at)`: the status of its row with
//! the latest `updated_at`, ties going to the later insert. The store never
//! compares statuses; monotonicity is up to the writers.
//! Every call is journalled so tests can assert write ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::debug;

use utxoindex_core::{
    Block, BlockStatus, ChainScope, IngestError, Repository, Transaction, TransactionInput,
    TransactionOutput, TransactionOutputLookup,
};

/// One journalled repository call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCall {
    pub operation: &'static str,
    /// Rows written, or rows returned for queries.
    pub rows: usize,
    pub failed: bool,
}

#[derive(Default)]
struct State {
    blocks: Vec<Block>,
    transactions: Vec<Transaction>,
    outputs: Vec<TransactionOutput>,
    inputs: Vec<TransactionInput>,
    /// `(scope, txid)` → `output_index` → lookup row.
    lookup: HashMap<(ChainScope, String), BTreeMap<u32, TransactionOutputLookup>>,
    calls: Vec<RepositoryCall>,
    failing: HashSet<String>,
}

impl State {
    /// Journal the call and fail it if a fault was injected for `operation`.
    fn enter(&mut self, operation: &'static str, rows: usize) -> Result<(), IngestError> {
        let failed = self.failing.contains(operation);
        self.calls.push(RepositoryCall {
            operation,
            rows,
            failed,
        });
        if failed {
            debug!(operation, "injected repository failure");
            return Err(IngestError::store(operation, "injected failure"));
        }
        Ok(())
    }

    fn index_lookup(&mut self, row: TransactionOutputLookup) {
        let key = (ChainScope::new(row.coin.clone(), row.network.clone()), row.txid.clone());
        self.lookup.entry(key).or_default().insert(row.output_index, row);
    }

    fn heights(&self, scope: &ChainScope) -> BTreeSet<u64> {
        self.blocks
            .iter()
            .filter(|b| scope.matches(&b.coin, &b.network))
            .map(|b| b.height)
            .collect()
    }

    fn winner(&self, scope: &ChainScope, height: u64) -> Option<&Block> {
        self.blocks
            .iter()
            .filter(|b| b.height == height && scope.matches(&b.coin, &b.network))
            .max_by_key(|b| b.updated_at)
    }

    fn winners(&self, scope: &ChainScope) -> BTreeMap<u64, &Block> {
        let mut winners: BTreeMap<u64, &Block> = BTreeMap::new();
        for block in self
            .blocks
            .iter()
            .filter(|b| scope.matches(&b.coin, &b.network))
        {
            winners
                .entry(block.height)
                .and_modify(|current| {
                    if block.updated_at >= current.updated_at {
                        *current = block;
                    }
                })
                .or_insert(block);
        }
        winners
    }
}

/// Shuffle `heights` and keep at most `limit` of them.
fn random_subset(mut heights: Vec<u64>, limit: usize) -> Vec<u64> {
    heights.shuffle(&mut rand::rng());
    heights.truncate(limit);
    heights
}

/// In-memory [`Repository`].
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call to `operation` fail with a store error.
    pub fn fail_operation(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    /// Undo [`fail_operation`](Self::fail_operation).
    pub fn restore_operation(&self, operation: &str) {
        self.state().failing.remove(operation);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.state().calls.clone()
    }

    /// Operation names of successful insert calls, in order.
    pub fn write_order(&self) -> Vec<&'static str> {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.failed && c.operation.starts_with("insert_"))
            .map(|c| c.operation)
            .collect()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.state().blocks.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub fn outputs(&self) -> Vec<TransactionOutput> {
        self.state().outputs.clone()
    }

    pub fn inputs(&self) -> Vec<TransactionInput> {
        self.state().inputs.clone()
    }

    /// Winning status of a height, if any row exists.
    pub fn block_status(&self, scope: &ChainScope, height: u64) -> Option<BlockStatus> {
        self.state().winner(scope, height).map(|b| b.status)
    }

    /// Winning row per height.
    pub fn winning_blocks(&self, scope: &ChainScope) -> BTreeMap<u64, Block> {
        self.state()
            .winners(scope)
            .into_iter()
            .map(|(h, b)| (h, b.clone()))
            .collect()
    }

    /// Statuses written for a height, in insertion order.
    pub fn status_history(&self, scope: &ChainScope, height: u64) -> Vec<BlockStatus> {
        self.state()
            .blocks
            .iter()
            .filter(|b| b.height == height && scope.matches(&b.coin, &b.network))
            .map(|b| b.status)
            .collect()
    }

    /// Seed rows directly, bypassing the journal.
    pub fn seed_blocks(&self, rows: impl IntoIterator<Item = Block>) {
        self.state().blocks.extend(rows);
    }

    /// Seed outputs directly, bypassing the journal. The lookup projection is
    /// left untouched; see [`seed_lookup`](Self::seed_lookup).
    pub fn seed_outputs(&self, rows: impl IntoIterator<Item = TransactionOutput>) {
        self.state().outputs.extend(rows);
    }

    /// Seed lookup-projection rows directly, bypassing the journal.
    pub fn seed_lookup(&self, rows: impl IntoIterator<Item = TransactionOutputLookup>) {
        let mut state = self.state();
        for row in rows {
            state.index_lookup(row);
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_blocks(&self, rows: Vec<Block>) -> Result<(), IngestError> {
        let mut state = self.state();
        state.enter("insert_blocks", rows.len())?;
        state.blocks.extend(rows);
        Ok(())
    }

    async fn insert_transactions(&self, rows: Vec<Transaction>) -> Result<(), IngestError> {
        let mut state = self.state();
        state.enter("insert_transactions", rows.len())?;
        state.transactions.extend(rows);
        Ok(())
    }

    async fn insert_transaction_outputs(
        &self,
        rows: Vec<TransactionOutput>,
    ) -> Result<(), IngestError> {
        let mut state = self.state();
        state.enter("insert_transaction_outputs", rows.len())?;
        state.outputs.extend(rows);
        Ok(())
    }

    async fn insert_transaction_outputs_lookup(
        &self,
        rows: Vec<TransactionOutputLookup>,
    ) -> Result<(), IngestError> {
        let mut state = self.state();
        state.enter("insert_transaction_outputs_lookup", rows.len())?;
        for row in rows {
            state.index_lookup(row);
        }
        Ok(())
    }

    async fn insert_transaction_inputs(
        &self,
        rows: Vec<TransactionInput>,
    ) -> Result<(), IngestError> {
        let mut state = self.state();
        state.enter("insert_transaction_inputs", rows.len())?;
        state.inputs.extend(rows);
        Ok(())
    }

    async fn random_missing_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        let mut state = self.state();
        let present = state.heights(scope);
        let missing: Vec<u64> = (0..=max_height).filter(|h| !present.contains(h)).collect();
        let heights = random_subset(missing, limit);
        state.enter("random_missing_block_heights", heights.len())?;
        Ok(heights)
    }

    async fn random_block_heights_by_status(
        &self,
        scope: &ChainScope,
        status: BlockStatus,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        let mut state = self.state();
        let matching: Vec<u64> = state
            .winners(scope)
            .into_iter()
            .filter(|(h, b)| *h <= max_height && b.status == status)
            .map(|(h, _)| h)
            .collect();
        let heights = random_subset(matching, limit);
        state.enter("random_block_heights_by_status", heights.len())?;
        Ok(heights)
    }

    async fn max_contiguous_block_height(
        &self,
        scope: &ChainScope,
    ) -> Result<Option<u64>, IngestError> {
        let mut state = self.state();
        let mut contiguous = None;
        for (expected, height) in state.heights(scope).into_iter().enumerate() {
            if height != expected as u64 {
                break;
            }
            contiguous = Some(height);
        }
        state.enter("max_contiguous_block_height", usize::from(contiguous.is_some()))?;
        Ok(contiguous)
    }

    async fn max_block_height(&self, scope: &ChainScope) -> Result<Option<u64>, IngestError> {
        let mut state = self.state();
        let max = state.heights(scope).last().copied();
        state.enter("max_block_height", usize::from(max.is_some()))?;
        Ok(max)
    }

    async fn transaction_outputs(
        &self,
        scope: &ChainScope,
        txid: &str,
    ) -> Result<Vec<TransactionOutput>, IngestError> {
        let mut state = self.state();
        let mut by_index: BTreeMap<u32, TransactionOutput> = BTreeMap::new();
        for out in state
            .outputs
            .iter()
            .filter(|o| o.txid == txid && scope.matches(&o.coin, &o.network))
        {
            by_index.insert(out.output_index, out.clone());
        }
        let outputs: Vec<TransactionOutput> = by_index.into_values().collect();
        state.enter("transaction_outputs", outputs.len())?;
        Ok(outputs)
    }

    async fn transaction_outputs_lookup_by_txids(
        &self,
        scope: &ChainScope,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionOutputLookup>>, IngestError> {
        let mut state = self.state();
        let mut found = HashMap::new();
        for txid in txids {
            if let Some(rows) = state.lookup.get(&(scope.clone(), txid.clone())) {
                found.insert(txid.clone(), rows.values().cloned().collect::<Vec<_>>());
            }
        }
        let rows = found.values().map(Vec::len).sum();
        state.enter("transaction_outputs_lookup_by_txids", rows)?;
        Ok(found)
    }
}
