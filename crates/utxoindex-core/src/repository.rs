//! The analytical store contract.
//!
//! Inserts are append-only. A block height's status is
//! `argMax(status, updated_at)` across all of its rows: the status of the most
//! recently written row. Status transitions are plain inserts, and keeping
//! them monotone is the writers' job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::metrics::OperationMetrics;
use crate::types::{
    Block, BlockStatus, ChainScope, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputLookup,
};

/// Operations the store must provide to the engine.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_blocks(&self, rows: Vec<Block>) -> Result<(), IngestError>;

    async fn insert_transactions(&self, rows: Vec<Transaction>) -> Result<(), IngestError>;

    async fn insert_transaction_outputs(
        &self,
        rows: Vec<TransactionOutput>,
    ) -> Result<(), IngestError>;

    async fn insert_transaction_outputs_lookup(
        &self,
        rows: Vec<TransactionOutputLookup>,
    ) -> Result<(), IngestError>;

    async fn insert_transaction_inputs(
        &self,
        rows: Vec<TransactionInput>,
    ) -> Result<(), IngestError>;

    /// Up to `limit` heights in `[0, max_height]` with no block row at all, in random order.
    async fn random_missing_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError>;

    /// Up to `limit` heights in `[0, max_height]` whose winning status is `status`, in random
    /// order.
    async fn random_block_heights_by_status(
        &self,
        scope: &ChainScope,
        status: BlockStatus,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError>;

    /// Up to `limit` heights in `[0, max_height]` whose winning status is `unprocessed`.
    async fn random_unprocessed_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        self.random_block_heights_by_status(scope, BlockStatus::Unprocessed, max_height, limit)
            .await
    }

    /// Largest `h` such that every height in `[0, h]` has a row; `None` if height 0 is absent.
    async fn max_contiguous_block_height(
        &self,
        scope: &ChainScope,
    ) -> Result<Option<u64>, IngestError>;

    async fn max_block_height(&self, scope: &ChainScope) -> Result<Option<u64>, IngestError>;

    /// Outputs of `txid`, ordered by `output_index` ascending.
    async fn transaction_outputs(
        &self,
        scope: &ChainScope,
        txid: &str,
    ) -> Result<Vec<TransactionOutput>, IngestError>;

    /// Batched lookup-projection query. Txids with no rows are absent from the map.
    ///
    /// The projection holds exactly the rows given to
    /// [`insert_transaction_outputs_lookup`](Self::insert_transaction_outputs_lookup);
    /// the history writer inserts them right after the outputs they mirror.
    /// Callers treat a miss as "not in the projection" and fall back to
    /// [`transaction_outputs`](Self::transaction_outputs). The default
    /// implementation reads the outputs table directly.
    async fn transaction_outputs_lookup_by_txids(
        &self,
        scope: &ChainScope,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionOutputLookup>>, IngestError> {
        let mut found = HashMap::with_capacity(txids.len());
        for txid in txids {
            let outputs = self.transaction_outputs(scope, txid).await?;
            if !outputs.is_empty() {
                let rows = outputs.iter().map(TransactionOutputLookup::from).collect();
                found.insert(txid.clone(), rows);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for Arc<R> {
    async fn insert_blocks(&self, rows: Vec<Block>) -> Result<(), IngestError> {
        (**self).insert_blocks(rows).await
    }
    async fn insert_transactions(&self, rows: Vec<Transaction>) -> Result<(), IngestError> {
        (**self).insert_transactions(rows).await
    }
    async fn insert_transaction_outputs(
        &self,
        rows: Vec<TransactionOutput>,
    ) -> Result<(), IngestError> {
        (**self).insert_transaction_outputs(rows).await
    }
    async fn insert_transaction_outputs_lookup(
        &self,
        rows: Vec<TransactionOutputLookup>,
    ) -> Result<(), IngestError> {
        (**self).insert_transaction_outputs_lookup(rows).await
    }
    async fn insert_transaction_inputs(
        &self,
        rows: Vec<TransactionInput>,
    ) -> Result<(), IngestError> {
        (**self).insert_transaction_inputs(rows).await
    }
    async fn random_missing_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        (**self).random_missing_block_heights(scope, max_height, limit).await
    }
    async fn random_block_heights_by_status(
        &self,
        scope: &ChainScope,
        status: BlockStatus,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        (**self)
            .random_block_heights_by_status(scope, status, max_height, limit)
            .await
    }
    async fn random_unprocessed_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        (**self).random_unprocessed_block_heights(scope, max_height, limit).await
    }
    async fn max_contiguous_block_height(
        &self,
        scope: &ChainScope,
    ) -> Result<Option<u64>, IngestError> {
        (**self).max_contiguous_block_height(scope).await
    }
    async fn max_block_height(&self, scope: &ChainScope) -> Result<Option<u64>, IngestError> {
        (**self).max_block_height(scope).await
    }
    async fn transaction_outputs(
        &self,
        scope: &ChainScope,
        txid: &str,
    ) -> Result<Vec<TransactionOutput>, IngestError> {
        (**self).transaction_outputs(scope, txid).await
    }
    async fn transaction_outputs_lookup_by_txids(
        &self,
        scope: &ChainScope,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionOutputLookup>>, IngestError> {
        (**self).transaction_outputs_lookup_by_txids(scope, txids).await
    }
}

// ─── InstrumentedRepository ───────────────────────────────────────────────────

/// Decorates a repository with per-operation metrics.
///
/// Empty inserts and zero-limit selections never reach the inner store but
/// are still observed.
pub struct InstrumentedRepository<R> {
    inner: R,
    scope: ChainScope,
    metrics: Arc<dyn OperationMetrics>,
}

impl<R: Repository> InstrumentedRepository<R> {
    pub fn new(inner: R, scope: ChainScope, metrics: Arc<dyn OperationMetrics>) -> Self {
        Self { inner, scope, metrics }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn observe<T>(&self, operation: &str, start: Instant, result: &Result<T, IngestError>) {
        self.metrics
            .observe(operation, &self.scope, result.as_ref().err(), start);
    }
}

macro_rules! instrumented_insert {
    ($self:ident, $op:literal, $rows:ident, $call:ident) => {{
        let start = Instant::now();
        let result = if $rows.is_empty() {
            Ok(())
        } else {
            $self.inner.$call($rows).await
        };
        $self.observe($op, start, &result);
        result
    }};
}

#[async_trait]
impl<R: Repository> Repository for InstrumentedRepository<R> {
    async fn insert_blocks(&self, rows: Vec<Block>) -> Result<(), IngestError> {
        instrumented_insert!(self, "insert_blocks", rows, insert_blocks)
    }

    async fn insert_transactions(&self, rows: Vec<Transaction>) -> Result<(), IngestError> {
        instrumented_insert!(self, "insert_transactions", rows, insert_transactions)
    }

    async fn insert_transaction_outputs(
        &self,
        rows: Vec<TransactionOutput>,
    ) -> Result<(), IngestError> {
        instrumented_insert!(self, "insert_transaction_outputs", rows, insert_transaction_outputs)
    }

    async fn insert_transaction_outputs_lookup(
        &self,
        rows: Vec<TransactionOutputLookup>,
    ) -> Result<(), IngestError> {
        instrumented_insert!(
            self,
            "insert_transaction_outputs_lookup",
            rows,
            insert_transaction_outputs_lookup
        )
    }

    async fn insert_transaction_inputs(
        &self,
        rows: Vec<TransactionInput>,
    ) -> Result<(), IngestError> {
        instrumented_insert!(self, "insert_transaction_inputs", rows, insert_transaction_inputs)
    }

    async fn random_missing_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        let start = Instant::now();
        let result = if limit == 0 {
            Ok(Vec::new())
        } else {
            self.inner
                .random_missing_block_heights(scope, max_height, limit)
                .await
        };
        self.observe("random_missing_block_heights", start, &result);
        result
    }

    async fn random_block_heights_by_status(
        &self,
        scope: &ChainScope,
        status: BlockStatus,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        let start = Instant::now();
        let result = if limit == 0 {
            Ok(Vec::new())
        } else {
            self.inner
                .random_block_heights_by_status(scope, status, max_height, limit)
                .await
        };
        self.observe("random_block_heights_by_status", start, &result);
        result
    }

    async fn random_unprocessed_block_heights(
        &self,
        scope: &ChainScope,
        max_height: u64,
        limit: usize,
    ) -> Result<Vec<u64>, IngestError> {
        let start = Instant::now();
        let result = if limit == 0 {
            Ok(Vec::new())
        } else {
            self.inner
                .random_unprocessed_block_heights(scope, max_height, limit)
                .await
        };
        self.observe("random_unprocessed_block_heights", start, &result);
        result
    }

    async fn max_contiguous_block_height(
        &self,
        scope: &ChainScope,
    ) -> Result<Option<u64>, IngestError> {
        let start = Instant::now();
        let result = self.inner.max_contiguous_block_height(scope).await;
        self.observe("max_contiguous_block_height", start, &result);
        result
    }

    async fn max_block_height(&self, scope: &ChainScope) -> Result<Option<u64>, IngestError> {
        let start = Instant::now();
        let result = self.inner.max_block_height(scope).await;
        self.observe("max_block_height", start, &result);
        result
    }

    async fn transaction_outputs(
        &self,
        scope: &ChainScope,
        txid: &str,
    ) -> Result<Vec<TransactionOutput>, IngestError> {
        let start = Instant::now();
        let result = self.inner.transaction_outputs(scope, txid).await;
        self.observe("transaction_outputs", start, &result);
        result
    }

    async fn transaction_outputs_lookup_by_txids(
        &self,
        scope: &ChainScope,
        txids: &[String],
    ) -> Result<HashMap<String, Vec<TransactionOutputLookup>>, IngestError> {
        let start = Instant::now();
        let result = if txids.is_empty() {
            Ok(HashMap::new())
        } else {
            self.inner
                .transaction_outputs_lookup_by_txids(scope, txids)
                .await
        };
        self.observe("transaction_outputs_lookup_by_txids", start, &result);
        result
    }
}
