//! [`BitcoinSource`]: the engine's chain source over a Bitcoin RPC client.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use utxoindex_core::convert::to_u64;
use utxoindex_core::{
    BackfillBlock, BackfillSource, ChainScope, ChainTip, HistoryBlock, HistorySource,
    IngestError, NoopMetrics, OperationMetrics,
};

use crate::decode;
use crate::rpc::RpcBlock;

/// The three node calls the engine needs.
#[async_trait]
pub trait BitcoinRpcClient: Send + Sync {
    /// `getblockcount`
    async fn get_block_count(&self) -> Result<i64, IngestError>;
    /// `getblockhash <height>`
    async fn get_block_hash(&self, height: u64) -> Result<String, IngestError>;
    /// `getblock <hash> 2`
    async fn get_block(&self, hash: &str) -> Result<RpcBlock, IngestError>;
}

/// Serves history and backfill bundles for one `(coin, network)`.
pub struct BitcoinSource<C> {
    client: C,
    scope: ChainScope,
    metrics: Arc<dyn OperationMetrics>,
}

impl<C: BitcoinRpcClient> BitcoinSource<C> {
    pub fn new(client: C, scope: ChainScope) -> Self {
        Self {
            client,
            scope,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Observe every RPC call under the `rpc` component.
    pub fn with_metrics(mut self, metrics: Arc<dyn OperationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn scope(&self) -> &ChainScope {
        &self.scope
    }

    async fn observed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, IngestError>> + Send,
    ) -> Result<T, IngestError> {
        let start = Instant::now();
        let result = call.await;
        self.metrics
            .observe(operation, &self.scope, result.as_ref().err(), start);
        result
    }

    /// `getblockhash` then `getblock`, checking the node answered for `height`.
    pub async fn raw_block(&self, height: u64) -> Result<RpcBlock, IngestError> {
        let hash = self
            .observed("getblockhash", self.client.get_block_hash(height))
            .await?;
        let block = self.observed("getblock", self.client.get_block(&hash)).await?;
        if to_u64(block.height)? != height {
            return Err(IngestError::Source(format!(
                "getblock {hash} returned height {}, expected {height}",
                block.height
            )));
        }
        debug!(scope = %self.scope, height, txs = block.tx.len(), "block fetched");
        Ok(block)
    }
}

#[async_trait]
impl<C: BitcoinRpcClient> ChainTip for BitcoinSource<C> {
    async fn latest_height(&self) -> Result<u64, IngestError> {
        let count = self
            .observed("getblockcount", self.client.get_block_count())
            .await?;
        to_u64(count)
    }
}

#[async_trait]
impl<C: BitcoinRpcClient> HistorySource for BitcoinSource<C> {
    async fn fetch_history_block(&self, height: u64) -> Result<HistoryBlock, IngestError> {
        let block = self.raw_block(height).await?;
        decode::history_block(&self.scope, &block)
    }
}

#[async_trait]
impl<C: BitcoinRpcClient> BackfillSource for BitcoinSource<C> {
    async fn fetch_backfill_block(&self, height: u64) -> Result<BackfillBlock, IngestError> {
        let block = self.raw_block(height).await?;
        decode::backfill_block(&self.scope, &block)
    }
}
