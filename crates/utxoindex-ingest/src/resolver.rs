//! Per-block cache of previous outputs for the backfill path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use utxoindex_core::{
    cancellable, ChainScope, IngestError, Repository, TransactionOutputLookup,
};

/// Resolves `prev_txid` references to the outputs they spend.
///
/// One instance per block: outputs created inside the block are seeded up
/// front, everything else falls back to the repository once per txid.
pub struct OutputResolver {
    repo: Arc<dyn Repository>,
    scope: ChainScope,
    cache: HashMap<String, Vec<TransactionOutputLookup>>,
}

impl OutputResolver {
    pub fn new(repo: Arc<dyn Repository>, scope: ChainScope) -> Self {
        Self {
            repo,
            scope,
            cache: HashMap::new(),
        }
    }

    /// Register outputs produced inside the current block.
    pub fn seed(&mut self, txid: impl Into<String>, outputs: Vec<TransactionOutputLookup>) {
        self.cache.insert(txid.into(), outputs);
    }

    /// Warm the cache for every uncached txid with one batched lookup-projection query.
    ///
    /// Txids the projection does not know stay uncached, so
    /// [`resolve`](Self::resolve) still falls back to the outputs table for them.
    pub async fn prefetch(
        &mut self,
        cancel: &CancellationToken,
        txids: impl IntoIterator<Item = String>,
    ) -> Result<(), IngestError> {
        let mut wanted: Vec<String> = txids
            .into_iter()
            .filter(|txid| !self.cache.contains_key(txid))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(());
        }

        let mut found = cancellable(
            cancel,
            self.repo
                .transaction_outputs_lookup_by_txids(&self.scope, &wanted),
        )
        .await?;
        debug!(
            scope = %self.scope,
            requested = wanted.len(),
            found = found.len(),
            "prefetched previous outputs"
        );
        for txid in wanted {
            if let Some(outputs) = found.remove(&txid).filter(|rows| !rows.is_empty()) {
                let outputs = self.stamp(outputs);
                self.cache.insert(txid, outputs);
            }
        }
        Ok(())
    }

    /// Outputs of `txid`, from the cache or the repository's outputs table.
    ///
    /// Each txid costs at most one outputs query; an empty result is cached and
    /// fails with [`IngestError::NotFound`].
    pub async fn resolve(
        &mut self,
        cancel: &CancellationToken,
        txid: &str,
    ) -> Result<&[TransactionOutputLookup], IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        if !self.cache.contains_key(txid) {
            let rows = cancellable(cancel, self.repo.transaction_outputs(&self.scope, txid)).await?;
            let outputs = rows.iter().map(TransactionOutputLookup::from).collect();
            let outputs = self.stamp(outputs);
            self.cache.insert(txid.to_string(), outputs);
        }
        match self.cache.get(txid) {
            Some(outputs) if !outputs.is_empty() => Ok(outputs.as_slice()),
            _ => Err(IngestError::NotFound {
                txid: txid.to_string(),
                vout: 0,
            }),
        }
    }

    /// The output at `vout` of `txid`.
    pub async fn resolve_output(
        &mut self,
        cancel: &CancellationToken,
        txid: &str,
        vout: u32,
    ) -> Result<&TransactionOutputLookup, IngestError> {
        let outputs = self.resolve(cancel, txid).await.map_err(|err| match err {
            IngestError::NotFound { txid, .. } => IngestError::NotFound { txid, vout },
            other => other,
        })?;
        outputs
            .iter()
            .find(|o| o.output_index == vout)
            .ok_or_else(|| IngestError::NotFound {
                txid: txid.to_string(),
                vout,
            })
    }

    fn stamp(&self, mut outputs: Vec<TransactionOutputLookup>) -> Vec<TransactionOutputLookup> {
        for out in &mut outputs {
            out.coin.clone_from(&self.scope.coin);
            out.network.clone_from(&self.scope.network);
        }
        outputs
    }
}
