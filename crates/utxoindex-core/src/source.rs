//! Chain source contracts.
//!
//! Implementations wrap a node RPC and perform all chain-specific decoding:
//! amounts in base units, script to addresses, witness stacks.

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{BackfillBlock, HistoryBlock};

/// Anything that knows the current chain tip.
#[async_trait]
pub trait ChainTip: Send + Sync {
    async fn latest_height(&self) -> Result<u64, IngestError>;
}

/// Source for the history path: header, transactions and outputs.
#[async_trait]
pub trait HistorySource: ChainTip {
    async fn fetch_history_block(&self, height: u64) -> Result<HistoryBlock, IngestError>;
}

/// Source for the backfill path: header plus unresolved inputs.
#[async_trait]
pub trait BackfillSource: ChainTip {
    async fn fetch_backfill_block(&self, height: u64) -> Result<BackfillBlock, IngestError>;
}
