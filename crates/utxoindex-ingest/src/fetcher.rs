//! Height fetchers: which heights each loop works on next.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use utxoindex_core::{cancellable, BlockStatus, ChainScope, ChainTip, IngestError, Repository};

/// Default selection batch size.
pub const DEFAULT_RANDOM_HEIGHT_LIMIT: usize = 10_000;

/// Chooses the next batch of heights. An empty batch means "nothing to do".
#[async_trait]
pub trait HeightFetcher: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u64>, IngestError>;
}

/// Heights up to the chain tip that still lack history rows: absent heights
/// first, then follower placeholders (`new`) to fill the batch.
pub struct HistoryFetcher {
    tip: Arc<dyn ChainTip>,
    repo: Arc<dyn Repository>,
    scope: ChainScope,
    limit: usize,
}

impl HistoryFetcher {
    pub fn new(
        tip: Arc<dyn ChainTip>,
        repo: Arc<dyn Repository>,
        scope: ChainScope,
        limit: usize,
    ) -> Self {
        Self { tip, repo, scope, limit }
    }
}

#[async_trait]
impl HeightFetcher for HistoryFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u64>, IngestError> {
        let latest = cancellable(cancel, self.tip.latest_height()).await?;
        let mut heights = cancellable(
            cancel,
            self.repo
                .random_missing_block_heights(&self.scope, latest, self.limit),
        )
        .await?;
        let absent = heights.len();
        if absent < self.limit {
            let placeholders = cancellable(
                cancel,
                self.repo.random_block_heights_by_status(
                    &self.scope,
                    BlockStatus::New,
                    latest,
                    self.limit - absent,
                ),
            )
            .await?;
            heights.extend(placeholders);
        }
        debug!(
            scope = %self.scope,
            latest,
            absent,
            placeholders = heights.len() - absent,
            "history heights selected"
        );
        Ok(heights)
    }
}

/// Unprocessed heights inside the contiguous prefix `[0, h]`.
///
/// Every output an input in that prefix can spend is already stored, so
/// resolution never races the history loop.
pub struct BackfillFetcher {
    repo: Arc<dyn Repository>,
    scope: ChainScope,
    limit: usize,
}

impl BackfillFetcher {
    pub fn new(repo: Arc<dyn Repository>, scope: ChainScope, limit: usize) -> Self {
        Self { repo, scope, limit }
    }
}

#[async_trait]
impl HeightFetcher for BackfillFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u64>, IngestError> {
        let contiguous =
            cancellable(cancel, self.repo.max_contiguous_block_height(&self.scope)).await?;
        let Some(max_height) = contiguous else {
            debug!(scope = %self.scope, "no contiguous prefix yet");
            return Ok(Vec::new());
        };
        cancellable(
            cancel,
            self.repo
                .random_unprocessed_block_heights(&self.scope, max_height, self.limit),
        )
        .await
    }
}

/// Missing heights up to the tip, lowest first.
pub struct FollowerFetcher {
    tip: Arc<dyn ChainTip>,
    repo: Arc<dyn Repository>,
    scope: ChainScope,
    limit: usize,
}

impl FollowerFetcher {
    pub fn new(
        tip: Arc<dyn ChainTip>,
        repo: Arc<dyn Repository>,
        scope: ChainScope,
        limit: usize,
    ) -> Self {
        Self { tip, repo, scope, limit }
    }
}

#[async_trait]
impl HeightFetcher for FollowerFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u64>, IngestError> {
        let latest = cancellable(cancel, self.tip.latest_height()).await?;
        let mut heights = cancellable(
            cancel,
            self.repo
                .random_missing_block_heights(&self.scope, latest, self.limit),
        )
        .await?;
        heights.sort_unstable();
        Ok(heights)
    }
}
