//! Size- and time-triggered buffering with rate-limited flushes.
//!
//! Producers call [`Batcher::add`], which sends into a bounded channel of
//! capacity `2 * flush_size` (the engine's only backpressure). A single
//! background worker owns the buffer and hands it to the [`FlushHandler`] when
//! it reaches `flush_size`, when the interval ticker fires, or on shutdown.
//!
//! Flush failures are logged and the batch is dropped; the next flush is the retry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::IngestError;
use crate::limiter::{RateLimiter, RateLimiterConfig};

/// Persists one batch of items.
#[async_trait]
pub trait FlushHandler<T>: Send + Sync {
    async fn flush(&self, items: Vec<T>) -> Result<(), IngestError>;
}

/// Batcher tunables.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Soft upper bound on items per flush.
    pub flush_size: usize,
    /// Maximum age of the oldest buffered item.
    pub flush_interval: Duration,
    /// Maximum flush calls per second; non-positive disables the limit.
    pub rps: f64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_size: 500,
            flush_interval: Duration::from_secs(30),
            rps: 1.0,
        }
    }
}

struct Running<T> {
    tx: mpsc::Sender<T>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Generic micro-batcher with one flushing worker.
pub struct Batcher<T> {
    name: &'static str,
    config: BatcherConfig,
    handler: Arc<dyn FlushHandler<T>>,
    limiter: Option<Arc<RateLimiter>>,
    running: Mutex<Option<Running<T>>>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new(
        name: &'static str,
        handler: Arc<dyn FlushHandler<T>>,
        config: BatcherConfig,
    ) -> Self {
        let limiter = RateLimiter::new(RateLimiterConfig::per_second(config.rps)).map(Arc::new);
        Self {
            name,
            config,
            handler,
            limiter,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Launch the flushing worker. The worker also stops when `cancel` fires.
    ///
    /// Calling `start` on a running batcher is a no-op.
    pub fn start(&self, cancel: &CancellationToken) {
        let mut running = self.lock();
        if running.is_some() {
            warn!(batcher = self.name, "batcher already started");
            return;
        }

        let flush_size = self.config.flush_size.max(1);
        let (tx, rx) = mpsc::channel(flush_size * 2);
        let stop = cancel.child_token();
        let worker = FlushWorker {
            name: self.name,
            flush_size,
            flush_interval: self.config.flush_interval,
            handler: Arc::clone(&self.handler),
            limiter: self.limiter.clone(),
        };
        let handle = tokio::spawn(worker.run(rx, stop.clone()));
        *running = Some(Running { tx, stop, handle });
        debug!(batcher = self.name, flush_size, "batcher started");
    }

    /// Flush whatever is buffered and wait for the worker to exit.
    pub async fn stop(&self) {
        let running = self.lock().take();
        let Some(running) = running else {
            return;
        };
        running.stop.cancel();
        drop(running.tx);
        if let Err(e) = running.handle.await {
            error!(batcher = self.name, error = %e, "batcher worker panicked");
        }
    }

    /// Returns `true` while the worker accepts items.
    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.stop.is_cancelled() && !r.handle.is_finished())
    }

    /// Enqueue one item, waiting while the channel is full.
    ///
    /// Fails with [`IngestError::Cancelled`] if `cancel` fires, the batcher was
    /// stopped, or it was never started.
    pub async fn add(&self, cancel: &CancellationToken, item: T) -> Result<(), IngestError> {
        let Some((tx, stop)) = self.sender() else {
            return Err(IngestError::Cancelled);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            _ = stop.cancelled() => Err(IngestError::Cancelled),
            sent = tx.send(item) => sent.map_err(|_| IngestError::Cancelled),
        }
    }

    fn sender(&self) -> Option<(mpsc::Sender<T>, CancellationToken)> {
        self.lock()
            .as_ref()
            .map(|r| (r.tx.clone(), r.stop.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running<T>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct FlushWorker<T> {
    name: &'static str,
    flush_size: usize,
    flush_interval: Duration,
    handler: Arc<dyn FlushHandler<T>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl<T: Send + 'static> FlushWorker<T> {
    async fn run(self, mut rx: mpsc::Receiver<T>, stop: CancellationToken) {
        let mut buffer: Vec<T> = Vec::with_capacity(self.flush_size);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                received = rx.recv() => match received {
                    Some(item) => {
                        buffer.push(item);
                        if buffer.len() >= self.flush_size {
                            self.flush(&mut buffer, Some(&stop)).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer, Some(&stop)).await;
                    }
                }
            }
        }

        // Shutdown: drain the channel, keeping each flush within `flush_size`.
        rx.close();
        while let Ok(item) = rx.try_recv() {
            buffer.push(item);
            if buffer.len() >= self.flush_size {
                self.flush(&mut buffer, None).await;
            }
        }
        if !buffer.is_empty() {
            self.flush(&mut buffer, None).await;
        }
        debug!(batcher = self.name, "batcher stopped");
    }

    /// Hand the buffer to the handler. The buffer is empty afterwards unless the
    /// rate-limit wait was cancelled, in which case the shutdown drain picks it up.
    async fn flush(&self, buffer: &mut Vec<T>, cancel: Option<&CancellationToken>) {
        if let Some(limiter) = &self.limiter {
            if limiter.acquire(cancel).await.is_err() {
                return;
            }
        }

        let items = std::mem::replace(buffer, Vec::with_capacity(self.flush_size));
        let count = items.len();
        let start = Instant::now();
        match self.handler.flush(items).await {
            Ok(()) => debug!(
                batcher = self.name,
                items = count,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "batch flushed"
            ),
            Err(err) => error!(
                batcher = self.name,
                items = count,
                error = %err,
                "flush failed, batch dropped"
            ),
        }
    }
}
