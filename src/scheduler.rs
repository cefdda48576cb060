//! Poll Scheduler
//!
//! One [`ChainPoller`] per source chain walks that chain forward in bounded
//! block ranges:
//!
//! ```text
//! Idle -> Querying -> Processing -> Idle
//! ```
//!
//! The watermark only moves to the end of a range after every event in it was
//! handled. Any failure leaves it unchanged and the same range is queried again
//! on the next tick.
//!
//! [`RelayScheduler`] runs both pollers, the health monitor and the periodic
//! checkpoint flush as independent tasks sharing one [`CheckpointStore`], and
//! performs the final flush on shutdown.

use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::error::{ChainError, TickError};
use crate::health::HealthMonitor;
use crate::metrics::Metrics;
use crate::processor::{BatchSummary, EventProcessor};
use crate::types::{ChainSide, Direction};

/// Next block range to scan, or `None` when there is nothing new.
///
/// Covers `[watermark + 1, min(height, watermark + max_range)]`.
pub fn next_range(watermark: u64, height: u64, max_range: u64) -> Option<(u64, u64)> {
    if height <= watermark {
        return None;
    }
    let from = watermark + 1;
    let to = height.min(watermark.saturating_add(max_range.max(1)));
    Some((from, to))
}

/// Exponential backoff added to the poll interval after failed ticks
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Backoff for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Querying,
    Processing,
}

/// Result of a successful tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Chain height has not moved past the watermark
    UpToDate { height: u64 },
    /// Range processed and watermark advanced to `to_block`
    Advanced {
        from_block: u64,
        to_block: u64,
        summary: BatchSummary,
    },
}

/// Poller settings for one source chain
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    /// First block to scan when nothing is checkpointed; `None` starts at head
    pub start_block: Option<u64>,
    pub backoff: BackoffConfig,
}

pub struct ChainPoller {
    side: ChainSide,
    direction: Direction,
    source: Arc<dyn ChainClient>,
    processor: EventProcessor,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    settings: PollerSettings,
    state: PollState,
    consecutive_failures: u32,
}

impl ChainPoller {
    /// `source` must be the chain the processor's direction reads from
    pub fn new(
        source: Arc<dyn ChainClient>,
        processor: EventProcessor,
        store: Arc<CheckpointStore>,
        metrics: Arc<Metrics>,
        settings: PollerSettings,
    ) -> Result<Self> {
        let direction = processor.direction();
        if source.side() != direction.source() {
            return Err(eyre!(
                "{} events are read from chain {}, got a client for chain {}",
                direction,
                direction.source(),
                source.side()
            ));
        }
        Ok(Self {
            side: source.side(),
            direction,
            source,
            processor,
            store,
            metrics,
            settings,
            state: PollState::Idle,
            consecutive_failures: 0,
        })
    }

    pub fn side(&self) -> ChainSide {
        self.side
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Watermark to resume from, initialising it on first start
    async fn resolve_watermark(&self) -> Result<u64, ChainError> {
        if let Some(watermark) = self.store.watermark(self.side).await {
            return Ok(watermark);
        }

        let initial = match self.settings.start_block {
            Some(start) => start.saturating_sub(1),
            None => self.source.current_height().await?,
        };
        self.store.set_watermark(self.side, initial).await;
        self.store.flush().await;
        info!(
            chain = %self.side,
            watermark = initial,
            start_block = ?self.settings.start_block,
            "No checkpointed watermark, initialised"
        );
        Ok(initial)
    }

    /// Run one poll cycle
    pub async fn tick(&mut self) -> Result<TickOutcome, TickError> {
        let result = self.poll_once().await;
        self.state = PollState::Idle;
        result
    }

    async fn poll_once(&mut self) -> Result<TickOutcome, TickError> {
        let label = self.side.as_str();
        self.state = PollState::Querying;

        let watermark = self.resolve_watermark().await?;
        let height = self.source.current_height().await?;
        self.metrics
            .chain_height
            .with_label_values(&[label])
            .set(height as i64);

        let Some((from_block, to_block)) =
            next_range(watermark, height, self.settings.max_block_range)
        else {
            debug!(chain = %self.side, height, watermark, "No new blocks");
            return Ok(TickOutcome::UpToDate { height });
        };

        let events = self
            .source
            .query_events(self.direction.event_kind(), from_block, to_block)
            .await?;

        self.state = PollState::Processing;
        let summary = self.processor.process_batch(&events).await?;

        self.store.set_watermark(self.side, to_block).await;
        self.metrics
            .watermark
            .with_label_values(&[label])
            .set(to_block as i64);

        if events.is_empty() {
            debug!(chain = %self.side, from_block, to_block, "Processed empty range");
        } else {
            info!(
                chain = %self.side,
                direction = %self.direction,
                from_block,
                to_block,
                events = events.len(),
                relayed = summary.relayed,
                already_processed = summary.already_processed,
                skipped = summary.skipped,
                dropped = summary.dropped,
                "Processed block range"
            );
        }

        Ok(TickOutcome::Advanced {
            from_block,
            to_block,
            summary,
        })
    }

    /// Delay before the next tick given the last result
    async fn next_delay(&mut self, result: &Result<TickOutcome, TickError>) -> Duration {
        match result {
            Ok(_) => {
                self.consecutive_failures = 0;
                self.settings.poll_interval
            }
            Err(e) => {
                self.consecutive_failures += 1;
                // per-event failures are already counted by the processor
                if matches!(e, TickError::Chain(_)) {
                    self.store.record_error().await;
                }
                self.metrics
                    .tick_failures_total
                    .with_label_values(&[self.side.as_str()])
                    .inc();
                let delay = self.settings.poll_interval
                    + self
                        .settings
                        .backoff
                        .backoff_for_attempt(self.consecutive_failures - 1);
                warn!(
                    chain = %self.side,
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Poll tick failed, watermark unchanged"
                );
                delay
            }
        }
    }

    /// Tick until `stop` fires. A tick in flight always runs to completion.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            chain = %self.side,
            direction = %self.direction,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_block_range = self.settings.max_block_range,
            "Chain poller started"
        );

        while !*stop.borrow() {
            let result = self.tick().await;
            let delay = self.next_delay(&result).await;

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(chain = %self.side, "Chain poller stopped");
    }
}

/// Periodic checkpoint flush with optional pruning
async fn run_checkpoint_flusher(
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                store.prune().await;
                if !store.flush().await {
                    metrics.checkpoint_save_failures_total.inc();
                }
            }
        }
    }
}

/// Owns every relay task and their shared checkpoint store
pub struct RelayScheduler {
    pollers: Vec<ChainPoller>,
    health: Option<HealthMonitor>,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    checkpoint_interval: Duration,
}

impl RelayScheduler {
    pub fn new(
        store: Arc<CheckpointStore>,
        metrics: Arc<Metrics>,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            pollers: Vec::new(),
            health: None,
            store,
            metrics,
            checkpoint_interval,
        }
    }

    pub fn with_poller(mut self, poller: ChainPoller) -> Self {
        self.pollers.push(poller);
        self
    }

    pub fn with_health_monitor(mut self, monitor: HealthMonitor) -> Self {
        self.health = Some(monitor);
        self
    }

    /// Run all tasks until `shutdown` fires (or its sender is dropped), then
    /// wait for in-flight ticks and write a final checkpoint.
    ///
    /// Returns an error if any task panicked.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();

        for poller in self.pollers {
            join_set.spawn(poller.run(stop_rx.clone()));
        }
        if let Some(health) = self.health {
            join_set.spawn(health.run(stop_rx.clone()));
        }
        join_set.spawn(run_checkpoint_flusher(
            self.store.clone(),
            self.metrics.clone(),
            self.checkpoint_interval,
            stop_rx,
        ));

        info!(tasks = join_set.len(), "Relay scheduler started");

        let mut failure = None;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, stopping relay tasks");
                    break;
                }
                joined = join_set.join_next() => match joined {
                    Some(Ok(())) => continue,
                    Some(Err(e)) => {
                        error!(error = %e, "Relay task panicked, stopping");
                        failure = Some(eyre!("relay task panicked: {}", e));
                        break;
                    }
                    None => break,
                },
            }
        }

        let _ = stop_tx.send(true);
        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Relay task panicked during shutdown");
            }
        }

        if self.store.flush().await {
            info!(path = %self.store.path().display(), "Final checkpoint written");
        } else {
            self.metrics.checkpoint_save_failures_total.inc();
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
