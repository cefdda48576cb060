//! Health Monitor
//!
//! Samples both chains' heights and relayer balances, compares heights with the
//! checkpointed watermarks and warns when lag or balance cross their thresholds.
//! Read-only with respect to relay state.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::metrics::Metrics;
use crate::types::ChainSide;

/// Sample of one chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainHealth {
    pub side: ChainSide,
    pub height: Option<u64>,
    pub watermark: Option<u64>,
    pub lag: Option<u64>,
    /// Balance in wei as a decimal string
    pub balance: Option<String>,
    pub lag_exceeded: bool,
    pub balance_low: bool,
    /// RPC errors hit while sampling
    pub errors: Vec<String>,
}

impl ChainHealth {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty() && !self.lag_exceeded && !self.balance_low
    }
}

/// Result of one health tick
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub chains: Vec<ChainHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.chains.iter().all(ChainHealth::is_healthy)
    }

    pub fn chain(&self, side: ChainSide) -> Option<&ChainHealth> {
        self.chains.iter().find(|c| c.side == side)
    }
}

/// Last report published by the monitor, `None` until the first tick
pub type SharedHealthReport = Arc<RwLock<Option<HealthReport>>>;

struct MonitoredChain {
    client: Arc<dyn ChainClient>,
    min_balance: U256,
}

pub struct HealthMonitor {
    chains: Vec<MonitoredChain>,
    store: Arc<CheckpointStore>,
    metrics: Arc<Metrics>,
    max_lag_blocks: u64,
    interval: Duration,
    latest: SharedHealthReport,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<CheckpointStore>,
        metrics: Arc<Metrics>,
        max_lag_blocks: u64,
        interval: Duration,
    ) -> Self {
        Self {
            chains: Vec::new(),
            store,
            metrics,
            max_lag_blocks,
            interval,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Handle to the most recent report, for the status server
    pub fn latest_report(&self) -> SharedHealthReport {
        self.latest.clone()
    }

    /// Watch `client`, warning when its relayer balance drops under `min_balance`
    pub fn with_chain(mut self, client: Arc<dyn ChainClient>, min_balance: U256) -> Self {
        self.chains.push(MonitoredChain {
            client,
            min_balance,
        });
        self
    }

    /// Sample every monitored chain once
    pub async fn tick(&self) -> HealthReport {
        let mut chains = Vec::with_capacity(self.chains.len());
        for chain in &self.chains {
            chains.push(self.check_chain(chain).await);
        }
        let report = HealthReport {
            chains,
            checked_at: Utc::now(),
        };
        if report.is_healthy() {
            debug!("Health check passed");
        }
        *self.latest.write().await = Some(report.clone());
        report
    }

    async fn check_chain(&self, chain: &MonitoredChain) -> ChainHealth {
        let side = chain.client.side();
        let label = side.as_str();
        let mut errors = Vec::new();

        let height = match chain.client.current_height().await {
            Ok(height) => {
                self.metrics
                    .chain_height
                    .with_label_values(&[label])
                    .set(height as i64);
                Some(height)
            }
            Err(e) => {
                warn!(chain = %side, error = %e, "Health check failed to read chain height");
                errors.push(e.to_string());
                None
            }
        };

        let watermark = self.store.watermark(side).await;
        let lag = match (height, watermark) {
            (Some(h), Some(w)) => Some(h.saturating_sub(w)),
            _ => None,
        };
        let lag_exceeded = lag.is_some_and(|lag| lag > self.max_lag_blocks);
        if let Some(lag) = lag {
            self.metrics
                .lag_blocks
                .with_label_values(&[label])
                .set(lag as i64);
            if lag_exceeded {
                warn!(
                    chain = %side,
                    lag,
                    max_lag = self.max_lag_blocks,
                    height = ?height,
                    watermark = ?watermark,
                    "Relayer is lagging behind chain head"
                );
            }
        }

        let balance = match chain.client.balance().await {
            Ok(balance) => {
                let as_f64 = u128::try_from(balance)
                    .map(|v| v as f64)
                    .unwrap_or(f64::MAX);
                self.metrics
                    .balance_wei
                    .with_label_values(&[label])
                    .set(as_f64);
                Some(balance)
            }
            Err(e) => {
                warn!(chain = %side, error = %e, "Health check failed to read relayer balance");
                errors.push(e.to_string());
                None
            }
        };
        let balance_low = balance.is_some_and(|b| b < chain.min_balance);
        if balance_low {
            warn!(
                chain = %side,
                relayer = %chain.client.relayer_address(),
                balance = ?balance,
                min_balance = %chain.min_balance,
                "Relayer balance below floor"
            );
        }

        ChainHealth {
            side,
            height,
            watermark,
            lag,
            balance: balance.map(|b| b.to_string()),
            lag_exceeded,
            balance_low,
            errors,
        }
    }

    /// Tick on a fixed interval until `stop` fires
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            max_lag_blocks = self.max_lag_blocks,
            chains = self.chains.len(),
            "Health monitor started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Health monitor stopped");
    }
}
