//! JSON state files kept next to the database
//!
//! `bot_state.json` holds the per-day run state (cooldowns and the legacy
//! daily PnL accumulator). `portfolio_snapshots.json` holds a rolling window of
//! equity points for the equity chart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

fn utc_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Contents of `bot_state.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub date: String,
    #[serde(default)]
    pub daily_pnl: Decimal,
    #[serde(default)]
    pub last_trade_ts: i64,
    /// Symbol -> unix seconds of the last trade
    #[serde(default)]
    pub last_trade: HashMap<String, i64>,
}

impl RunState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            date: utc_date(now),
            daily_pnl: Decimal::ZERO,
            last_trade_ts: 0,
            last_trade: HashMap::new(),
        }
    }

    /// Clear the daily fields when the UTC date has changed; cooldowns survive
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = utc_date(now);
        if self.date == today {
            return false;
        }
        self.date = today;
        self.daily_pnl = Decimal::ZERO;
        true
    }

    pub fn on_cooldown(&self, symbol: &str, now: i64, cooldown_seconds: i64) -> bool {
        self.last_trade
            .get(symbol)
            .map(|ts| now - ts < cooldown_seconds)
            .unwrap_or(false)
    }

    pub fn record_trade(&mut self, symbol: &str, pnl: Decimal, now: i64) {
        self.last_trade.insert(symbol.to_string(), now);
        self.last_trade_ts = now;
        self.daily_pnl += pnl;
    }
}

pub struct RunStateStore {
    path: PathBuf,
}

impl RunStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the state, falling back to a fresh one when missing or unreadable
    pub async fn load(&self, now: DateTime<Utc>) -> RunState {
        let mut state = match fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<RunState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("[State] {} is malformed ({}), starting fresh", self.path.display(), e);
                    RunState::fresh(now)
                }
            },
            Err(_) => RunState::fresh(now),
        };
        if state.roll_day(now) {
            debug!("[State] New UTC day {}", state.date);
        }
        state
    }

    pub async fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Snapshot,
    Liquidation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub ts: i64,
    pub value: Decimal,
    #[serde(rename = "type")]
    pub kind: PointKind,
}

/// Rolling equity series in `portfolio_snapshots.json`
pub struct EquitySeries {
    path: PathBuf,
    interval_seconds: i64,
    window_seconds: i64,
}

impl EquitySeries {
    pub fn new(path: impl AsRef<Path>, interval_seconds: i64, window_seconds: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            interval_seconds,
            window_seconds,
        }
    }

    pub async fn load(&self) -> Vec<EquityPoint> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("[State] {} is malformed ({}), resetting", self.path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    /// Append a point. Snapshots are rate-limited; liquidations always land.
    /// Returns whether the point was written.
    pub async fn append(&self, point: EquityPoint) -> Result<bool> {
        let mut points = self.load().await;

        if point.kind == PointKind::Snapshot {
            let last_snapshot = points
                .iter()
                .filter(|p| p.kind == PointKind::Snapshot)
                .map(|p| p.ts)
                .max();
            if let Some(last) = last_snapshot {
                if point.ts - last < self.interval_seconds {
                    return Ok(false);
                }
            }
        }

        let cutoff = point.ts - self.window_seconds;
        points.push(point);
        points.retain(|p| p.ts >= cutoff);

        let json = serde_json::to_string_pretty(&points)?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(true)
    }
}
