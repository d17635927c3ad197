//! SQLite database for trades, balances, meta state and portfolio snapshots
//!
//! The dashboard reads these tables while the bot runs, so the pool uses WAL
//! journaling. Decimal amounts are stored as TEXT to keep exact precision.

use crate::types::{BotStats, PortfolioSnapshot, Position, Side, Trade};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Meta keys shared with the dashboard
pub mod meta_keys {
    pub const DAILY_PNL: &str = "daily_pnl";
    pub const PORTFOLIO_BASELINE: &str = "portfolio_baseline";
    pub const PORTFOLIO_ATH: &str = "portfolio_ath";
    pub const LAST_GROWTH_LOCK: &str = "last_growth_lock";
    pub const TRAILING_STOP_UNTIL: &str = "trailing_stop_until";
}

/// Change to the `balances` table applied together with a trade
#[derive(Debug, Clone)]
pub enum BalanceChange {
    /// Insert or replace the row (entry price is kept if already set)
    Upsert(Position),
    /// Delete the row for this asset
    Remove(String),
}

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or(Decimal::ZERO)
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Columns added to `table` since the first schema, with their DDL
    async fn add_missing_columns(&self, table: &str, columns: &[(&str, &str)]) -> Result<()> {
        let table_info: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as(&format!("PRAGMA table_info({})", table))
                .fetch_all(&self.pool)
                .await
                .unwrap_or_default();

        if table_info.is_empty() {
            return Ok(());
        }

        for (column, ddl) in columns {
            let exists = table_info.iter().any(|(_, name, _, _, _, _)| name == column);
            if !exists {
                info!("Migrating {} table: adding {} column", table, column);
                sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, ddl))
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        self.add_missing_columns(
            "trades",
            &[
                ("quantity", "TEXT NOT NULL DEFAULT '0'"),
                ("price", "TEXT NOT NULL DEFAULT '0'"),
                ("strategy", "TEXT"),
                ("equity_before", "TEXT"),
                ("equity_after", "TEXT"),
            ],
        )
        .await?;

        self.add_missing_columns(
            "balances",
            &[
                ("entry_price", "TEXT"),
                ("tp1_hit", "INTEGER NOT NULL DEFAULT 0"),
                ("tp2_hit", "INTEGER NOT NULL DEFAULT 0"),
                ("ath_price", "TEXT"),
                ("trail_stop", "TEXT"),
            ],
        )
        .await?;

        self.add_missing_columns(
            "portfolio_snapshots",
            &[
                ("stable_balance", "TEXT NOT NULL DEFAULT '0'"),
                ("invested_value", "TEXT NOT NULL DEFAULT '0'"),
                ("unrealized_pnl", "TEXT NOT NULL DEFAULT '0'"),
                ("realized_pnl", "TEXT NOT NULL DEFAULT '0'"),
            ],
        )
        .await?;

        Ok(())
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        // Run migrations first
        self.run_migrations().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                amount_in TEXT NOT NULL,
                amount_out TEXT NOT NULL,
                quantity TEXT NOT NULL DEFAULT '0',
                price TEXT NOT NULL DEFAULT '0',
                tx_hash TEXT NOT NULL,
                strategy TEXT,
                equity_before TEXT,
                equity_after TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                asset TEXT PRIMARY KEY,
                amount TEXT NOT NULL,
                price TEXT NOT NULL DEFAULT '0',
                entry_price TEXT,
                tp1_hit INTEGER NOT NULL DEFAULT 0,
                tp2_hit INTEGER NOT NULL DEFAULT 0,
                ath_price TEXT,
                trail_stop TEXT,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                total_equity TEXT NOT NULL,
                stable_balance TEXT NOT NULL DEFAULT '0',
                invested_value TEXT NOT NULL DEFAULT '0',
                unrealized_pnl TEXT NOT NULL DEFAULT '0',
                realized_pnl TEXT NOT NULL DEFAULT '0'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_pair ON trades(pair)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON portfolio_snapshots(timestamp)")
            .execute(&self.pool)
            .await?;

        info!("Database initialized");
        Ok(())
    }

    // ==================== TRADES ====================

    /// Append a trade without touching balances
    pub async fn record_trade(&self, trade: &Trade) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_trade(&mut tx, trade).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Append a trade and apply its balance changes atomically
    pub async fn record_fill(&self, trade: &Trade, changes: &[BalanceChange]) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("Failed to open fill transaction")?;

        let id = insert_trade(&mut tx, trade).await?;
        for change in changes {
            match change {
                BalanceChange::Upsert(position) => upsert_position(&mut tx, position).await?,
                BalanceChange::Remove(asset) => {
                    sqlx::query("DELETE FROM balances WHERE asset = ?")
                        .bind(asset)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await.context("Failed to commit fill")?;
        debug!("[DB] Recorded {} {} (trade #{})", trade.side, trade.pair, id);
        Ok(id)
    }

    /// Most recent trades, newest first
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY timestamp DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_trade).collect()
    }

    /// Σ(amount_out − amount_in) over trades at or after `since` (unix seconds)
    pub async fn realized_pnl_since(&self, since: i64) -> Result<Decimal> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT amount_in, amount_out FROM trades WHERE timestamp >= ?")
                .bind(since)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|(amount_in, amount_out)| parse_decimal(amount_out) - parse_decimal(amount_in))
            .sum())
    }

    /// Realized PnL of all sells ever recorded
    pub async fn realized_pnl_total(&self) -> Result<Decimal> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT amount_in, amount_out FROM trades WHERE side = 'SELL'")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|(amount_in, amount_out)| parse_decimal(amount_out) - parse_decimal(amount_in))
            .sum())
    }

    // ==================== BALANCES ====================

    /// Record an observed balance and price without touching exit bookkeeping
    pub async fn sync_balance(&self, asset: &str, amount: Decimal, price: Decimal) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO balances (asset, amount, price, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(asset) DO UPDATE SET
                amount = excluded.amount,
                price = excluded.price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(asset)
        .bind(amount.to_string())
        .bind(price.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a position row; an existing entry price is never replaced
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_position(&mut conn, position).await
    }

    pub async fn get_position(&self, asset: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM balances WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_position).transpose()
    }

    /// All balance rows, stablecoin included
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM balances ORDER BY asset")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_position).collect()
    }

    pub async fn remove_position(&self, asset: &str) -> Result<()> {
        sqlx::query("DELETE FROM balances WHERE asset = ?")
            .bind(asset)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== META ====================

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Meta value parsed as a decimal; unparseable values read as absent
    pub async fn get_meta_decimal(&self, key: &str) -> Result<Option<Decimal>> {
        Ok(self
            .get_meta(key)
            .await?
            .and_then(|v| Decimal::from_str(v.trim()).ok()))
    }

    pub async fn set_meta_decimal(&self, key: &str, value: Decimal) -> Result<()> {
        self.set_meta(key, &value.to_string()).await
    }

    pub async fn get_meta_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_meta(key).await?.and_then(|v| v.trim().parse().ok()))
    }

    // ==================== SNAPSHOTS ====================

    pub async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots
                (timestamp, total_equity, stable_balance, invested_value, unrealized_pnl, realized_pnl)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp)
        .bind(snapshot.total_equity.to_string())
        .bind(snapshot.stable_balance.to_string())
        .bind(snapshot.invested_value.to_string())
        .bind(snapshot.unrealized_pnl.to_string())
        .bind(snapshot.realized_pnl.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn last_snapshot_timestamp(&self) -> Result<Option<i64>> {
        let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT MAX(timestamp) FROM portfolio_snapshots")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(ts,)| ts))
    }

    /// Snapshots at or after `since`, oldest first
    pub async fn snapshots_since(&self, since: i64) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query("SELECT * FROM portfolio_snapshots WHERE timestamp >= ? ORDER BY timestamp")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| PortfolioSnapshot {
                timestamp: row.get("timestamp"),
                total_equity: parse_decimal(&row.get::<String, _>("total_equity")),
                stable_balance: parse_decimal(&row.get::<String, _>("stable_balance")),
                invested_value: parse_decimal(&row.get::<String, _>("invested_value")),
                unrealized_pnl: parse_decimal(&row.get::<String, _>("unrealized_pnl")),
                realized_pnl: parse_decimal(&row.get::<String, _>("realized_pnl")),
            })
            .collect())
    }

    // ==================== STATS ====================

    pub async fn get_stats(&self) -> Result<BotStats> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT side, amount_in, amount_out FROM trades")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = BotStats::default();
        for (side, amount_in, amount_out) in &rows {
            stats.total_trades += 1;
            match Side::from_str(side) {
                Ok(Side::Buy) => stats.buys += 1,
                Ok(Side::Sell) => {
                    stats.sells += 1;
                    let pnl = parse_decimal(amount_out) - parse_decimal(amount_in);
                    stats.realized_pnl += pnl;
                    if pnl > Decimal::ZERO {
                        stats.winning_sells += 1;
                    } else if pnl < Decimal::ZERO {
                        stats.losing_sells += 1;
                    }
                }
                Err(_) => {}
            }
        }

        let open: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM balances WHERE entry_price IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        stats.open_positions = open.0;

        Ok(stats)
    }
}

async fn insert_trade(conn: &mut sqlx::SqliteConnection, trade: &Trade) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trades
            (timestamp, pair, side, amount_in, amount_out, quantity, price, tx_hash, strategy, equity_before, equity_after)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trade.timestamp)
    .bind(&trade.pair)
    .bind(trade.side.to_string())
    .bind(trade.amount_in.to_string())
    .bind(trade.amount_out.to_string())
    .bind(trade.quantity.to_string())
    .bind(trade.price.to_string())
    .bind(&trade.tx_hash)
    .bind(&trade.strategy)
    .bind(trade.equity_before.map(|d| d.to_string()))
    .bind(trade.equity_after.map(|d| d.to_string()))
    .execute(&mut *conn)
    .await
    .context("Failed to insert trade")?;

    Ok(result.last_insert_rowid())
}

async fn upsert_position(conn: &mut sqlx::SqliteConnection, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO balances (asset, amount, price, entry_price, tp1_hit, tp2_hit, ath_price, trail_stop, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(asset) DO UPDATE SET
            amount = excluded.amount,
            price = excluded.price,
            entry_price = COALESCE(balances.entry_price, excluded.entry_price),
            tp1_hit = excluded.tp1_hit,
            tp2_hit = excluded.tp2_hit,
            ath_price = excluded.ath_price,
            trail_stop = excluded.trail_stop,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&position.asset)
    .bind(position.amount.to_string())
    .bind(position.price.to_string())
    .bind(position.entry_price.map(|d| d.to_string()))
    .bind(position.tp1_hit)
    .bind(position.tp2_hit)
    .bind(position.ath_price.map(|d| d.to_string()))
    .bind(position.trail_stop.map(|d| d.to_string()))
    .bind(position.updated_at)
    .execute(&mut *conn)
    .await
    .context("Failed to upsert balance")?;

    Ok(())
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    let side_str: String = row.get("side");
    let amount_in: String = row.get("amount_in");
    let amount_out: String = row.get("amount_out");
    let quantity: String = row.try_get("quantity").unwrap_or_else(|_| "0".to_string());
    let price: String = row.try_get("price").unwrap_or_else(|_| "0".to_string());
    let equity_before: Option<String> = row.try_get("equity_before").unwrap_or(None);
    let equity_after: Option<String> = row.try_get("equity_after").unwrap_or(None);

    Ok(Trade {
        id: Some(row.get("id")),
        timestamp: row.get("timestamp"),
        pair: row.get("pair"),
        side: Side::from_str(&side_str)?,
        amount_in: Decimal::from_str(&amount_in)?,
        amount_out: Decimal::from_str(&amount_out)?,
        quantity: parse_decimal(&quantity),
        price: parse_decimal(&price),
        tx_hash: row.get("tx_hash"),
        strategy: row.try_get("strategy").unwrap_or(None),
        equity_before: equity_before.and_then(|s| Decimal::from_str(&s).ok()),
        equity_after: equity_after.and_then(|s| Decimal::from_str(&s).ok()),
    })
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let amount: String = row.get("amount");
    let price: String = row.get("price");
    let entry_price: Option<String> = row.get("entry_price");
    let ath_price: Option<String> = row.get("ath_price");
    let trail_stop: Option<String> = row.try_get("trail_stop").unwrap_or(None);

    Ok(Position {
        asset: row.get("asset"),
        amount: Decimal::from_str(&amount)?,
        price: parse_decimal(&price),
        entry_price: entry_price.and_then(|s| Decimal::from_str(&s).ok()),
        tp1_hit: row.get("tp1_hit"),
        tp2_hit: row.get("tp2_hit"),
        ath_price: ath_price.and_then(|s| Decimal::from_str(&s).ok()),
        trail_stop: trail_stop.and_then(|s| Decimal::from_str(&s).ok()),
        updated_at: row.get("updated_at"),
    })
}
