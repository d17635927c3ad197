//! Polygon Trader CLI
//!
//! Uniswap V3 spot trading bot for Polygon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use polygon_trader::{init_logging, Bot, Config, Database, EntryOutcome};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Parser)]
#[command(name = "polygon-trader")]
#[command(about = "Uniswap V3 trading bot for Polygon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop until Ctrl+C
    Run,

    /// Run a single cycle and exit
    Once,

    /// Show the trading pair universe
    Scan,

    /// Sync wallet balances and prices into the database
    Sync,

    /// Show trade statistics and open positions
    Stats,

    /// Show recent portfolio snapshots
    Equity {
        /// Hours of history to show
        #[arg(short = 'H', long, default_value = "24")]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Run => run_bot(config).await?,
        Commands::Once => run_once(config).await?,
        Commands::Scan => scan_pairs(config).await?,
        Commands::Sync => sync_balances(config).await?,
        Commands::Stats => show_stats(&config).await?,
        Commands::Equity { hours } => show_equity(&config, hours).await?,
    }

    Ok(())
}

fn banner(title: &str, config: &Config) {
    println!("\n{}", "=".repeat(70));
    println!("  {}", title);
    println!(
        "  Mode: {} | Strategy: {}",
        if config.is_live() { "LIVE".red().bold() } else { "PAPER".yellow() },
        config.strategy
    );
    println!("{}\n", "=".repeat(70));
}

fn pnl(value: Decimal) -> colored::ColoredString {
    let text = format!("{:+.4}", value);
    if value > Decimal::ZERO {
        text.green()
    } else if value < Decimal::ZERO {
        text.red()
    } else {
        text.normal()
    }
}

async fn build_bot(config: Config) -> Result<Bot> {
    let db = Database::new(&config.database_path).await?;
    Bot::new(config, db).await
}

async fn run_bot(config: Config) -> Result<()> {
    banner("POLYGON TRADER", &config);
    info!(
        "Cycle every {}s | max {} positions | daily loss limit {:?}",
        config.loop_sleep_seconds, config.max_positions, config.risk.daily_loss_limit
    );

    let bot = build_bot(config).await?;
    bot.run().await?;

    info!("Bot stopped");
    Ok(())
}

async fn run_once(config: Config) -> Result<()> {
    banner("POLYGON TRADER - SINGLE CYCLE", &config);

    let bot = build_bot(config).await?;
    let report = bot.run_cycle(chrono::Utc::now()).await?;

    println!("Equity:     ${:.4}", report.equity);
    println!("Daily PnL:  {}", pnl(report.daily_pnl));
    println!("Baseline:   ${:.4}", report.baseline);
    if let Some(halt) = &report.halt {
        println!("Entries:    {}", format!("halted ({})", halt).red());
    }
    if report.liquidated {
        println!("{}", "Portfolio trailing stop fired, positions liquidated".red().bold());
    }

    if !report.exits.is_empty() {
        println!("\nExits:");
        for exit in &report.exits {
            println!("  {:<8} {:<22} {} for ${:.4}", exit.symbol, exit.reason, exit.quantity, exit.usdc);
        }
    }

    if !report.entries.is_empty() {
        println!("\nEntries:");
        for (symbol, outcome) in &report.entries {
            let line = match outcome {
                EntryOutcome::Bought { usdc, quantity, price } => {
                    format!("BOUGHT {} at {} for ${}", quantity, price, usdc).green().to_string()
                }
                EntryOutcome::NoSignal(reason) => format!("no signal: {}", reason),
                EntryOutcome::DataUnavailable(reason) => format!("no data: {}", reason).yellow().to_string(),
                EntryOutcome::Skipped(reason) => format!("skipped: {}", reason),
                EntryOutcome::Failed(reason) => format!("FAILED: {}", reason).red().to_string(),
            };
            println!("  {:<8} {}", symbol, line);
        }
    }

    Ok(())
}

async fn scan_pairs(config: Config) -> Result<()> {
    banner("PAIR SCANNER", &config);

    let bot = build_bot(config).await?;
    let pairs = bot.scanner().pairs().await;

    println!("{:<8} {:>6} {:>16} {:>16} {:>14}", "SYMBOL", "FEE", "TVL USD", "VOLUME USD", "PRICE");
    println!("{}", "-".repeat(70));
    for pair in &pairs {
        let price = bot.market().get_price(pair.symbol()).await;
        println!(
            "{:<8} {:>6} {:>16} {:>16} {:>14.4}",
            pair.symbol(),
            pair.fee_tier.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string()),
            pair.tvl_usd.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "-".to_string()),
            pair.volume_usd.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "-".to_string()),
            price
        );
    }
    println!("\n{} pairs", pairs.len());

    Ok(())
}

async fn sync_balances(config: Config) -> Result<()> {
    banner("BALANCE SYNC", &config);

    let bot = build_bot(config).await?;
    let positions = bot.sync_balances().await?;

    println!("{:<8} {:>20} {:>14} {:>14}", "ASSET", "AMOUNT", "PRICE", "VALUE");
    println!("{}", "-".repeat(70));
    for pos in &positions {
        println!("{:<8} {:>20} {:>14.4} {:>14.4}", pos.asset, pos.amount, pos.price, pos.value());
    }

    Ok(())
}

async fn show_stats(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let stats = db.get_stats().await?;

    println!("\n{}", "=".repeat(70));
    println!("  BOT STATISTICS");
    println!("{}\n", "=".repeat(70));

    println!("Overall Performance:");
    println!("  Total Trades:    {} ({} buys / {} sells)", stats.total_trades, stats.buys, stats.sells);
    println!("  Winning Sells:   {}", stats.winning_sells);
    println!("  Losing Sells:    {}", stats.losing_sells);
    println!("  Win Rate:        {:.1}%", stats.win_rate());
    println!("  Realized PnL:    {}", pnl(stats.realized_pnl));

    for key in [
        polygon_trader::db::meta_keys::DAILY_PNL,
        polygon_trader::db::meta_keys::PORTFOLIO_BASELINE,
        polygon_trader::db::meta_keys::PORTFOLIO_ATH,
    ] {
        if let Some(value) = db.get_meta(key).await? {
            println!("  {:<16} {}", format!("{}:", key), value);
        }
    }

    let positions = db.get_positions().await?;
    let open: Vec<_> = positions.iter().filter(|p| p.entry_price.is_some()).collect();
    if !open.is_empty() {
        println!("\nOpen Positions ({}):", open.len());
        for pos in open {
            println!(
                "  {:<8} {} @ {} | now {} | uPnL {}{}{}",
                pos.asset,
                pos.amount,
                pos.entry_price.unwrap_or_default(),
                pos.price,
                pnl(pos.unrealized_pnl()),
                if pos.tp1_hit { " [TP1]" } else { "" },
                if pos.tp2_hit { " [TP2]" } else { "" }
            );
        }
    }

    let trades = db.recent_trades(10).await?;
    if !trades.is_empty() {
        println!("\nRecent Trades:");
        for trade in &trades {
            println!(
                "  {} {:<4} {:<10} {} @ {} | {}",
                chrono::DateTime::from_timestamp(trade.timestamp, 0)
                    .map(|t| t.format("%m-%d %H:%M").to_string())
                    .unwrap_or_default(),
                trade.side,
                trade.pair,
                trade.quantity,
                trade.price,
                if trade.side == polygon_trader::Side::Sell {
                    pnl(trade.pnl()).to_string()
                } else {
                    "-".to_string()
                }
            );
        }
    }

    Ok(())
}

async fn show_equity(config: &Config, hours: i64) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let since = chrono::Utc::now().timestamp() - hours * 3600;
    let snapshots = db.snapshots_since(since).await?;

    println!("\n{}", "=".repeat(70));
    println!("  EQUITY (last {}h, {} snapshots)", hours, snapshots.len());
    println!("{}\n", "=".repeat(70));

    for snap in &snapshots {
        println!(
            "  {}  ${:>10.4}  stable ${:>10.4}  invested ${:>10.4}  uPnL {}",
            chrono::DateTime::from_timestamp(snap.timestamp, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            snap.total_equity,
            snap.stable_balance,
            snap.invested_value,
            pnl(snap.unrealized_pnl)
        );
    }

    if let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) {
        println!("\n  Change: {}", pnl(last.total_equity - first.total_equity));
    }

    Ok(())
}
