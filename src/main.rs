//! Autonomous Multi-Token Trader
//!
//! Holds whitelisted token balances and exits them on TP/SL thresholds
//! priced strictly from on-chain pool state.

use autotrader::{
    chain::ChainRegistry,
    config::Config,
    controls::{run_flag_file_poller, ControlSignals},
    dashboard::{self, AppState, StatusSnapshot},
    engine::Trader,
    storage::Database,
    types::address_key,
};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(about = "Autonomous multi-token trader with on-chain priced TP/SL exits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop
    Run {
        /// Dry run mode (no transactions are submitted)
        #[arg(long)]
        dry_run: bool,
    },
    /// Show open positions
    Positions,
    /// Show recent trades
    Trades {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Manage the sender whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// Ask a running trader to liquidate everything
    SellAll,
    /// Ask a running trader to stop
    Stop,
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// List whitelist entries
    List,
    /// Authorize a sender address
    Add {
        address: String,
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Deauthorize a sender address
    Remove { address: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run } => run_trader(config, dry_run).await,
        Commands::Positions => show_positions(config).await,
        Commands::Trades { limit } => show_trades(config, limit).await,
        Commands::Whitelist { action } => manage_whitelist(config, action).await,
        Commands::SellAll => request_control(config, "sell-all").await,
        Commands::Stop => request_control(config, "stop").await,
    }
}

async fn run_trader(config: Config, dry_run: bool) -> anyhow::Result<()> {
    tracing::info!("starting autotrader");
    if dry_run {
        tracing::warn!("DRY RUN mode: no transactions will be submitted");
    }

    let private_key = config.private_key()?;
    let db = Database::connect(&config.database.path).await?;
    let registry = Arc::new(ChainRegistry::connect(&config.chains, &private_key, RPC_TIMEOUT).await?);

    let controls = ControlSignals::new();
    let status = dashboard::new_shared_status();
    *status.write().await = StatusSnapshot::initial(
        address_key(registry.wallet_address()),
        registry.iter().map(|c| c.name().to_string()).collect(),
    );

    // Flag-file bridge, kept for operator compatibility.
    tokio::spawn(run_flag_file_poller(
        controls.clone(),
        config.controls.clone(),
    ));

    if config.dashboard.enabled {
        let state = AppState {
            db: db.clone(),
            controls: controls.clone(),
            status: status.clone(),
        };
        let bind = config.dashboard.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(state, bind).await {
                tracing::error!(error = %e, "status API failed");
            }
        });
    }

    let trader = Trader::new(config, registry, db, controls, status, dry_run);
    trader.run().await?;
    Ok(())
}

async fn show_positions(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let positions = db.open_positions().await?;

    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<14} {:>14} {:>14} {:>14}",
        "Chain", "Symbol", "Status", "Entry", "TP", "SL"
    );
    println!("{}", "-".repeat(78));
    for p in positions {
        println!(
            "{:<10} {:<8} {:<14} {:>14} {:>14} {:>14}",
            p.chain_id,
            p.symbol,
            p.status.as_str(),
            p.entry_price.round_dp(6),
            p.take_profit_price().round_dp(6),
            p.stop_loss_price().round_dp(6),
        );
    }
    Ok(())
}

async fn show_trades(config: Config, limit: u32) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let trades = db.recent_trades(limit).await?;
    let total = db.total_pnl().await?;

    println!(
        "{:<22} {:<6} {:<8} {:>14} {:>14} {:>12}",
        "Time", "Side", "Symbol", "Price", "Amount", "PnL"
    );
    println!("{}", "-".repeat(80));
    for t in trades {
        println!(
            "{:<22} {:<6} {:<8} {:>14} {:>14} {:>12}",
            t.executed_at.format("%Y-%m-%d %H:%M:%S"),
            t.side.as_str(),
            t.symbol,
            t.price.round_dp(6),
            t.amount.round_dp(6),
            t.pnl.round_dp(4),
        );
    }
    println!("\nTotal PnL: ${total:.4}");
    Ok(())
}

async fn manage_whitelist(config: Config, action: WhitelistAction) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    match action {
        WhitelistAction::List => {
            let entries = db.whitelist_entries().await?;
            if entries.is_empty() {
                println!("Whitelist is empty.");
                return Ok(());
            }
            for e in entries {
                println!(
                    "{} {} {}",
                    address_key(e.address),
                    if e.active { "active" } else { "inactive" },
                    e.label.unwrap_or_default()
                );
            }
        }
        WhitelistAction::Add { address, label } => {
            let addr: Address = address.parse()?;
            db.add_whitelisted(addr, label.as_deref()).await?;
            println!("Whitelisted {}", address_key(addr));
        }
        WhitelistAction::Remove { address } => {
            let addr: Address = address.parse()?;
            db.remove_whitelisted(addr).await?;
            println!("Removed {}", address_key(addr));
        }
    }
    Ok(())
}

/// Stop / sell-all reach a running trader through its control API, with
/// the flag file as fallback when the API is unreachable.
async fn request_control(config: Config, action: &str) -> anyhow::Result<()> {
    let url = format!("http://{}/api/control/{}", config.dashboard.bind, action);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    match client.post(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("Requested {action} via {url}");
            return Ok(());
        }
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "control API refused the request");
        }
        Err(e) => {
            tracing::warn!(error = %e, "control API unreachable");
        }
    }

    let flag = match action {
        "stop" => config.controls.stop_flag.clone(),
        _ => config.controls.sell_all_flag.clone(),
    };
    match flag {
        Some(path) => {
            tokio::fs::write(&path, b"1").await?;
            println!("Raised {action} flag at {path}");
            Ok(())
        }
        None => anyhow::bail!("control API unreachable and no {action} flag configured"),
    }
}
