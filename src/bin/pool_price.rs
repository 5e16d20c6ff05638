//! One-shot pool price check
//!
//! Discovers (or reuses) the canonical pool for a token and prints the
//! current on-chain price, using the same read path the monitor uses.

use autotrader::{
    chain::ChainRegistry,
    config::Config,
    discovery::PoolDiscovery,
    pricing::PoolPriceReader,
    storage::Database,
};
use clap::Parser;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pool_price")]
#[command(about = "Read a token's current pool price on-chain")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Chain id the token lives on
    #[arg(long)]
    chain: u64,

    /// Token address
    token: String,
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
    let token: Address = cli.token.parse()?;

    let private_key = config.private_key()?;
    let db = Database::connect(&config.database.path).await?;
    let registry = Arc::new(
        ChainRegistry::connect(&config.chains, &private_key, Duration::from_secs(15)).await?,
    );

    let ctx = registry.get(cli.chain)?;
    let discovery = PoolDiscovery::new(db.clone());
    let pool = match discovery.canonical_pool(ctx, token).await? {
        Some(pool) => pool,
        None => anyhow::bail!("no pool discovered for {} on chain {}", cli.token, cli.chain),
    };

    println!(
        "Pool: {:#x} ({} quote, fee {})",
        pool.pool_address,
        pool.quote_token.as_str(),
        pool.fee_tier
    );

    let (_, _, decimals) = ctx.token_balance(token).await?;
    let pricing = PoolPriceReader::new(registry.clone(), db, Duration::from_secs(0));
    let price = pricing
        .token_usd_price(cli.chain, token, decimals, &pool)
        .await?;
    println!("Price: ${price}");

    Ok(())
}
