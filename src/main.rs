use alloy::providers::ProviderBuilder;
use tracing_subscriber::EnvFilter;

use evlog_indexer::abi::EventRegistry;
use evlog_indexer::config::Config;
use evlog_indexer::db;
use evlog_indexer::indexer::fetcher::RpcLogSource;
use evlog_indexer::indexer::sync::run_sync;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("Event log indexer starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        contracts = config.contracts.len(),
        to_block = config.rpc.to_block,
        "Configuration loaded from {}",
        config_path
    );

    // Interface descriptions are a configuration concern; resolve them fully
    // before touching the network so a bad ABI aborts with no ledger writes.
    let registry = EventRegistry::build(&config.contracts)?;
    tracing::info!(
        addresses = registry.addresses().count(),
        "Event schema registry built"
    );

    let pool = db::connect(&config.database.path).await?;
    tracing::info!(path = %config.database.path, "SQLite store ready");

    let provider = ProviderBuilder::new().connect_http(
        config
            .rpc
            .url
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );
    let source = RpcLogSource::new(provider);

    let report = run_sync(&source, &pool, &registry, &config).await?;

    tracing::info!(
        fetched = report.fetched,
        decoded = report.decoded,
        inserted = report.inserted,
        anomalies = report.anomalies.len(),
        "Run complete"
    );

    Ok(())
}
