//! Cross-exchange quote aggregator - Main Entry Point

use xarb_aggregator::*;
use xarb_aggregator::arbitrage::ArbitrageEngine;
use xarb_aggregator::exchange::DefaultConnectionFactory;
use xarb_aggregator::session::SessionManager;
use xarb_aggregator::storage::OpportunityJournal;
use xarb_aggregator::store::{InMemoryCredentialStore, NewCredential};
use xarb_aggregator::vault::CredentialVault;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = CONFIG.clone();

    // Initialize logging
    let _logging_guard = utils::setup_logging(config.json_logs)?;
    utils::setup_output_directories(config.record_opportunities)?;

    info!("🛰️  Cross-Exchange Quote Aggregator v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration:");
    info!("   User: {}", config.user_id);
    info!("   Symbols: {}", config.symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));
    info!("   Max updates/s per symbol: {}", config.max_updates_per_second);
    info!("   Stale after: {}s (checked every {}s)", config.stale_threshold_secs, config.health_check_interval_secs);
    info!("   Min spread: {}%", config.min_spread_percent);
    info!("   Fees: {} ({}% per leg + ${} network)", config.include_fees, config.trading_fee_percent, config.network_fee_usd);
    info!("   Only profitable: {}", config.only_profitable);
    info!("   Record opportunities: {}", config.record_opportunities);

    // Credential vault and store
    let master_secret = match &config.vault_master_key {
        Some(key) => Zeroizing::new(key.as_bytes().to_vec()),
        None => {
            warn!("⚠️  VAULT_MASTER_KEY not set, using an ephemeral key for this run");
            Zeroizing::new(rand::random::<[u8; 32]>().to_vec())
        }
    };
    let vault = Arc::new(CredentialVault::new(master_secret.as_slice()));
    vault.initialize_for_user(&config.user_id)?;

    let store = Arc::new(InMemoryCredentialStore::new());
    for credential in &config.credentials {
        store.add_credential(
            &vault,
            NewCredential {
                user_id: &config.user_id,
                exchange: credential.exchange.clone(),
                api_key: &credential.api_key,
                secret: &credential.secret,
                passphrase: credential.passphrase.as_deref(),
            },
        )?;
    }
    if config.credentials.is_empty() {
        warn!("⚠️  No exchange credentials configured (set <EXCHANGE>_API_KEY and <EXCHANGE>_API_SECRET)");
    }

    // Session and detection engine
    let factory = Arc::new(DefaultConnectionFactory::new(config.connection_settings()));
    let session = SessionManager::new(config.session_config(), Arc::clone(&vault), store, factory);
    let engine = ArbitrageEngine::new(config.arbitrage_policy());

    session.on_quote(engine.quote_handler());
    session.on_exchange_removed(engine.exchange_removed_handler());
    session.on_status_change(utils::print_status_change);
    session.on_error(|e: &SessionError| {
        error!(exchange = ?e.exchange, kind = ?e.kind, "❌ {}", e.message);
    });

    session.subscribe_to_symbols(&config.symbols).await;
    session.initialize(&config.user_id).await?;

    let active = session.active_exchanges().await;
    if active.len() < 2 {
        warn!("⚠️  {} exchange(s) connected; at least two are needed to detect arbitrage", active.len());
    }
    info!("✅ Connected exchanges: {:?}", active.iter().map(|e| e.as_str()).collect::<Vec<_>>());

    engine.start_auto_refresh();

    // Setup shutdown handler
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    let shutdown_tx = Arc::new(tokio::sync::Mutex::new(Some(shutdown_tx)));

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("\n📛 Received shutdown signal (Ctrl+C)...");
        if let Some(tx) = shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
    });

    info!("\n🚀 Streaming quotes...\n");

    let start_time = Instant::now();
    let mut journal = config
        .record_opportunities
        .then(|| OpportunityJournal::new(utils::OPPORTUNITY_DIR));
    let mut announced: HashSet<String> = HashSet::new();
    let mut interval = time::interval(REPORT_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let opportunities = engine.get_opportunities();

                for opportunity in &opportunities {
                    if announced.insert(opportunity.id.clone()) {
                        utils::print_arbitrage_opportunity(opportunity);
                    }
                }
                announced.retain(|id| opportunities.iter().any(|o| &o.id == id));

                if let Some(journal) = journal.as_mut() {
                    if let Err(e) = journal.record(&opportunities) {
                        error!("Failed to save arbitrage opportunities: {}", e);
                    }
                }

                utils::print_session_stats(
                    start_time,
                    &session.dispatch_stats(),
                    &session.connection_statuses(),
                    &opportunities,
                );
            }
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, exiting main loop...");
                break;
            }
        }
    }

    info!("\n🛑 Shutting down gracefully...");
    engine.stop_auto_refresh();
    session.cleanup().await;

    let final_opportunities = engine.get_opportunities();
    info!("Final statistics:");
    info!("   Total runtime: {:?}", start_time.elapsed());
    info!("   Quotes: {:?}", session.dispatch_stats());
    info!("   Open opportunities at shutdown: {}", final_opportunities.len());
    engine.clear();

    Ok(())
}
