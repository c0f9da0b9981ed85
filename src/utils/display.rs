//! Display and printing utilities

use std::time::Instant;
use tracing::{info, warn};
use crate::session::DispatchStatsSnapshot;
use crate::types::{ArbitrageOpportunity, ConnectionState, ConnectionStatus, RiskLevel};

pub fn print_session_stats(
    start_time: Instant,
    stats: &DispatchStatsSnapshot,
    statuses: &[ConnectionStatus],
    opportunities: &[ArbitrageOpportunity],
) {
    let runtime = start_time.elapsed().as_secs() / 60;
    let connected = statuses
        .iter()
        .filter(|s| s.state == ConnectionState::Connected)
        .count();
    let profitable = opportunities.iter().filter(|o| o.profitable).count();

    info!("\n📊 Session Statistics ({} minutes)", runtime);
    info!("   📡 QUOTES:");
    info!("     Received: {}", stats.received);
    info!("     Delivered: {}", stats.emitted);
    info!("     Coalesced: {}", stats.coalesced);
    info!("     Superseded (buffer full): {}", stats.dropped);
    info!("     Rejected (invalid): {}", stats.invalid);

    info!("   🔌 CONNECTIONS: {}/{} receiving quotes", connected, statuses.len());
    for status in statuses {
        info!(
            "     {:<10} {:<12} msgs={} reconnects={} last={}",
            status.exchange.as_str(),
            format!("{:?}", status.state),
            status.message_count,
            status.reconnect_attempts,
            status
                .last_message_time
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    info!("   📈 ARBITRAGE:");
    info!("     Open opportunities: {}", opportunities.len());
    info!("     Profitable after fees: {}", profitable);
    info!("");
}

pub fn print_arbitrage_opportunity(opportunity: &ArbitrageOpportunity) {
    let marker = match opportunity.risk {
        RiskLevel::Low => "🟢",
        RiskLevel::Medium => "🟡",
        RiskLevel::High => "🔴",
    };

    warn!("\n🎯 ARBITRAGE OPPORTUNITY {}", opportunity.id);
    warn!("📍 {}: buy {} → sell {}", opportunity.symbol, opportunity.from_exchange, opportunity.to_exchange);
    warn!("💰 Profit Analysis:");
    warn!("   Buy:    ${:.4}", opportunity.buy_price);
    warn!("   Sell:   ${:.4}", opportunity.sell_price);
    warn!("   Spread: ${:.4} ({:.3}%)", opportunity.spread_amount, opportunity.spread_percent);
    warn!("   Fees:   ${:.2} trading + ${:.2} network", opportunity.fees.trading_fees, opportunity.fees.network_fees);
    warn!("   Net:    ${:.2}{}", opportunity.net_profit, if opportunity.profitable { "" } else { " (unprofitable)" });
    warn!("{} Risk: {:?}, 24h volume ${:.0}", marker, opportunity.risk, opportunity.volume_24h);
}

pub fn print_status_change(status: &ConnectionStatus) {
    match status.state {
        ConnectionState::Connected => info!("🟢 {} connected ({} quotes)", status.exchange, status.message_count),
        ConnectionState::Stale => info!("🟡 {} waiting for quotes", status.exchange),
        ConnectionState::Disconnected => warn!(
            "🔴 {} silent since {}",
            status.exchange,
            status
                .last_message_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        ),
    }
}
