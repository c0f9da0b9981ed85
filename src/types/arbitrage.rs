//! Arbitrage opportunity types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::time::Duration;
use super::{ExchangeId, Symbol};

/// Shortest accepted auto-refresh period
pub const MIN_AUTO_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageOpportunity {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub from_exchange: ExchangeId,
    pub to_exchange: ExchangeId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub spread_amount: Decimal,
    pub spread_percent: Decimal,
    pub volume_24h: Decimal,
    pub estimated_profit: Decimal,
    pub fees: FeeBreakdown,
    pub net_profit: Decimal,
    pub profitable: bool,
    pub risk: RiskLevel,
}

impl ArbitrageOpportunity {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            from_exchange: self.from_exchange.clone(),
            to_exchange: self.to_exchange.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub trading_fees: Decimal,
    pub network_fees: Decimal,
}

impl FeeBreakdown {
    pub fn total(&self) -> Decimal {
        self.trading_fees + self.network_fees
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Directed opportunity key: buy on `from_exchange`, sell on `to_exchange`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpportunityKey {
    pub from_exchange: ExchangeId,
    pub to_exchange: ExchangeId,
    pub symbol: Symbol,
}

impl OpportunityKey {
    pub fn new(from: &ExchangeId, to: &ExchangeId, symbol: &Symbol) -> Self {
        Self {
            from_exchange: from.clone(),
            to_exchange: to.clone(),
            symbol: symbol.clone(),
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            from_exchange: self.to_exchange.clone(),
            to_exchange: self.from_exchange.clone(),
            symbol: self.symbol.clone(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.from_exchange, self.to_exchange, self.symbol)
    }
}

/// Detection policy for the arbitrage engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitragePolicy {
    pub min_spread_percent: Decimal,
    pub max_opportunities: usize,
    pub include_fees: bool,
    pub only_profitable: bool,
    /// Charged on each leg
    pub trading_fee_percent: Decimal,
    pub network_fee_usd: Decimal,
    pub auto_refresh_interval: Duration,
    pub enabled: bool,
}

impl Default for ArbitragePolicy {
    fn default() -> Self {
        Self {
            min_spread_percent: dec!(0.5),
            max_opportunities: 50,
            include_fees: true,
            only_profitable: false,
            trading_fee_percent: dec!(0.1),
            network_fee_usd: dec!(5),
            auto_refresh_interval: Duration::from_secs(5),
            enabled: true,
        }
    }
}

/// Partial policy change; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub min_spread_percent: Option<Decimal>,
    pub max_opportunities: Option<usize>,
    pub include_fees: Option<bool>,
    pub only_profitable: Option<bool>,
    pub trading_fee_percent: Option<Decimal>,
    pub network_fee_usd: Option<Decimal>,
    pub auto_refresh_interval: Option<Duration>,
    pub enabled: Option<bool>,
}

impl ArbitragePolicy {
    /// Apply a partial update. Returns true when inclusion criteria changed.
    pub fn apply(&mut self, update: &PolicyUpdate) -> bool {
        let before = self.clone();

        if let Some(v) = update.min_spread_percent {
            self.min_spread_percent = v.max(Decimal::ZERO);
        }
        if let Some(v) = update.max_opportunities {
            self.max_opportunities = v;
        }
        if let Some(v) = update.include_fees {
            self.include_fees = v;
        }
        if let Some(v) = update.only_profitable {
            self.only_profitable = v;
        }
        if let Some(v) = update.trading_fee_percent {
            self.trading_fee_percent = v.max(Decimal::ZERO);
        }
        if let Some(v) = update.network_fee_usd {
            self.network_fee_usd = v.max(Decimal::ZERO);
        }
        if let Some(v) = update.auto_refresh_interval {
            self.auto_refresh_interval = v.max(MIN_AUTO_REFRESH_INTERVAL);
        }
        if let Some(v) = update.enabled {
            self.enabled = v;
        }

        let mut comparable = before;
        comparable.auto_refresh_interval = self.auto_refresh_interval;
        comparable != *self
    }
}
