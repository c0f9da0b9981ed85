//! Quote types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use super::{ExchangeId, Symbol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
    pub volume_24h: Option<Decimal>,
}

impl Quote {
    pub fn new(
        exchange: impl Into<ExchangeId>,
        symbol: impl Into<Symbol>,
        bid: Decimal,
        ask: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            bid,
            ask,
            timestamp: Utc::now(),
            volume_24h: None,
        }
    }

    pub fn with_volume(mut self, volume_24h: Decimal) -> Self {
        self.volume_24h = Some(volume_24h);
        self
    }

    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }

    pub fn key(&self) -> QuoteKey {
        QuoteKey {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

/// Throttle and cache key for quotes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
}

impl std::fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}
