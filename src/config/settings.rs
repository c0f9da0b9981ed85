//! Aggregator configuration settings and environment variable handling

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use crate::exchange::{ConnectionSettings, ExchangeKind};
use crate::health::HealthConfig;
use crate::session::SessionConfig;
use crate::types::{ArbitragePolicy, ExchangeId, Symbol, MIN_AUTO_REFRESH_INTERVAL};

// Fan-out constants
pub const DEFAULT_MAX_UPDATES_PER_SECOND: u32 = 5;
pub const MAX_UPDATES_PER_SECOND: u32 = 100;
pub const DEFAULT_DISPATCH_BUFFER: usize = 4096;

// Health monitor constants
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

// Polling connection constants
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const MIN_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;

// Arbitrage constants
pub const MAX_OPPORTUNITIES: usize = 500;
pub const MAX_TRADING_FEE_PERCENT: Decimal = dec!(5);

pub const DEFAULT_SYMBOLS: &str = "BTC/USDT,ETH/USDT";

/// Credential material supplied through the environment for one exchange
#[derive(Clone)]
pub struct EnvCredential {
    pub exchange: ExchangeId,
    pub api_key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for EnvCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredential")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub user_id: String,
    pub vault_master_key: Option<String>,
    pub symbols: Vec<Symbol>,
    // Fan-out
    pub max_updates_per_second: u32,
    pub dispatch_buffer: usize,
    // Health
    pub health_check_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub reconnect_delay_ms: u64,
    // Polling connections
    pub poll_interval_ms: u64,
    pub http_timeout_secs: u64,
    // Arbitrage policy
    pub min_spread_percent: Decimal,
    pub max_opportunities: usize,
    pub include_fees: bool,
    pub only_profitable: bool,
    pub trading_fee_percent: Decimal,
    pub network_fee_usd: Decimal,
    pub auto_refresh_interval_ms: u64,
    pub arbitrage_enabled: bool,
    // Output
    pub record_opportunities: bool,
    pub json_logs: bool,
    pub credentials: Vec<EnvCredential>,
}

impl Config {
    pub fn load() -> Self {
        Self {
            user_id: env::var("ARB_USER_ID").unwrap_or_else(|_| "local".to_string()),
            vault_master_key: env::var("VAULT_MASTER_KEY").ok().filter(|k| !k.is_empty()),
            symbols: parse_symbols(
                &env::var("ARB_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
            ),
            max_updates_per_second: env::var("MAX_UPDATES_PER_SECOND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPDATES_PER_SECOND)
                .clamp(1, MAX_UPDATES_PER_SECOND),
            dispatch_buffer: env::var("DISPATCH_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DISPATCH_BUFFER)
                .max(16),
            health_check_interval_secs: env::var("HEALTH_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS)
                .max(1),
            stale_threshold_secs: env::var("STALE_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STALE_THRESHOLD_SECS)
                .max(1),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(MIN_POLL_INTERVAL_MS),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
                .max(1),
            min_spread_percent: env::var("MIN_SPREAD_PERCENT")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(0.5))
                .max(Decimal::ZERO),
            max_opportunities: env::var("MAX_OPPORTUNITIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50)
                .min(MAX_OPPORTUNITIES),
            include_fees: env::var("INCLUDE_FEES")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            only_profitable: env::var("ONLY_PROFITABLE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            trading_fee_percent: env::var("TRADING_FEE_PERCENT")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(0.1))
                .max(Decimal::ZERO)
                .min(MAX_TRADING_FEE_PERCENT),
            network_fee_usd: env::var("NETWORK_FEE_USD")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or(dec!(5))
                .max(Decimal::ZERO),
            auto_refresh_interval_ms: env::var("AUTO_REFRESH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000)
                .max(MIN_AUTO_REFRESH_INTERVAL.as_millis() as u64),
            arbitrage_enabled: env::var("ARBITRAGE_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            record_opportunities: env::var("RECORD_OPPORTUNITIES")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            json_logs: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            credentials: load_env_credentials(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_updates_per_second: self.max_updates_per_second,
            dispatch_buffer: self.dispatch_buffer,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            health: self.health_config(),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_secs(self.health_check_interval_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            base_url_override: None,
        }
    }

    pub fn arbitrage_policy(&self) -> ArbitragePolicy {
        ArbitragePolicy {
            min_spread_percent: self.min_spread_percent,
            max_opportunities: self.max_opportunities,
            include_fees: self.include_fees,
            only_profitable: self.only_profitable,
            trading_fee_percent: self.trading_fee_percent,
            network_fee_usd: self.network_fee_usd,
            auto_refresh_interval: Duration::from_millis(self.auto_refresh_interval_ms),
            enabled: self.arbitrage_enabled,
        }
    }
}

pub fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(Symbol::new) {
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Reads `<EXCHANGE>_API_KEY` / `_API_SECRET` / `_API_PASSPHRASE` for every
/// built-in exchange plus any listed in `EXTRA_EXCHANGES`.
fn load_env_credentials() -> Vec<EnvCredential> {
    let mut names: Vec<String> = ExchangeKind::BUILT_IN
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect();
    if let Ok(extra) = env::var("EXTRA_EXCHANGES") {
        names.extend(extra.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()));
    }

    names
        .into_iter()
        .filter_map(|name| {
            let prefix = name.to_uppercase().replace('-', "_");
            let api_key = env::var(format!("{}_API_KEY", prefix)).ok()?;
            let secret = env::var(format!("{}_API_SECRET", prefix)).ok()?;
            let passphrase = env::var(format!("{}_API_PASSPHRASE", prefix)).ok();
            Some(EnvCredential {
                exchange: ExchangeId::new(name),
                api_key,
                secret,
                passphrase,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        let symbols = parse_symbols(" btc-usdt, ETH/USDT ,,eth/usdt");
        assert_eq!(symbols, vec![Symbol::new("BTC/USDT"), Symbol::new("ETH/USDT")]);
    }

    #[test]
    fn test_component_configs() {
        let config = Config::load();
        let session = config.session_config();
        assert!(session.max_updates_per_second >= 1);
        assert_eq!(session.health.check_interval, Duration::from_secs(config.health_check_interval_secs));
        assert_eq!(config.arbitrage_policy().max_opportunities, config.max_opportunities);
    }
}
