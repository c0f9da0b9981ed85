//! Exchange connection factory.
//!
//! Maps an exchange id onto a concrete [`ExchangeConnection`]. The registry is
//! static: every built-in exchange is an [`ExchangeKind`] variant and anything
//! else falls through to [`ExchangeKind::Generic`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use crate::errors::{AggregatorError, AggregatorResult};
use crate::types::{DecryptedCredential, ExchangeId};
use super::{
    ExchangeConnection, GenericConnection, RestTickerConnection, TickerEndpoint, BINANCE, BYBIT,
    COINBASE, KRAKEN, OKX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Binance,
    Coinbase,
    Kraken,
    Okx,
    Bybit,
    Generic,
}

impl ExchangeKind {
    pub const BUILT_IN: [ExchangeKind; 5] = [
        ExchangeKind::Binance,
        ExchangeKind::Coinbase,
        ExchangeKind::Kraken,
        ExchangeKind::Okx,
        ExchangeKind::Bybit,
    ];

    pub fn from_id(exchange: &ExchangeId) -> Self {
        match exchange.as_str() {
            "binance" => ExchangeKind::Binance,
            "coinbase" => ExchangeKind::Coinbase,
            "kraken" => ExchangeKind::Kraken,
            "okx" => ExchangeKind::Okx,
            "bybit" => ExchangeKind::Bybit,
            _ => ExchangeKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Binance => "binance",
            ExchangeKind::Coinbase => "coinbase",
            ExchangeKind::Kraken => "kraken",
            ExchangeKind::Okx => "okx",
            ExchangeKind::Bybit => "bybit",
            ExchangeKind::Generic => "generic",
        }
    }

    pub fn endpoint(&self) -> Option<&'static TickerEndpoint> {
        match self {
            ExchangeKind::Binance => Some(&BINANCE),
            ExchangeKind::Coinbase => Some(&COINBASE),
            ExchangeKind::Kraken => Some(&KRAKEN),
            ExchangeKind::Okx => Some(&OKX),
            ExchangeKind::Bybit => Some(&BYBIT),
            ExchangeKind::Generic => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// Replaces every endpoint's base URL, for local mocks
    pub base_url_override: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(5),
            base_url_override: None,
        }
    }
}

/// Builds one connection per exchange from a borrowed credential.
///
/// Implementations must not retain the credential.
pub trait ConnectionFactory: Send + Sync {
    fn create(
        &self,
        exchange: &ExchangeId,
        credential: &DecryptedCredential,
    ) -> AggregatorResult<Arc<dyn ExchangeConnection>>;
}

pub struct DefaultConnectionFactory {
    settings: ConnectionSettings,
    generic: Mutex<HashMap<ExchangeId, Arc<GenericConnection>>>,
}

impl DefaultConnectionFactory {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            generic: Mutex::new(HashMap::new()),
        }
    }

    /// Most recently built generic connection for `exchange`, used to feed it quotes.
    pub fn generic_handle(&self, exchange: &ExchangeId) -> Option<Arc<GenericConnection>> {
        self.generic.lock().get(exchange).cloned()
    }
}

impl ConnectionFactory for DefaultConnectionFactory {
    fn create(
        &self,
        exchange: &ExchangeId,
        credential: &DecryptedCredential,
    ) -> AggregatorResult<Arc<dyn ExchangeConnection>> {
        if credential.api_key.trim().is_empty() {
            return Err(AggregatorError::connection_init(exchange, "empty API key"));
        }

        let kind = ExchangeKind::from_id(exchange);
        debug!(%exchange, kind = kind.as_str(), "Building connection");

        match kind.endpoint() {
            Some(endpoint) => {
                let connection =
                    RestTickerConnection::new(exchange.clone(), endpoint, self.settings.clone())?;
                Ok(Arc::new(connection))
            }
            None => {
                let connection = Arc::new(GenericConnection::new(exchange.clone()));
                self.generic
                    .lock()
                    .insert(exchange.clone(), Arc::clone(&connection));
                Ok(connection)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(api_key: &str) -> DecryptedCredential {
        DecryptedCredential {
            api_key: api_key.to_string(),
            secret: "s".to_string(),
            passphrase: None,
        }
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(ExchangeKind::from_id(&ExchangeId::new("Kraken")), ExchangeKind::Kraken);
        assert_eq!(ExchangeKind::from_id(&ExchangeId::new("acme")), ExchangeKind::Generic);
        assert!(ExchangeKind::Generic.endpoint().is_none());
        for kind in ExchangeKind::BUILT_IN {
            assert_eq!(ExchangeKind::from_id(&ExchangeId::new(kind.as_str())), kind);
        }
    }

    #[tokio::test]
    async fn test_builds_rest_and_generic_connections() {
        let factory = DefaultConnectionFactory::new(ConnectionSettings::default());

        let okx = factory.create(&ExchangeId::new("okx"), &credential("k")).unwrap();
        assert_eq!(okx.exchange().as_str(), "okx");
        assert!(!okx.supported_symbols().is_empty());

        let acme = ExchangeId::new("acme");
        let generic = factory.create(&acme, &credential("k")).unwrap();
        assert!(generic.supported_symbols().is_empty());
        assert!(factory.generic_handle(&acme).is_some());
    }

    #[test]
    fn test_rejects_empty_api_key() {
        let factory = DefaultConnectionFactory::new(ConnectionSettings::default());
        let err = factory
            .create(&ExchangeId::new("binance"), &credential("  "))
            .err()
            .unwrap();
        assert!(matches!(err, AggregatorError::ConnectionInit { .. }));
    }
}
