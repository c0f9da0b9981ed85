//! Exchange and symbol identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an exchange, always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(id: impl Into<String>) -> Self {
        ExchangeId(id.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        ExchangeId::new(s)
    }
}

impl From<String> for ExchangeId {
    fn from(s: String) -> Self {
        ExchangeId::new(s)
    }
}

/// A trading pair in canonical `BASE/QUOTE` form.
///
/// Accepts `btc/usdt`, `BTC-USDT` and `btc_usdt` on input. Concatenated
/// forms such as `BTCUSDT` are kept as-is since the split point is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        let normalized = symbol
            .as_ref()
            .trim()
            .to_uppercase()
            .replace(['-', '_'], "/");
        Symbol(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn quote(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, quote)| quote)
    }

    /// Same quote asset under a different base name (`BTC/USD` as `XBT/USD`).
    pub fn rebased(&self, base: &str) -> Symbol {
        match self.quote() {
            Some(quote) => Symbol(format!("{}/{}", base, quote)),
            None => self.clone(),
        }
    }

    /// Render the pair with an exchange-specific separator (`""` for `BTCUSDT`).
    pub fn joined(&self, separator: &str) -> String {
        match self.quote() {
            Some(quote) => format!("{}{}{}", self.base(), separator, quote),
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}
