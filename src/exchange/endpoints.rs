//! Static REST ticker descriptors for the built-in exchanges

use crate::types::Symbol;

/// Where and how to read a best bid/ask ticker over REST.
///
/// `{pair}` in `ticker_path` and in the JSON pointers is replaced with the
/// exchange-formatted pair.
#[derive(Debug)]
pub struct TickerEndpoint {
    pub base_url: &'static str,
    pub ping_path: &'static str,
    pub ticker_path: &'static str,
    pub pair_separator: &'static str,
    pub base_aliases: &'static [(&'static str, &'static str)],
    pub bid_pointer: &'static str,
    pub ask_pointer: &'static str,
    pub volume_pointer: Option<&'static str>,
    /// Volume is reported in base units and must be scaled by the mid price
    pub volume_in_base: bool,
    pub supported: &'static [&'static str],
}

impl TickerEndpoint {
    pub fn pair(&self, symbol: &Symbol) -> String {
        let alias = self
            .base_aliases
            .iter()
            .find(|(from, _)| *from == symbol.base())
            .map(|(_, to)| *to);

        match alias {
            Some(base) => symbol.rebased(base).joined(self.pair_separator),
            None => symbol.joined(self.pair_separator),
        }
    }

    pub fn ticker_url(&self, base_url: &str, symbol: &Symbol) -> String {
        format!("{}{}", base_url, self.ticker_path.replace("{pair}", &self.pair(symbol)))
    }

    pub fn ping_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url, self.ping_path)
    }

    pub fn pointer(&self, template: &str, symbol: &Symbol) -> String {
        template.replace("{pair}", &self.pair(symbol))
    }

    pub fn supports(&self, symbol: &Symbol) -> bool {
        self.supported.iter().any(|s| Symbol::new(s) == *symbol)
    }
}

const USDT_MAJORS: &[&str] = &[
    "BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT", "DOGE/USDT", "ADA/USDT", "LTC/USDT",
    "AVAX/USDT", "LINK/USDT", "DOT/USDT",
];

pub static BINANCE: TickerEndpoint = TickerEndpoint {
    base_url: "https://api.binance.com",
    ping_path: "/api/v3/ping",
    ticker_path: "/api/v3/ticker/24hr?symbol={pair}",
    pair_separator: "",
    base_aliases: &[],
    bid_pointer: "/bidPrice",
    ask_pointer: "/askPrice",
    volume_pointer: Some("/quoteVolume"),
    volume_in_base: false,
    supported: USDT_MAJORS,
};

pub static COINBASE: TickerEndpoint = TickerEndpoint {
    base_url: "https://api.exchange.coinbase.com",
    ping_path: "/time",
    ticker_path: "/products/{pair}/ticker",
    pair_separator: "-",
    base_aliases: &[],
    bid_pointer: "/bid",
    ask_pointer: "/ask",
    volume_pointer: Some("/volume"),
    volume_in_base: true,
    supported: &[
        "BTC/USD", "ETH/USD", "SOL/USD", "XRP/USD", "DOGE/USD", "ADA/USD", "LTC/USD",
        "BTC/USDT", "ETH/USDT", "SOL/USDT",
    ],
};

pub static KRAKEN: TickerEndpoint = TickerEndpoint {
    base_url: "https://api.kraken.com",
    ping_path: "/0/public/Time",
    ticker_path: "/0/public/Ticker?pair={pair}",
    pair_separator: "",
    base_aliases: &[("BTC", "XBT"), ("DOGE", "XDG")],
    bid_pointer: "/result/{pair}/b/0",
    ask_pointer: "/result/{pair}/a/0",
    volume_pointer: Some("/result/{pair}/v/1"),
    volume_in_base: true,
    supported: &[
        "BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT", "DOGE/USDT", "ADA/USDT",
        "BTC/USD", "ETH/USD", "SOL/USD",
    ],
};

pub static OKX: TickerEndpoint = TickerEndpoint {
    base_url: "https://www.okx.com",
    ping_path: "/api/v5/public/time",
    ticker_path: "/api/v5/market/ticker?instId={pair}",
    pair_separator: "-",
    base_aliases: &[],
    bid_pointer: "/data/0/bidPx",
    ask_pointer: "/data/0/askPx",
    volume_pointer: Some("/data/0/volCcy24h"),
    volume_in_base: false,
    supported: USDT_MAJORS,
};

pub static BYBIT: TickerEndpoint = TickerEndpoint {
    base_url: "https://api.bybit.com",
    ping_path: "/v5/market/time",
    ticker_path: "/v5/market/tickers?category=spot&symbol={pair}",
    pair_separator: "",
    base_aliases: &[],
    bid_pointer: "/result/list/0/bid1Price",
    ask_pointer: "/result/list/0/ask1Price",
    volume_pointer: Some("/result/list/0/turnover24h"),
    volume_in_base: false,
    supported: USDT_MAJORS,
};
