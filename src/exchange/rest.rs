//! REST ticker polling connection

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::errors::{AggregatorError, AggregatorResult};
use crate::events::Listeners;
use crate::network::{build_http_client, decimal_at, fetch_json, retry_with_backoff, RetryConfig};
use crate::types::{ExchangeId, Quote, Symbol};
use super::{ConnectionSettings, ExchangeConnection, QuoteHandler, TickerEndpoint};

/// Consecutive poll failures per symbol before the warning is repeated
const FAILURE_LOG_EVERY: u32 = 10;

struct PollShared {
    exchange: ExchangeId,
    endpoint: &'static TickerEndpoint,
    base_url: String,
    client: reqwest::Client,
    subscriptions: RwLock<BTreeSet<Symbol>>,
    listeners: Listeners<Quote>,
    consecutive_failures: AtomicU32,
}

/// Polls an exchange's public ticker endpoint for every subscribed symbol.
pub struct RestTickerConnection {
    shared: Arc<PollShared>,
    settings: ConnectionSettings,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RestTickerConnection {
    pub fn new(
        exchange: ExchangeId,
        endpoint: &'static TickerEndpoint,
        settings: ConnectionSettings,
    ) -> AggregatorResult<Self> {
        let client = build_http_client(settings.http_timeout)?;
        let base_url = settings
            .base_url_override
            .clone()
            .unwrap_or_else(|| endpoint.base_url.to_string());

        Ok(Self {
            shared: Arc::new(PollShared {
                exchange,
                endpoint,
                base_url,
                client,
                subscriptions: RwLock::new(BTreeSet::new()),
                listeners: Listeners::new(),
                consecutive_failures: AtomicU32::new(0),
            }),
            settings,
            poller: Mutex::new(None),
        })
    }

    fn poller_running(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl PollShared {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote> {
        let url = self.endpoint.ticker_url(&self.base_url, symbol);
        let json = fetch_json(&self.client, &url).await?;

        let bid = decimal_at(&json, &self.endpoint.pointer(self.endpoint.bid_pointer, symbol))?;
        let ask = decimal_at(&json, &self.endpoint.pointer(self.endpoint.ask_pointer, symbol))?;
        let mut volume = match self.endpoint.volume_pointer {
            Some(pointer) => decimal_at(&json, &self.endpoint.pointer(pointer, symbol)).ok(),
            None => None,
        };

        let mut quote = Quote {
            exchange: self.exchange.clone(),
            symbol: symbol.clone(),
            bid,
            ask,
            timestamp: Utc::now(),
            volume_24h: None,
        };
        if self.endpoint.volume_in_base {
            volume = volume.map(|v| v * quote.mid_price());
        }
        quote.volume_24h = volume;
        Ok(quote)
    }

    async fn poll_once(&self) {
        let symbols: Vec<Symbol> = self.subscriptions.read().iter().cloned().collect();
        for symbol in symbols {
            match self.fetch_quote(&symbol).await {
                Ok(quote) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.listeners.emit(&quote);
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    if failures % FAILURE_LOG_EVERY == 0 {
                        warn!(exchange = %self.exchange, %symbol, "⚠️ Ticker poll failed: {:#}", e);
                    } else {
                        debug!(exchange = %self.exchange, %symbol, "Ticker poll failed: {:#}", e);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ExchangeConnection for RestTickerConnection {
    fn exchange(&self) -> &ExchangeId {
        &self.shared.exchange
    }

    async fn connect(&self) -> AggregatorResult<()> {
        if self.poller_running() {
            return Ok(());
        }

        let ping_url = self.shared.endpoint.ping_url(&self.shared.base_url);
        let client = self.shared.client.clone();
        retry_with_backoff(
            || {
                let client = client.clone();
                let url = ping_url.clone();
                async move { fetch_json(&client, &url).await.map(|_| ()) }
            },
            &RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(250),
                ..Default::default()
            },
            &format!("{} ping", self.shared.exchange),
        )
        .await
        .map_err(|e| AggregatorError::ConnectionInit {
            exchange: self.shared.exchange.clone(),
            message: "exchange unreachable".to_string(),
            source: Some(e.into()),
        })?;

        {
            let mut poller = self.poller.lock();
            if poller.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
                return Ok(());
            }

            let shared = Arc::clone(&self.shared);
            let poll_interval = self.settings.poll_interval;
            *poller = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    shared.poll_once().await;
                }
            }));
        }

        info!(exchange = %self.shared.exchange, url = %self.shared.base_url, "✅ Connected");
        Ok(())
    }

    async fn disconnect(&self) -> AggregatorResult<()> {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            info!(exchange = %self.shared.exchange, "Disconnected");
        }
        Ok(())
    }

    async fn subscribe_to_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        if !self.shared.endpoint.supports(symbol) {
            return Err(AggregatorError::subscription(
                &self.shared.exchange,
                symbol,
                "symbol not listed on exchange",
            ));
        }
        self.shared.subscriptions.write().insert(symbol.clone());
        Ok(())
    }

    async fn unsubscribe_from_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        self.shared.subscriptions.write().remove(symbol);
        Ok(())
    }

    fn on_quote(&self, handler: QuoteHandler) {
        self.shared.listeners.subscribe_arc(handler);
    }

    fn supported_symbols(&self) -> BTreeSet<Symbol> {
        self.shared.endpoint.supported.iter().map(|s| Symbol::new(s)).collect()
    }

    fn subscribed_symbols(&self) -> BTreeSet<Symbol> {
        self.shared.subscriptions.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.poller_running()
    }
}

impl Drop for RestTickerConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}
