//! Scripted [`ExchangeConnection`] and [`ConnectionFactory`] doubles.
//!
//! - [`MockConnection`] records every lifecycle call and lets the test push
//!   quotes through [`MockConnection::emit`].
//! - [`MockFactory`] keeps the most recent connection per exchange and can be
//!   told to fail construction, connect or individual subscriptions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use xarb_aggregator::errors::{AggregatorError, AggregatorResult};
use xarb_aggregator::events::Listeners;
use xarb_aggregator::exchange::{ConnectionFactory, ExchangeConnection, QuoteHandler};
use xarb_aggregator::types::{DecryptedCredential, ExchangeId, Quote, Symbol};

pub struct MockConnection {
    exchange: ExchangeId,
    connected: AtomicBool,
    subscriptions: Mutex<BTreeSet<Symbol>>,
    listeners: Listeners<Quote>,
    fail_connect: AtomicBool,
    failing_symbols: Mutex<HashSet<Symbol>>,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    subscribe_calls: Mutex<Vec<Symbol>>,
}

impl MockConnection {
    pub fn new(exchange: ExchangeId, failing_symbols: HashSet<Symbol>, fail_connect: bool) -> Self {
        Self {
            exchange,
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(BTreeSet::new()),
            listeners: Listeners::new(),
            fail_connect: AtomicBool::new(fail_connect),
            failing_symbols: Mutex::new(failing_symbols),
            connect_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
            subscribe_calls: Mutex::new(Vec::new()),
        }
    }

    /// Push a quote the way a live feed would: only while connected and
    /// subscribed. Returns whether it reached the handlers.
    pub fn emit(&self, symbol: &str, bid: Decimal, ask: Decimal) -> bool {
        let quote = Quote::new(self.exchange.clone(), symbol, bid, ask);
        if !self.is_connected() || !self.subscriptions.lock().contains(&quote.symbol) {
            return false;
        }
        self.listeners.emit(&quote);
        true
    }

    /// Push a quote straight to the handlers, ignoring connection state.
    pub fn force_emit(&self, quote: Quote) {
        self.listeners.emit(&quote);
    }

    /// Make later subscriptions to `symbol` fail
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing_symbols.lock().insert(Symbol::new(symbol));
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self, symbol: &str) -> usize {
        let symbol = Symbol::new(symbol);
        self.subscribe_calls.lock().iter().filter(|s| **s == symbol).count()
    }

    pub fn handler_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl ExchangeConnection for MockConnection {
    fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    async fn connect(&self) -> AggregatorResult<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AggregatorError::connection_init(&self.exchange, "scripted connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> AggregatorResult<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_to_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        self.subscribe_calls.lock().push(symbol.clone());
        if self.failing_symbols.lock().contains(symbol) {
            return Err(AggregatorError::subscription(&self.exchange, symbol, "scripted subscribe failure"));
        }
        self.subscriptions.lock().insert(symbol.clone());
        Ok(())
    }

    async fn unsubscribe_from_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        self.subscriptions.lock().remove(symbol);
        Ok(())
    }

    fn on_quote(&self, handler: QuoteHandler) {
        self.listeners.subscribe_arc(handler);
    }

    fn supported_symbols(&self) -> BTreeSet<Symbol> {
        BTreeSet::new()
    }

    fn subscribed_symbols(&self) -> BTreeSet<Symbol> {
        self.subscriptions.lock().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockFactory {
    built: Mutex<HashMap<ExchangeId, Arc<MockConnection>>>,
    build_count: AtomicU32,
    failing_build: Mutex<HashSet<ExchangeId>>,
    failing_connect: Mutex<HashSet<ExchangeId>>,
    failing_symbols: Mutex<HashMap<ExchangeId, HashSet<Symbol>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build(&self, exchange: &str) {
        self.failing_build.lock().insert(ExchangeId::new(exchange));
    }

    pub fn fail_connect(&self, exchange: &str) {
        self.failing_connect.lock().insert(ExchangeId::new(exchange));
    }

    pub fn fail_symbol(&self, exchange: &str, symbol: &str) {
        self.failing_symbols
            .lock()
            .entry(ExchangeId::new(exchange))
            .or_default()
            .insert(Symbol::new(symbol));
    }

    /// Latest connection built for `exchange`
    pub fn connection(&self, exchange: &str) -> Arc<MockConnection> {
        self.built
            .lock()
            .get(&ExchangeId::new(exchange))
            .cloned()
            .unwrap_or_else(|| panic!("no connection built for {}", exchange))
    }

    pub fn try_connection(&self, exchange: &str) -> Option<Arc<MockConnection>> {
        self.built.lock().get(&ExchangeId::new(exchange)).cloned()
    }

    pub fn build_count(&self) -> u32 {
        self.build_count.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    fn create(
        &self,
        exchange: &ExchangeId,
        credential: &DecryptedCredential,
    ) -> AggregatorResult<Arc<dyn ExchangeConnection>> {
        self.build_count.fetch_add(1, Ordering::SeqCst);
        assert!(!credential.api_key.is_empty(), "credential reached the factory undecrypted");

        if self.failing_build.lock().contains(exchange) {
            return Err(AggregatorError::connection_init(exchange, "scripted build failure"));
        }

        let connection = Arc::new(MockConnection::new(
            exchange.clone(),
            self.failing_symbols.lock().get(exchange).cloned().unwrap_or_default(),
            self.failing_connect.lock().contains(exchange),
        ));
        self.built.lock().insert(exchange.clone(), Arc::clone(&connection));
        Ok(connection)
    }
}
