//! Transport-agnostic fallback connection

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use crate::errors::{AggregatorError, AggregatorResult};
use crate::events::Listeners;
use crate::types::{ExchangeId, Quote, Symbol};
use super::{ExchangeConnection, QuoteHandler};

/// Connection for exchanges without a built-in transport.
///
/// Quotes arrive through [`GenericConnection::ingest`] from whatever feed the
/// embedding application wires up; the connection only enforces lifecycle and
/// subscription state.
pub struct GenericConnection {
    exchange: ExchangeId,
    supported: BTreeSet<Symbol>,
    connected: AtomicBool,
    subscriptions: RwLock<BTreeSet<Symbol>>,
    listeners: Listeners<Quote>,
}

impl GenericConnection {
    pub fn new(exchange: impl Into<ExchangeId>) -> Self {
        Self {
            exchange: exchange.into(),
            supported: BTreeSet::new(),
            connected: AtomicBool::new(false),
            subscriptions: RwLock::new(BTreeSet::new()),
            listeners: Listeners::new(),
        }
    }

    pub fn with_supported_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.supported = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Deliver a quote to handlers. Returns false when it was dropped because
    /// the connection is closed or the symbol is not subscribed.
    pub fn ingest(&self, mut quote: Quote) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        if !self.subscriptions.read().contains(&quote.symbol) {
            return false;
        }
        quote.exchange = self.exchange.clone();
        self.listeners.emit(&quote);
        true
    }

    fn accepts(&self, symbol: &Symbol) -> bool {
        self.supported.is_empty() || self.supported.contains(symbol)
    }
}

#[async_trait]
impl ExchangeConnection for GenericConnection {
    fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    async fn connect(&self) -> AggregatorResult<()> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(exchange = %self.exchange, "Generic connection opened");
        }
        Ok(())
    }

    async fn disconnect(&self) -> AggregatorResult<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(exchange = %self.exchange, "Generic connection closed");
        }
        Ok(())
    }

    async fn subscribe_to_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        if !self.accepts(symbol) {
            return Err(AggregatorError::subscription(&self.exchange, symbol, "symbol not supported"));
        }
        if self.subscriptions.write().insert(symbol.clone()) {
            debug!(exchange = %self.exchange, %symbol, "Subscribed");
        }
        Ok(())
    }

    async fn unsubscribe_from_symbol(&self, symbol: &Symbol) -> AggregatorResult<()> {
        if self.subscriptions.write().remove(symbol) {
            debug!(exchange = %self.exchange, %symbol, "Unsubscribed");
        }
        Ok(())
    }

    fn on_quote(&self, handler: QuoteHandler) {
        self.listeners.subscribe_arc(handler);
    }

    fn supported_symbols(&self) -> BTreeSet<Symbol> {
        self.supported.clone()
    }

    fn subscribed_symbols(&self) -> BTreeSet<Symbol> {
        self.subscriptions.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
