//! Exchange connection contract

use async_trait::async_trait;
use std::collections::BTreeSet;
use crate::errors::AggregatorResult;
use crate::events::Handler;
use crate::types::{ExchangeId, Quote, Symbol};

pub type QuoteHandler = Handler<Quote>;

/// One live market data connection to a single exchange.
///
/// Implementations own their transport task and deliver quotes to every
/// registered handler from that task. Handlers must return quickly.
#[async_trait]
pub trait ExchangeConnection: Send + Sync {
    fn exchange(&self) -> &ExchangeId;

    /// Open the transport. Calling it while connected is a no-op.
    async fn connect(&self) -> AggregatorResult<()>;

    /// Close the transport. Calling it while disconnected is a no-op.
    async fn disconnect(&self) -> AggregatorResult<()>;

    async fn subscribe_to_symbol(&self, symbol: &Symbol) -> AggregatorResult<()>;

    async fn unsubscribe_from_symbol(&self, symbol: &Symbol) -> AggregatorResult<()>;

    /// Register a quote consumer. Never fails; handlers accumulate.
    fn on_quote(&self, handler: QuoteHandler);

    /// Symbols this exchange can stream. An empty set means unrestricted.
    fn supported_symbols(&self) -> BTreeSet<Symbol>;

    fn subscribed_symbols(&self) -> BTreeSet<Symbol>;

    fn is_connected(&self) -> bool;
}
