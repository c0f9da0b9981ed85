//! Per-user session over a set of exchange connections

use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::errors::{AggregatorError, AggregatorResult, SessionError};
use crate::events::{ListenerId, Listeners};
use crate::exchange::{ConnectionFactory, ExchangeConnection, QuoteHandler};
use crate::health::{HealthConfig, HealthMonitor, StaleConnection};
use crate::store::CredentialStore;
use crate::types::{Credential, CredentialId, ConnectionStatus, ExchangeId, Quote, Symbol};
use crate::vault::CredentialVault;
use super::{DispatchStats, DispatchStatsSnapshot, QuoteDispatcher};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_updates_per_second: u32,
    pub dispatch_buffer: usize,
    pub reconnect_delay: Duration,
    pub health: HealthConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_updates_per_second: 5,
            dispatch_buffer: 4096,
            reconnect_delay: Duration::from_secs(1),
            health: HealthConfig::default(),
        }
    }
}

struct ActiveConnection {
    credential_id: CredentialId,
    connection: Arc<dyn ExchangeConnection>,
    symbols: BTreeSet<Symbol>,
}

#[derive(Default)]
struct SessionState {
    user_id: Option<String>,
    connections: BTreeMap<ExchangeId, ActiveConnection>,
    tracked_symbols: BTreeSet<Symbol>,
    dispatcher: Option<QuoteDispatcher>,
    health_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    vault: Arc<CredentialVault>,
    store: Arc<dyn CredentialStore>,
    factory: Arc<dyn ConnectionFactory>,
    health: Arc<HealthMonitor>,
    quote_listeners: Arc<Listeners<Quote>>,
    error_listeners: Listeners<SessionError>,
    removed_listeners: Listeners<ExchangeId>,
    stats: Arc<DispatchStats>,
    /// Bumped whenever the connection set is rebuilt or torn down; results of
    /// work started under an older generation are discarded.
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

/// Owns the live connections for one user and fans their quotes out.
///
/// The session state lock is never held across a network call. Connect,
/// disconnect and subscribe fan out across exchanges in parallel, and a
/// failure on one exchange is reported on the error channel without
/// affecting the others.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        vault: Arc<CredentialVault>,
        store: Arc<dyn CredentialStore>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                vault,
                store,
                factory,
                health,
                quote_listeners: Arc::new(Listeners::new()),
                error_listeners: Listeners::new(),
                removed_listeners: Listeners::new(),
                stats: Arc::new(DispatchStats::default()),
                generation: AtomicU64::new(0),
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub async fn initialize(&self, user_id: &str) -> AggregatorResult<()> {
        let inner = &self.inner;
        let (generation, sink) = {
            let mut state = inner.state.lock().await;
            if let Some(current) = &state.user_id {
                return Err(AggregatorError::AlreadyInitialized { user_id: current.clone() });
            }

            inner.vault.initialize_for_user(user_id).map_err(|e| AggregatorError::CredentialStore {
                message: "vault initialization failed".to_string(),
                source: Some(e.into()),
            })?;

            inner.health.clear();
            inner.stats.reset();
            let dispatcher = QuoteDispatcher::spawn(
                inner.config.max_updates_per_second,
                inner.config.dispatch_buffer,
                Arc::clone(&inner.quote_listeners),
                Arc::clone(&inner.health),
                Arc::clone(&inner.stats),
            );
            let sink = dispatcher.quote_handler();
            state.dispatcher = Some(dispatcher);
            state.user_id = Some(user_id.to_string());
            (inner.generation.fetch_add(1, Ordering::SeqCst) + 1, sink)
        };

        info!(user_id, "🚀 Initializing session");
        inner.build_connections(generation, user_id, sink).await;

        let mut state = inner.state.lock().await;
        if inner.generation.load(Ordering::SeqCst) == generation {
            state.health_task = Some(inner.spawn_health_sweep());
            info!(
                user_id,
                exchanges = state.connections.len(),
                "✅ Session ready"
            );
        }
        Ok(())
    }

    /// Disconnect every connection and rebuild from the current credential set.
    pub async fn refresh_adapters(&self) -> AggregatorResult<()> {
        let inner = &self.inner;
        let (generation, user_id, sink, old) = {
            let mut state = inner.state.lock().await;
            let user_id = state.user_id.clone().ok_or(AggregatorError::NotInitialized)?;
            let sink = state
                .dispatcher
                .as_ref()
                .map(|d| d.quote_handler())
                .ok_or(AggregatorError::NotInitialized)?;
            let old = std::mem::take(&mut state.connections);
            (inner.generation.fetch_add(1, Ordering::SeqCst) + 1, user_id, sink, old)
        };

        info!(user_id = %user_id, "🔄 Refreshing exchange connections");
        let previous: Vec<ExchangeId> = old.keys().cloned().collect();
        for exchange in &previous {
            inner.health.unregister(exchange);
        }
        inner.disconnect_all(old.into_values().map(|c| c.connection).collect()).await;
        inner.build_connections(generation, &user_id, sink).await;

        let gone: Vec<ExchangeId> = {
            let state = inner.state.lock().await;
            previous
                .into_iter()
                .filter(|exchange| !state.connections.contains_key(exchange))
                .collect()
        };
        for exchange in &gone {
            info!(%exchange, "Exchange left the session");
            inner.removed_listeners.emit(exchange);
        }
        Ok(())
    }

    /// Stop delivery, disconnect everything and forget the user. Idempotent.
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        let (dispatcher, health_task, connections) = {
            let mut state = inner.state.lock().await;
            inner.generation.fetch_add(1, Ordering::SeqCst);
            state.user_id = None;
            state.tracked_symbols.clear();
            (
                state.dispatcher.take(),
                state.health_task.take(),
                std::mem::take(&mut state.connections),
            )
        };

        if let Some(task) = health_task {
            task.abort();
            let _ = task.await;
        }
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop().await;
        }

        let exchanges: Vec<ExchangeId> = connections.keys().cloned().collect();
        inner
            .disconnect_all(connections.into_values().map(|c| c.connection).collect())
            .await;
        inner.health.clear();
        inner.vault.reset();
        for exchange in &exchanges {
            inner.removed_listeners.emit(exchange);
        }
        info!(connections = exchanges.len(), "🛑 Session cleaned up");
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.user_id.is_some()
    }

    pub async fn active_exchanges(&self) -> Vec<ExchangeId> {
        self.inner.state.lock().await.connections.keys().cloned().collect()
    }

    pub async fn tracked_symbols(&self) -> BTreeSet<Symbol> {
        self.inner.state.lock().await.tracked_symbols.clone()
    }

    /// Symbols currently subscribed on `exchange`
    pub async fn exchange_symbols(&self, exchange: &ExchangeId) -> BTreeSet<Symbol> {
        self.inner
            .state
            .lock()
            .await
            .connections
            .get(exchange)
            .map(|c| c.symbols.clone())
            .unwrap_or_default()
    }

    pub fn connection_statuses(&self) -> Vec<ConnectionStatus> {
        self.inner.health.statuses()
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub async fn subscribe_to_symbol(&self, symbol: impl Into<Symbol>) {
        self.subscribe_to_symbols(&[symbol.into()]).await;
    }

    pub async fn unsubscribe_from_symbol(&self, symbol: impl Into<Symbol>) {
        self.unsubscribe_from_symbols(&[symbol.into()]).await;
    }

    /// Track `symbols` and subscribe them on every live connection. Symbols
    /// tracked before `initialize` are applied when connections come up.
    pub async fn subscribe_to_symbols(&self, symbols: &[Symbol]) {
        let inner = &self.inner;
        let (generation, targets) = {
            let mut state = inner.state.lock().await;
            state.tracked_symbols.extend(symbols.iter().cloned());
            let targets: Vec<(ExchangeId, Arc<dyn ExchangeConnection>, Vec<Symbol>)> = state
                .connections
                .iter()
                .map(|(exchange, active)| {
                    let missing = symbols
                        .iter()
                        .filter(|s| !active.symbols.contains(*s))
                        .cloned()
                        .collect();
                    (exchange.clone(), Arc::clone(&active.connection), missing)
                })
                .collect();
            (inner.generation.load(Ordering::SeqCst), targets)
        };

        let results = join_all(targets.into_iter().map(|(exchange, connection, missing)| async move {
            let added = inner.subscribe_connection(&connection, &missing).await;
            (exchange, added)
        }))
        .await;

        let mut state = inner.state.lock().await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        for (exchange, added) in results {
            if let Some(active) = state.connections.get_mut(&exchange) {
                active.symbols.extend(added);
            }
        }
    }

    pub async fn unsubscribe_from_symbols(&self, symbols: &[Symbol]) {
        let inner = &self.inner;
        let (generation, targets) = {
            let mut state = inner.state.lock().await;
            for symbol in symbols {
                state.tracked_symbols.remove(symbol);
            }
            let targets: Vec<(ExchangeId, Arc<dyn ExchangeConnection>, Vec<Symbol>)> = state
                .connections
                .iter()
                .map(|(exchange, active)| {
                    let present = symbols
                        .iter()
                        .filter(|s| active.symbols.contains(*s))
                        .cloned()
                        .collect();
                    (exchange.clone(), Arc::clone(&active.connection), present)
                })
                .collect();
            (inner.generation.load(Ordering::SeqCst), targets)
        };

        let results = join_all(targets.into_iter().map(|(exchange, connection, present)| async move {
            let mut removed = Vec::new();
            for symbol in present {
                match connection.unsubscribe_from_symbol(&symbol).await {
                    Ok(()) => removed.push(symbol),
                    Err(e) => inner.report(&e),
                }
            }
            (exchange, removed)
        }))
        .await;

        let mut state = inner.state.lock().await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        for (exchange, removed) in results {
            if let Some(active) = state.connections.get_mut(&exchange) {
                for symbol in &removed {
                    active.symbols.remove(symbol);
                }
            }
        }
    }

    pub fn on_quote<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        self.inner.quote_listeners.subscribe(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.inner.error_listeners.subscribe(handler)
    }

    pub fn on_status_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.health.on_status_change(handler)
    }

    /// Notified with each exchange that leaves the session, on refresh or
    /// cleanup, after its connection is closed.
    pub fn on_exchange_removed<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ExchangeId) + Send + Sync + 'static,
    {
        self.inner.removed_listeners.subscribe(handler)
    }

    pub fn remove_quote_listener(&self, id: ListenerId) -> bool {
        self.inner.quote_listeners.unsubscribe(id)
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.inner.error_listeners.unsubscribe(id)
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        self.inner.health.remove_listener(id)
    }

    pub fn remove_exchange_removed_listener(&self, id: ListenerId) -> bool {
        self.inner.removed_listeners.unsubscribe(id)
    }

    /// Run one staleness sweep now and reconnect what it flags.
    pub async fn run_health_check(&self) -> Vec<StaleConnection> {
        self.inner.run_health_sweep().await
    }

    /// Disconnect, wait the reconnect delay, connect and resubscribe. A call
    /// while another reconnect for the same exchange is running returns at once.
    pub async fn reconnect(&self, exchange: &ExchangeId) -> AggregatorResult<()> {
        self.inner.reconnect(exchange).await
    }

    /// Build a throwaway connection from the stored credential, connect and
    /// disconnect it, and record the outcome on the credential.
    pub async fn test_credential(&self, credential_id: CredentialId) -> AggregatorResult<bool> {
        let inner = &self.inner;
        let credential = inner.store.get_credential(credential_id).await?.ok_or_else(|| {
            AggregatorError::CredentialStore {
                message: format!("credential {} not found", credential_id),
                source: None,
            }
        })?;

        let outcome: AggregatorResult<()> = async {
            let connection = {
                let decrypted = inner
                    .store
                    .get_decrypted_credential(credential_id, &inner.vault)
                    .await?;
                inner.factory.create(&credential.exchange, &decrypted)?
            };
            connection.connect().await?;
            if let Err(e) = connection.disconnect().await {
                debug!(exchange = %credential.exchange, "Test disconnect failed: {}", e);
            }
            Ok(())
        }
        .await;

        let (success, message) = match &outcome {
            Ok(()) => (true, "connection succeeded".to_string()),
            Err(e) => (false, e.to_string()),
        };
        info!(exchange = %credential.exchange, success, "Credential test finished");
        inner
            .store
            .mark_credential_test_result(credential_id, success, &message)
            .await?;
        Ok(success)
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn report(&self, error: &AggregatorError) {
        match error.exchange() {
            Some(exchange) => warn!(%exchange, "⚠️ {}", error),
            None => warn!("⚠️ {}", error),
        }
        self.error_listeners.emit(&SessionError::from(error));
    }

    async fn build_connections(&self, generation: u64, user_id: &str, sink: QuoteHandler) {
        let credentials = match self.store.get_enabled_credentials(user_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                if self.is_current(generation) {
                    error!(user_id, "❌ Failed to load credentials: {}", e);
                    self.report(&e);
                }
                return;
            }
        };

        let mut selected: BTreeMap<ExchangeId, Credential> = BTreeMap::new();
        for credential in credentials {
            if selected.contains_key(&credential.exchange) {
                debug!(exchange = %credential.exchange, id = %credential.id, "Skipping duplicate credential");
                continue;
            }
            selected.insert(credential.exchange.clone(), credential);
        }

        let symbols: Vec<Symbol> = self.state.lock().await.tracked_symbols.iter().cloned().collect();

        let opened = join_all(
            selected
                .into_values()
                .map(|credential| self.open_connection(generation, credential, &symbols, Arc::clone(&sink))),
        )
        .await;

        let mut built: Vec<(ExchangeId, ActiveConnection)> = opened.into_iter().flatten().collect();

        let (stale, missing) = {
            let mut state = self.state.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                (built, Vec::new())
            } else {
                let mut missing = Vec::new();
                for (exchange, active) in built.drain(..) {
                    let absent: Vec<Symbol> = state
                        .tracked_symbols
                        .iter()
                        .filter(|s| !active.symbols.contains(*s))
                        .cloned()
                        .collect();
                    if !absent.is_empty() {
                        missing.push((exchange.clone(), Arc::clone(&active.connection), absent));
                    }
                    state.connections.insert(exchange, active);
                }
                (Vec::new(), missing)
            }
        };

        if !stale.is_empty() {
            debug!(count = stale.len(), "Discarding connections built for a torn-down session");
            for (exchange, _) in &stale {
                self.health.unregister(exchange);
            }
            self.disconnect_all(stale.into_iter().map(|(_, c)| c.connection).collect()).await;
            return;
        }

        // symbols tracked while connections were still coming up
        for (exchange, connection, absent) in missing {
            let added = self.subscribe_connection(&connection, &absent).await;
            let mut state = self.state.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Some(active) = state.connections.get_mut(&exchange) {
                active.symbols.extend(added);
            }
        }
    }

    async fn open_connection(
        &self,
        generation: u64,
        credential: Credential,
        symbols: &[Symbol],
        sink: QuoteHandler,
    ) -> Option<(ExchangeId, ActiveConnection)> {
        let exchange = credential.exchange.clone();

        let built: AggregatorResult<Arc<dyn ExchangeConnection>> = async {
            let decrypted = self
                .store
                .get_decrypted_credential(credential.id, &self.vault)
                .await?;
            self.factory.create(&exchange, &decrypted)
        }
        .await;

        let connection = match built {
            Ok(connection) => connection,
            Err(e) => {
                self.fail_credential(generation, &credential, &e).await;
                return None;
            }
        };

        connection.on_quote(sink);
        self.health.register(&exchange);
        if let Err(e) = connection.connect().await {
            self.health.unregister(&exchange);
            self.fail_credential(generation, &credential, &e).await;
            return None;
        }
        info!(%exchange, "🔌 Connection established");

        let subscribed = self.subscribe_connection(&connection, symbols).await;
        Some((
            exchange,
            ActiveConnection {
                credential_id: credential.id,
                connection,
                symbols: subscribed.into_iter().collect(),
            },
        ))
    }

    /// Report and record a failed connection, unless the session it was built
    /// for has since been torn down or rebuilt.
    async fn fail_credential(&self, generation: u64, credential: &Credential, error: &AggregatorError) {
        if !self.is_current(generation) {
            debug!(exchange = %credential.exchange, "Ignoring failure from a superseded session: {}", error);
            return;
        }
        self.report(error);
        if let Err(e) = self
            .store
            .mark_credential_test_result(credential.id, false, &error.to_string())
            .await
        {
            debug!(id = %credential.id, "Could not record credential failure: {}", e);
        }
    }

    /// Subscribe each symbol in turn; returns those that succeeded.
    async fn subscribe_connection(
        &self,
        connection: &Arc<dyn ExchangeConnection>,
        symbols: &[Symbol],
    ) -> Vec<Symbol> {
        let mut added = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match connection.subscribe_to_symbol(symbol).await {
                Ok(()) => {
                    debug!(exchange = %connection.exchange(), %symbol, "Subscribed");
                    added.push(symbol.clone());
                }
                Err(e) => self.report(&e),
            }
        }
        added
    }

    async fn disconnect_all(&self, connections: Vec<Arc<dyn ExchangeConnection>>) {
        let results = join_all(connections.iter().map(|c| c.disconnect())).await;
        for (connection, result) in connections.iter().zip(results) {
            if let Err(e) = result {
                warn!(exchange = %connection.exchange(), "Disconnect failed: {}", e);
            }
        }
    }

    fn spawn_health_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let period = self.config.health.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.run_health_sweep().await;
            }
        })
    }

    async fn run_health_sweep(&self) -> Vec<StaleConnection> {
        let stale = self.health.sweep();
        if stale.is_empty() {
            return stale;
        }

        for connection in &stale {
            warn!(
                exchange = %connection.exchange,
                idle_secs = connection.idle.as_secs(),
                "{}",
                AggregatorError::from(connection)
            );
        }
        join_all(stale.iter().map(|s| async move {
            // failures are reported inside reconnect
            let _ = self.reconnect(&s.exchange).await;
        }))
        .await;
        stale
    }

    async fn reconnect(&self, exchange: &ExchangeId) -> AggregatorResult<()> {
        if !self.health.begin_reconnect(exchange) {
            debug!(%exchange, "Reconnect already in flight");
            return Ok(());
        }

        let target = {
            let state = self.state.lock().await;
            state.connections.get(exchange).map(|active| {
                (
                    Arc::clone(&active.connection),
                    active.symbols.iter().cloned().collect::<Vec<_>>(),
                    active.credential_id,
                )
            })
        };
        let Some((connection, symbols, credential_id)) = target else {
            self.health.finish_reconnect(exchange, false);
            return Ok(());
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let attempt = self
            .health
            .status(exchange)
            .map(|s| s.reconnect_attempts)
            .unwrap_or_default();
        warn!(%exchange, attempt, %credential_id, "🔄 Reconnecting");

        if let Err(e) = connection.disconnect().await {
            debug!(%exchange, "Disconnect before reconnect failed: {}", e);
        }
        tokio::time::sleep(self.config.reconnect_delay).await;

        if let Err(e) = connection.connect().await {
            self.health.finish_reconnect(exchange, false);
            self.report(&e);
            return Err(e);
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            let _ = connection.disconnect().await;
            self.health.finish_reconnect(exchange, false);
            return Ok(());
        }

        let added = self.subscribe_connection(&connection, &symbols).await;
        {
            let mut state = self.state.lock().await;
            if self.is_current(generation) {
                if let Some(active) = state.connections.get_mut(exchange) {
                    for symbol in symbols.iter().filter(|s| !added.contains(*s)) {
                        active.symbols.remove(symbol);
                    }
                }
            }
        }
        info!(%exchange, resubscribed = added.len(), lost = symbols.len() - added.len(), "✅ Reconnected");
        self.health.finish_reconnect(exchange, true);
        Ok(())
    }
}
