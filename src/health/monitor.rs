//! Per-exchange health state and staleness sweep

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::errors::AggregatorError;
use crate::events::{ListenerId, Listeners};
use crate::types::{ConnectionState, ConnectionStatus, ExchangeId};

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

/// A connection found silent during a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct StaleConnection {
    pub exchange: ExchangeId,
    pub idle: Duration,
}

impl From<&StaleConnection> for AggregatorError {
    fn from(stale: &StaleConnection) -> Self {
        AggregatorError::StaleConnection {
            exchange: stale.exchange.clone(),
            idle: stale.idle,
        }
    }
}

#[derive(Default)]
struct HealthState {
    statuses: HashMap<ExchangeId, ConnectionStatus>,
    reconnecting: HashSet<ExchangeId>,
}

/// Tracks traffic per registered exchange and decides which ones need a
/// reconnect. The monitor never touches connections itself; the session
/// drives the sweep and performs reconnects.
pub struct HealthMonitor {
    config: HealthConfig,
    state: Mutex<HealthState>,
    listeners: Listeners<ConnectionStatus>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HealthState::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn on_status_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.listeners.subscribe(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Start tracking `exchange`. A fresh status waits for its first quote.
    pub fn register(&self, exchange: &ExchangeId) {
        let snapshot = {
            let mut state = self.state.lock();
            let status = ConnectionStatus::new(exchange.clone());
            state.statuses.insert(exchange.clone(), status.clone());
            status
        };
        debug!(%exchange, "Health tracking started");
        self.listeners.emit(&snapshot);
    }

    pub fn unregister(&self, exchange: &ExchangeId) {
        let mut state = self.state.lock();
        state.statuses.remove(exchange);
        state.reconnecting.remove(exchange);
    }

    pub fn record_quote(&self, exchange: &ExchangeId) {
        self.record_quote_at(exchange, Utc::now());
    }

    pub fn record_quote_at(&self, exchange: &ExchangeId, at: DateTime<Utc>) {
        let transitioned = {
            let mut state = self.state.lock();
            let Some(status) = state.statuses.get_mut(exchange) else {
                return;
            };
            status.message_count += 1;
            status.last_message_time = Some(at);
            if status.state != ConnectionState::Connected {
                status.set_state(ConnectionState::Connected);
                Some(status.clone())
            } else {
                None
            }
        };

        if let Some(snapshot) = transitioned {
            info!(%exchange, "✅ Quotes flowing");
            self.listeners.emit(&snapshot);
        }
    }

    pub fn sweep(&self) -> Vec<StaleConnection> {
        self.sweep_at(Utc::now())
    }

    /// Mark every connection silent past the threshold as `Disconnected` and
    /// return those that should be reconnected now. Connections that never
    /// produced a quote and those with a reconnect in flight are skipped.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<StaleConnection> {
        let mut stale = Vec::new();
        let mut changed = Vec::new();

        {
            let mut state = self.state.lock();
            let HealthState { statuses, reconnecting } = &mut *state;

            for status in statuses.values_mut() {
                if status.message_count == 0 {
                    continue;
                }
                let Some(last) = status.last_message_time else {
                    continue;
                };
                let idle = (now - last).to_std().unwrap_or_default();
                if idle <= self.config.stale_threshold {
                    continue;
                }

                if status.state != ConnectionState::Disconnected {
                    status.set_state(ConnectionState::Disconnected);
                    changed.push(status.clone());
                }
                if !reconnecting.contains(&status.exchange) {
                    stale.push(StaleConnection {
                        exchange: status.exchange.clone(),
                        idle,
                    });
                }
            }
        }

        for snapshot in &changed {
            warn!(exchange = %snapshot.exchange, "🔴 Connection stale");
            self.listeners.emit(snapshot);
        }
        stale.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        stale
    }

    /// Claim the reconnect slot for `exchange`. Returns false when one is
    /// already running or the exchange is not tracked.
    pub fn begin_reconnect(&self, exchange: &ExchangeId) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if state.reconnecting.contains(exchange) {
                return false;
            }
            let Some(status) = state.statuses.get_mut(exchange) else {
                return false;
            };
            status.reconnect_attempts += 1;
            let snapshot = status.clone();
            state.reconnecting.insert(exchange.clone());
            snapshot
        };
        self.listeners.emit(&snapshot);
        true
    }

    /// Release the reconnect slot. A successful reconnect waits for the next
    /// quote before reporting `Connected`.
    pub fn finish_reconnect(&self, exchange: &ExchangeId, success: bool) {
        let snapshot = {
            let mut state = self.state.lock();
            state.reconnecting.remove(exchange);
            match state.statuses.get_mut(exchange) {
                Some(status) if success && status.state != ConnectionState::Connected => {
                    status.set_state(ConnectionState::Stale);
                    Some(status.clone())
                }
                _ => None,
            }
        };
        if let Some(snapshot) = snapshot {
            self.listeners.emit(&snapshot);
        }
    }

    pub fn status(&self, exchange: &ExchangeId) -> Option<ConnectionStatus> {
        self.state.lock().statuses.get(exchange).cloned()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut statuses: Vec<ConnectionStatus> =
            self.state.lock().statuses.values().cloned().collect();
        statuses.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        statuses
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.statuses.clear();
        state.reconnecting.clear();
    }
}
