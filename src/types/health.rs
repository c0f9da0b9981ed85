//! Connection health types

use chrono::{DateTime, Utc};
use serde::Serialize;
use super::ExchangeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Quotes are flowing
    Connected,
    /// Silent past the staleness threshold
    Disconnected,
    /// Transport (re)connected, waiting for the first quote
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub exchange: ExchangeId,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            state: ConnectionState::Stale,
            connected: false,
            last_message_time: None,
            message_count: 0,
            reconnect_attempts: 0,
        }
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.connected = state == ConnectionState::Connected;
    }
}
