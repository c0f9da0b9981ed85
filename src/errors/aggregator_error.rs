//! Custom error types for the aggregator

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use crate::types::{ExchangeId, Symbol};
use super::VaultError;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Credential decryption failed for {exchange}: {source}")]
    CredentialDecryption {
        exchange: ExchangeId,
        #[source]
        source: VaultError,
    },

    #[error("Connection init failed: {exchange} - {message}")]
    ConnectionInit {
        exchange: ExchangeId,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Subscription failed: {exchange} {symbol} - {message}")]
    Subscription {
        exchange: ExchangeId,
        symbol: Symbol,
        message: String,
    },

    #[error("Connection stale: {exchange} silent for {idle:?}")]
    StaleConnection {
        exchange: ExchangeId,
        idle: Duration,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        retry_count: u32,
    },

    #[error("Credential store error: {message}")]
    CredentialStore {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Session already initialized for user {user_id}")]
    AlreadyInitialized { user_id: String },
}

pub type AggregatorResult<T> = Result<T, AggregatorError>;

impl AggregatorError {
    pub fn connection_init(exchange: &ExchangeId, message: impl Into<String>) -> Self {
        AggregatorError::ConnectionInit {
            exchange: exchange.clone(),
            message: message.into(),
            source: None,
        }
    }

    pub fn subscription(exchange: &ExchangeId, symbol: &Symbol, message: impl Into<String>) -> Self {
        AggregatorError::Subscription {
            exchange: exchange.clone(),
            symbol: symbol.clone(),
            message: message.into(),
        }
    }

    pub fn exchange(&self) -> Option<&ExchangeId> {
        match self {
            AggregatorError::CredentialDecryption { exchange, .. }
            | AggregatorError::ConnectionInit { exchange, .. }
            | AggregatorError::Subscription { exchange, .. }
            | AggregatorError::StaleConnection { exchange, .. } => Some(exchange),
            _ => None,
        }
    }

    pub fn kind(&self) -> SessionErrorKind {
        match self {
            AggregatorError::CredentialDecryption { .. } => SessionErrorKind::CredentialDecryption,
            AggregatorError::ConnectionInit { .. } => SessionErrorKind::ConnectionInit,
            AggregatorError::Subscription { .. } => SessionErrorKind::Subscription,
            AggregatorError::StaleConnection { .. } => SessionErrorKind::StaleConnection,
            AggregatorError::Network { .. } => SessionErrorKind::ConnectionInit,
            AggregatorError::CredentialStore { .. } => SessionErrorKind::CredentialStore,
            AggregatorError::NotInitialized | AggregatorError::AlreadyInitialized { .. } => {
                SessionErrorKind::Session
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionErrorKind {
    CredentialDecryption,
    ConnectionInit,
    Subscription,
    StaleConnection,
    CredentialStore,
    Session,
}

/// Error-channel event delivered to `on_error` listeners
#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub exchange: Option<ExchangeId>,
    pub kind: SessionErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AggregatorError> for SessionError {
    fn from(error: &AggregatorError) -> Self {
        SessionError {
            exchange: error.exchange().cloned(),
            kind: error.kind(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}
