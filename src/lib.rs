//! Cross-exchange quote aggregator
//!
//! Maintains authenticated connections to several cryptocurrency exchanges for
//! one user, fans their quotes out with per-symbol rate limiting, reconnects
//! silent connections, and derives ranked cross-exchange arbitrage
//! opportunities from the latest quote on every venue.

pub mod config;
pub mod types;
pub mod errors;
pub mod events;
pub mod vault;
pub mod store;
pub mod network;
pub mod exchange;
pub mod health;
pub mod session;
pub mod arbitrage;
pub mod validation;
pub mod utils;
pub mod storage;

// Re-export commonly used items
pub use config::{Config, CONFIG};
pub use errors::{AggregatorError, AggregatorResult, SessionError, VaultError};
pub use types::*;
