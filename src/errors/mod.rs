//! Error types for the vault, connections and session

pub mod aggregator_error;
pub mod vault_error;

pub use aggregator_error::*;
pub use vault_error::*;
