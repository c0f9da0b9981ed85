//! Validation of inbound market data

pub mod quote;

pub use quote::*;
