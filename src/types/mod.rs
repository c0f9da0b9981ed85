//! Core data types and structures

pub mod market;
pub mod quote;
pub mod credential;
pub mod arbitrage;
pub mod health;

pub use market::*;
pub use quote::*;
pub use credential::*;
pub use arbitrage::*;
pub use health::*;
