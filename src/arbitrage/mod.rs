//! Cross-exchange arbitrage detection

pub mod calculator;
pub mod engine;

pub use calculator::*;
pub use engine::*;
