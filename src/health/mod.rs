//! Connection liveness tracking

pub mod monitor;

pub use monitor::*;
