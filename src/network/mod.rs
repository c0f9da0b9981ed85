//! HTTP helpers shared by polling connections

pub mod http;
pub mod retry;

pub use http::*;
pub use retry::*;
