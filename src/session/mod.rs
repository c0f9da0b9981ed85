//! Session management and throttled quote fan-out

pub mod dispatch;
pub mod manager;
pub mod throttle;

pub use dispatch::*;
pub use manager::*;
pub use throttle::*;
