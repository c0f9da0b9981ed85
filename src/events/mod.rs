//! Event fan-out primitives

pub mod listeners;

pub use listeners::*;
