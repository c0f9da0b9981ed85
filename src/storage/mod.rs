//! Data persistence and file operations

pub mod opportunities;

pub use opportunities::*;
