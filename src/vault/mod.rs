//! Credential encryption at rest

pub mod cipher;

pub use cipher::*;
