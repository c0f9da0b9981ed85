//! Exchange connections

pub mod endpoints;
pub mod factory;
pub mod generic;
pub mod rest;
pub mod traits;

pub use endpoints::*;
pub use factory::*;
pub use generic::*;
pub use rest::*;
pub use traits::*;
