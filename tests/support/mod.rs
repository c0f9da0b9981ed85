#![allow(dead_code)]

pub mod connection;
pub mod session;
