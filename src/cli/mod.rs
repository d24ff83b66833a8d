//! Command-line interface and process wiring

pub mod server;

pub use server::*;
