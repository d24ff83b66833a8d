//! Utility functions for the health sidecar

pub mod http;
pub mod time;

pub use http::*;
pub use time::*;
