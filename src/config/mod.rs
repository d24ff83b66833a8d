//! Configuration loading and validation

pub mod settings;

pub use settings::{RedisConfig, RuntimeConfig, RuntimeMode, ServeMode, SidecarConfig};
