//! Redis Health Sidecar - liveness probing for Redis endpoints over HTTP
//!
//! A single poller task pings every configured endpoint on a fixed interval
//! and publishes the result into a per-target atomic cell. HTTP requests
//! read those cells directly, so serving a health check never waits on a
//! probe.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod poller;
pub mod probe;
pub mod registry;
pub mod server;
pub mod service;
pub mod utils;

// Re-export commonly used items
pub use config::{ServeMode, SidecarConfig};
pub use error::{Error, Result};
pub use logging::{init_logger_with_config, init_logger_with_env};
pub use models::{HealthSnapshot, HealthState};
pub use poller::HealthPoller;
pub use probe::{Probe, RedisProbe};
pub use registry::{MonitoredTarget, TargetRegistry};
pub use server::{HealthRouter, HealthServer};
pub use service::HealthQueryService;

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::{RuntimeConfig, RuntimeMode};
    use anyhow::{Context, Result};
    use tokio::runtime::{Builder, Runtime};
    use tracing::info;

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode {
            RuntimeMode::SingleThreaded => {
                info!("Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            RuntimeMode::MultiThreaded => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all().thread_name("health-worker");

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        info!("Initializing multi-threaded runtime with {} worker threads", threads);
                        builder.worker_threads(threads);
                    }
                    _ => info!("Initializing multi-threaded runtime with auto-detected CPU cores"),
                }

                builder.build().context("Failed to create multi-threaded runtime")
            }
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_runtimes_run_futures() {
            let single = RuntimeConfig {
                mode: RuntimeMode::SingleThreaded,
                worker_threads: None,
            };
            assert_eq!(run_with_runtime(&single, async { Ok(1) }).unwrap(), 1);

            let multi = RuntimeConfig {
                mode: RuntimeMode::MultiThreaded,
                worker_threads: Some(2),
            };
            let value = run_with_runtime(&multi, async {
                let handle = tokio::spawn(async { 40 + 2 });
                Ok::<_, anyhow::Error>(handle.await?)
            })
            .unwrap();
            assert_eq!(value, 42);
        }
    }
}
