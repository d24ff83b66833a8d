//! Sidecar startup: CLI arguments, wiring and shutdown

use crate::config::{ServeMode, SidecarConfig};
use crate::error::Result;
use crate::poller::HealthPoller;
use crate::registry::TargetRegistry;
use crate::server::{HealthRouter, HealthServer};
use crate::service::HealthQueryService;
use clap::Args;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// YAML config file (defaults to ./config.yml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// HTTP listen address
    #[arg(long)]
    pub listen_host: Option<IpAddr>,

    /// HTTP path prefix
    #[arg(long)]
    pub uri: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub refresh_interval: Option<u64>,

    /// Per-probe timeout in milliseconds
    #[arg(long)]
    pub probe_timeout: Option<u64>,

    /// Redis endpoint (host:port); repeat for several, order defines the index
    #[arg(long = "endpoint")]
    pub endpoints: Vec<String>,

    /// How paths map onto targets
    #[arg(long, value_enum)]
    pub mode: Option<ServeMode>,

    /// Wait a full interval before the first probe
    #[arg(long)]
    pub no_probe_on_start: bool,
}

impl ServeArgs {
    /// Overlay environment and command-line values on `base`, then validate.
    pub fn resolve(&self, mut base: SidecarConfig) -> Result<SidecarConfig> {
        base.apply_env();
        self.apply(&mut base);
        base.validate()?;
        debug!("Resolved configuration: {:?}", base);
        Ok(base)
    }

    /// Copy every flag that was given into `config`.
    pub fn apply(&self, config: &mut SidecarConfig) {
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(host) = self.listen_host {
            config.listen_host = host;
        }
        if let Some(uri) = &self.uri {
            config.http_uri = uri.clone();
        }
        if let Some(interval) = self.refresh_interval {
            config.refresh_interval_ms = interval;
        }
        if let Some(timeout) = self.probe_timeout {
            config.probe_timeout_ms = Some(timeout);
        }
        if !self.endpoints.is_empty() {
            config.redis.endpoints = self.endpoints.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.no_probe_on_start {
            config.probe_on_start = false;
        }
    }
}

/// Run the sidecar until Ctrl-C or SIGTERM.
pub async fn run(config: SidecarConfig) -> Result<()> {
    run_until(config, shutdown_signal()).await
}

/// Run the sidecar until `shutdown` completes.
///
/// The registry is built and the listener bound before anything runs, so a
/// bad endpoint or an unavailable port stops startup with an error.
pub async fn run_until<F>(config: SidecarConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.log_summary();

    let registry = Arc::new(TargetRegistry::redis(
        &config.redis.endpoints,
        config.redis.password.as_deref(),
        config.redis.db,
    )?);
    info!("Monitoring {} redis endpoint(s)", registry.size());

    let router = HealthRouter::new(
        HealthQueryService::new(Arc::clone(&registry)),
        config.http_uri.clone(),
        config.mode,
    );
    let server = HealthServer::bind(config.listen_addr(), router).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = HealthPoller::new(Arc::clone(&registry), config.refresh_interval())
        .with_probe_timeout(config.probe_timeout())
        .with_probe_on_start(config.probe_on_start)
        .spawn(shutdown_rx.clone());

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("Shutdown signal received");
        let _ = signal_tx.send(true);
    });

    let served = server.serve(shutdown_rx).await;

    // The listener may also stop on its own; take the poller down with it.
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller.await {
        warn!("Health poller task ended abnormally: {}", e);
    }

    served
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
