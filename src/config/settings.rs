//! Sidecar configuration settings
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables, then command-line flags. Garbage in the
//! environment is warned about and ignored, never fatal.

use crate::error::{Error, Result};
use crate::poller::{effective_refresh_interval, DEFAULT_REFRESH_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTP path prefix
pub const DEFAULT_HTTP_URI: &str = "/health/";

/// Default store endpoint
pub const DEFAULT_REDIS_ENDPOINT: &str = "127.0.0.1:6379";

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Main configuration for the health sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// HTTP listen port
    pub http_port: u16,

    /// Address the HTTP listener binds to
    pub listen_host: IpAddr,

    /// Path prefix; in indexed mode the target index follows it
    pub http_uri: String,

    /// Poll interval in milliseconds (floor 500)
    pub refresh_interval_ms: u64,

    /// Per-probe timeout in milliseconds; defaults to the poll interval
    pub probe_timeout_ms: Option<u64>,

    /// Probe once at startup instead of waiting a full interval
    pub probe_on_start: bool,

    /// How the HTTP path maps onto targets
    pub mode: ServeMode,

    /// Log filter directive
    pub log_level: String,

    /// Store endpoints to monitor
    pub redis: RedisConfig,

    /// Tokio runtime configuration
    pub runtime: RuntimeConfig,
}

/// Redis endpoints and credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` of every monitored instance, in index order
    pub endpoints: Vec<String>,

    /// Password sent with `AUTH`, if any
    pub password: Option<String>,

    /// Database selected on connect
    pub db: i64,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime flavour
    pub mode: RuntimeMode,

    /// Worker threads for the multi-threaded runtime (None = one per core)
    pub worker_threads: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    SingleThreaded,
    #[default]
    MultiThreaded,
}

/// How request paths address targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// `single` when exactly one endpoint is configured, `indexed` otherwise
    #[default]
    Auto,
    /// The bare prefix answers for the only target (`OK` / `ERROR`)
    Single,
    /// `<prefix><index>` answers for the target at that index
    Indexed,
}

impl ServeMode {
    /// Resolve `Auto` against the number of configured targets.
    pub fn resolve(self, targets: usize) -> ServeMode {
        match self {
            ServeMode::Auto if targets == 1 => ServeMode::Single,
            ServeMode::Auto => ServeMode::Indexed,
            other => other,
        }
    }
}

impl FromStr for ServeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ServeMode::Auto),
            "single" => Ok(ServeMode::Single),
            "indexed" | "multi" => Ok(ServeMode::Indexed),
            other => Err(Error::Config(format!("unknown serve mode '{}'", other))),
        }
    }
}

impl fmt::Display for ServeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeMode::Auto => write!(f, "auto"),
            ServeMode::Single => write!(f, "single"),
            ServeMode::Indexed => write!(f, "indexed"),
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_uri: DEFAULT_HTTP_URI.to_string(),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            probe_timeout_ms: None,
            probe_on_start: true,
            mode: ServeMode::Auto,
            log_level: "info".to_string(),
            redis: RedisConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_REDIS_ENDPOINT.to_string()],
            password: None,
            db: 0,
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("endpoints", &self.endpoints)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .finish()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::MultiThreaded,
            worker_threads: None,
        }
    }
}

impl SidecarConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            Error::Config(format!("failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Defaults overlaid with the YAML file: the explicit `path`, or
    /// `config.yml` if one exists in the working directory.
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_yaml_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// `load_file` followed by the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = var("HTTP_PORT") {
            override_parsed("HTTP_PORT", &value, &mut self.http_port);
        }

        if let Some(value) = var("HTTP_LISTEN_HOST") {
            override_parsed("HTTP_LISTEN_HOST", &value, &mut self.listen_host);
        }

        if let Some(value) = var("HTTP_URI") {
            self.http_uri = value;
        }

        if let Some(value) = var("REFRESH_INTERVAL") {
            override_parsed("REFRESH_INTERVAL", &value, &mut self.refresh_interval_ms);
        }

        if let Some(value) = var("PROBE_TIMEOUT") {
            override_optional("PROBE_TIMEOUT", &value, &mut self.probe_timeout_ms, "the refresh interval");
        }

        if let Some(value) = var("PROBE_ON_START") {
            override_parsed("PROBE_ON_START", &value.to_lowercase(), &mut self.probe_on_start);
        }

        if let Some(value) = var("HEALTH_MODE") {
            override_parsed("HEALTH_MODE", &value, &mut self.mode);
        }

        if let Some(value) = var("REDIS_ENDPOINTS") {
            self.redis.endpoints = value.split_whitespace().map(str::to_string).collect();
        }

        if let Some(value) = var("REDIS_PASSWORD") {
            self.redis.password = Some(value);
        }

        if let Some(value) = var("REDIS_DB") {
            override_parsed("REDIS_DB", &value, &mut self.redis.db);
        }

        if let Some(value) = var("RUST_LOG") {
            self.log_level = value;
        }

        if let Some(value) = var("WORKER_THREADS") {
            override_optional("WORKER_THREADS", &value, &mut self.runtime.worker_threads, "one per core");
        }
    }

    /// Normalise and check the configuration before anything is started.
    ///
    /// The interval floor and probe-timeout clamp are corrected with a
    /// warning. A bad URI, an empty endpoint list or single mode over
    /// several endpoints is an error.
    pub fn validate(&mut self) -> Result<()> {
        self.refresh_interval_ms = effective_refresh_interval(self.refresh_interval_ms);

        if let Some(timeout) = self.probe_timeout_ms {
            if timeout == 0 || timeout > self.refresh_interval_ms {
                warn!(
                    "Probe timeout {}ms must be between 1 and the refresh interval, using {}ms",
                    timeout, self.refresh_interval_ms
                );
                self.probe_timeout_ms = None;
            }
        }

        if !self.http_uri.starts_with('/') {
            return Err(Error::Config(format!(
                "HTTP_URI must start with '/', got '{}'",
                self.http_uri
            )));
        }

        self.redis.endpoints = self
            .redis
            .endpoints
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        if self.redis.endpoints.is_empty() {
            return Err(Error::Config("no redis endpoints configured".to_string()));
        }
        if self.mode == ServeMode::Single && self.redis.endpoints.len() > 1 {
            return Err(Error::Config(format!(
                "single mode serves exactly one endpoint, {} configured",
                self.redis.endpoints.len()
            )));
        }

        if self.runtime.worker_threads == Some(0) {
            self.runtime.worker_threads = None;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.http_port)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(self.refresh_interval_ms))
    }

    /// Log the effective settings. The password itself is never logged.
    pub fn log_summary(&self) {
        info!("will listen on {}", self.listen_addr());
        info!("will use uri {} ({} mode)", self.http_uri, self.mode.resolve(self.redis.endpoints.len()));
        info!("will perform healthchecks every {} ms", self.refresh_interval_ms);
        info!("probe timeout {} ms", self.probe_timeout().as_millis());
        for (index, endpoint) in self.redis.endpoints.iter().enumerate() {
            info!("redis endpoint {}: {}", index, endpoint);
        }
        if self.redis.password.is_some() {
            info!("will authenticate using given password");
        } else {
            info!("will not authenticate");
        }
    }
}

/// Parse `value` into `target`, warning and keeping the old value on
/// failure.
fn override_parsed<T>(name: &str, value: &str, target: &mut T)
where
    T: FromStr + fmt::Display,
{
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("{} is garbage ({:?}), using {} instead", name, value, target),
    }
}

/// `override_parsed` for settings that may be unset; `unset` names what an
/// unset value falls back to.
fn override_optional<T>(name: &str, value: &str, target: &mut Option<T>, unset: &str)
where
    T: FromStr + fmt::Display,
{
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = Some(parsed),
        Err(_) => warn!(
            "{} is garbage ({:?}), using {} instead",
            name,
            value,
            fallback_description(target, unset)
        ),
    }
}

fn fallback_description<T: fmt::Display>(current: &Option<T>, unset: &str) -> String {
    match current {
        Some(value) => value.to_string(),
        None => unset.to_string(),
    }
}
