//! Liveness probes for monitored endpoints
//!
//! A probe is the only thing the poller knows about a store: it either
//! answers within the timeout or it does not. `RedisProbe` implements this
//! with a `PING` that must be answered with `PONG`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::Connection;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Default Redis port when an endpoint omits it
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Ping capability bound to one endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Check liveness. `Ok(())` only on an affirmative reply within `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<()>;
}

/// Probe that issues `PING` against a Redis endpoint.
///
/// One connection is kept between cycles and discarded after any failure,
/// so the next ping reconnects from scratch.
pub struct RedisProbe {
    endpoint: String,
    client: redis::Client,
    connection: Mutex<Option<Connection>>,
}

impl RedisProbe {
    /// Validate `endpoint` (`host[:port]`) and prepare a client for it.
    ///
    /// No connection is made here; an unreachable endpoint is a probe
    /// failure later, a malformed one is a configuration error now.
    pub fn connect(endpoint: &str, password: Option<&str>, db: i64) -> Result<Self> {
        let url = redis_url(endpoint, password, db)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::Config(format!("invalid redis endpoint '{}': {}", endpoint, e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            connection: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ping over `cached`, or a fresh connection when there is none. The
    /// connection is handed back only after a clean `PONG`.
    async fn ping_with(&self, cached: Option<Connection>) -> Result<Connection> {
        let mut connection = match cached {
            Some(connection) => connection,
            None => {
                debug!("Opening redis connection to {}", self.endpoint);
                self.client.get_async_connection().await?
            }
        };

        let reply: String = redis::cmd("PING").query_async(&mut connection).await?;
        if reply != "PONG" {
            return Err(Error::UnexpectedReply {
                endpoint: self.endpoint.clone(),
                reply,
            });
        }
        Ok(connection)
    }
}

#[async_trait]
impl Probe for RedisProbe {
    async fn ping(&self, timeout: Duration) -> Result<()> {
        let mut slot = self.connection.lock().await;

        // The slot stays empty while the ping is in flight, so a ping that
        // fails, times out or is cancelled never leaves a connection behind.
        let cached = slot.take();
        match tokio::time::timeout(timeout, self.ping_with(cached)).await {
            Ok(Ok(connection)) => {
                *slot = Some(connection);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::ProbeTimeout {
                endpoint: self.endpoint.clone(),
                timeout,
            }),
        }
    }
}

impl fmt::Debug for RedisProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProbe")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Build the `redis://` URL for an endpoint, rejecting anything that is not
/// a plain `host[:port]`.
fn redis_url(endpoint: &str, password: Option<&str>, db: i64) -> Result<Url> {
    let malformed = |reason: &str| Error::Config(format!("malformed endpoint '{}': {}", endpoint, reason));

    if endpoint.trim().is_empty() {
        return Err(malformed("empty"));
    }
    if endpoint.contains(&['/', '@', '?', '#'][..]) || endpoint.contains(char::is_whitespace) {
        return Err(malformed("expected host:port"));
    }

    let mut url = Url::parse(&format!("redis://{}", endpoint)).map_err(|e| malformed(&e.to_string()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(malformed("missing host")),
    }
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_REDIS_PORT))
            .map_err(|_| malformed("cannot set port"))?;
    }
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| malformed("cannot attach password"))?;
    }
    url.set_path(&format!("/{}", db));

    Ok(url)
}
