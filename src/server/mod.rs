//! HTTP surface for health queries
//!
//! Status codes are the contract: 200 healthy, 410 unhealthy or not yet
//! probed, 400 for an index that is malformed or out of range. Bodies are
//! for humans only.

use crate::config::ServeMode;
use crate::error::{Error, Result};
use crate::service::HealthQueryService;
use crate::utils::{method_not_allowed, text_response};
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Resolves request paths to health answers.
#[derive(Debug)]
pub struct HealthRouter {
    service: HealthQueryService,
    uri: String,
    mode: ServeMode,
}

impl HealthRouter {
    /// `mode` is resolved against the registry size, so `Auto` never
    /// survives construction.
    pub fn new(service: HealthQueryService, uri: impl Into<String>, mode: ServeMode) -> Self {
        let mode = mode.resolve(service.registry().size());
        Self {
            service,
            uri: uri.into(),
            mode,
        }
    }

    pub fn mode(&self) -> ServeMode {
        self.mode
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Answer a request for `path`.
    pub fn respond(&self, method: &Method, path: &str) -> Response<Body> {
        match self.mode {
            ServeMode::Single => {
                if !self.matches_bare(path) {
                    return not_found(method);
                }
                if !is_readable(method) {
                    return method_not_allowed(method);
                }
                self.respond_single(method)
            }
            _ => {
                let Some(token) = self.index_token(path) else {
                    return not_found(method);
                };
                if !is_readable(method) {
                    return method_not_allowed(method);
                }
                self.respond_indexed(method, token)
            }
        }
    }

    fn respond_single(&self, method: &Method) -> Response<Body> {
        match self.service.query_sole() {
            Ok(snapshot) if snapshot.is_healthy() => text_response(method, StatusCode::OK, "OK\n"),
            Ok(snapshot) => {
                debug!("{} is {}", snapshot.endpoint, snapshot.status);
                text_response(method, StatusCode::GONE, "ERROR\n")
            }
            Err(e) => internal_error(method, &e),
        }
    }

    fn respond_indexed(&self, method: &Method, token: &str) -> Response<Body> {
        match self.service.query_token(token) {
            Ok(snapshot) if snapshot.is_healthy() => {
                text_response(method, StatusCode::OK, format!("{} is HEALTHY\n", snapshot.endpoint))
            }
            Ok(snapshot) => {
                debug!("{} is {}", snapshot.endpoint, snapshot.status);
                text_response(method, StatusCode::GONE, format!("{} is UNHEALTHY\n", snapshot.endpoint))
            }
            Err(e) if e.is_client_error() => {
                debug!("Rejected health query {:?}: {}", token, e);
                text_response(method, StatusCode::BAD_REQUEST, "BAD REQUEST\n")
            }
            Err(e) => internal_error(method, &e),
        }
    }

    /// Single mode answers on the prefix itself, with or without its
    /// trailing slash.
    fn matches_bare(&self, path: &str) -> bool {
        let trimmed = self.uri.trim_end_matches('/');
        path == self.uri || (!trimmed.is_empty() && path == trimmed)
    }

    /// Indexed mode: whatever follows the prefix. A prefix without a
    /// trailing slash also accepts `<prefix>/<index>`.
    fn index_token<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.uri.as_str())?;
        if self.uri.ends_with('/') {
            Some(rest)
        } else {
            Some(rest.strip_prefix('/').unwrap_or(rest))
        }
    }
}

fn is_readable(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn not_found(method: &Method) -> Response<Body> {
    text_response(method, StatusCode::NOT_FOUND, "NOT FOUND\n")
}

fn internal_error(method: &Method, e: &Error) -> Response<Body> {
    error!("Health query failed: {}", e);
    text_response(method, StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL ERROR\n")
}

/// Handle incoming HTTP request
pub async fn handle_request(
    req: Request<Body>,
    remote_addr: SocketAddr,
    router: Arc<HealthRouter>,
) -> std::result::Result<Response<Body>, Infallible> {
    let response = router.respond(req.method(), req.uri().path());
    debug!(
        "{} {} from {} -> {}",
        req.method(),
        req.uri().path(),
        remote_addr.ip(),
        response.status()
    );
    Ok(response)
}

/// HTTP listener bound to its socket, ready to serve.
pub struct HealthServer {
    incoming: AddrIncoming,
    local_addr: SocketAddr,
    router: Arc<HealthRouter>,
}

impl HealthServer {
    /// Bind the listener. Failure here is fatal for the process.
    pub async fn bind(listen_addr: SocketAddr, router: HealthRouter) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::ListenerStartup(format!("cannot bind {}: {}", listen_addr, e)))?;
        let local_addr = listener.local_addr()?;
        let incoming = AddrIncoming::from_listener(listener)
            .map_err(|e| Error::ListenerStartup(format!("cannot listen on {}: {}", local_addr, e)))?;

        Ok(Self {
            incoming,
            local_addr,
            router: Arc::new(router),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` flips to `true` or its sender is dropped.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = Arc::clone(&self.router);
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            let router = Arc::clone(&router);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, remote_addr, Arc::clone(&router))
                }))
            }
        });

        info!(
            "Serving health on http://{}{} ({} mode)",
            self.local_addr,
            self.router.uri(),
            self.router.mode()
        );

        Server::builder(self.incoming)
            .serve(make_svc)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("HTTP listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::HealthPoller;
    use crate::registry::tests::{fake_registry, FakeProbe};
    use crate::registry::TargetRegistry;
    use crate::utils::body_to_string;
    use std::time::Duration;

    fn router(registry: &Arc<TargetRegistry>, uri: &str, mode: ServeMode) -> HealthRouter {
        HealthRouter::new(HealthQueryService::new(Arc::clone(registry)), uri, mode)
    }

    async fn polled(probes: &[Arc<FakeProbe>]) -> Arc<TargetRegistry> {
        let registry = Arc::new(fake_registry(probes));
        HealthPoller::new(Arc::clone(&registry), Duration::from_millis(500))
            .poll_once()
            .await;
        registry
    }

    async fn get(router: &HealthRouter, path: &str) -> (StatusCode, String) {
        let response = router.respond(&Method::GET, path);
        let status = response.status();
        (status, body_to_string(response.into_body()).await.unwrap())
    }

    #[tokio::test]
    async fn test_single_target_healthy() {
        let registry = polled(&[FakeProbe::alive()]).await;
        let router = router(&registry, "/healthz", ServeMode::Auto);
        assert_eq!(router.mode(), ServeMode::Single);

        assert_eq!(get(&router, "/healthz").await, (StatusCode::OK, "OK\n".to_string()));
    }

    #[tokio::test]
    async fn test_single_target_unhealthy() {
        let registry = polled(&[FakeProbe::dead()]).await;
        let router = router(&registry, "/health/", ServeMode::Single);

        assert_eq!(get(&router, "/health/").await, (StatusCode::GONE, "ERROR\n".to_string()));
        assert_eq!(get(&router, "/health").await, (StatusCode::GONE, "ERROR\n".to_string()));
        assert_eq!(get(&router, "/health/0").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_single_target_never_probed() {
        let registry = Arc::new(fake_registry(&[FakeProbe::alive()]));
        let router = router(&registry, "/healthz", ServeMode::Single);

        assert_eq!(get(&router, "/healthz").await, (StatusCode::GONE, "ERROR\n".to_string()));
    }

    #[tokio::test]
    async fn test_indexed_targets() {
        let registry = polled(&[FakeProbe::alive(), FakeProbe::dead()]).await;
        let router = router(&registry, "/health/", ServeMode::Auto);
        assert_eq!(router.mode(), ServeMode::Indexed);

        assert_eq!(
            get(&router, "/health/0").await,
            (StatusCode::OK, "10.0.0.0:6379 is HEALTHY\n".to_string())
        );
        assert_eq!(
            get(&router, "/health/1").await,
            (StatusCode::GONE, "10.0.0.1:6379 is UNHEALTHY\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_indexed_bad_requests() {
        let registry = polled(&[FakeProbe::alive(), FakeProbe::dead()]).await;
        let router = router(&registry, "/health/", ServeMode::Indexed);

        for path in ["/health/2", "/health/abc", "/health/", "/health/-1", "/health/0/1"] {
            assert_eq!(
                get(&router, path).await,
                (StatusCode::BAD_REQUEST, "BAD REQUEST\n".to_string()),
                "{}",
                path
            );
        }
        assert_eq!(get(&router, "/metrics").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_indexed_prefix_without_slash() {
        let registry = polled(&[FakeProbe::alive(), FakeProbe::alive()]).await;
        let router = router(&registry, "/healthz", ServeMode::Indexed);

        assert_eq!(get(&router, "/healthz/1").await.0, StatusCode::OK);
        assert_eq!(get(&router, "/healthz1").await.0, StatusCode::OK);
        assert_eq!(get(&router, "/healthz").await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_methods() {
        let registry = polled(&[FakeProbe::alive()]).await;
        let router = router(&registry, "/healthz", ServeMode::Single);

        let head = router.respond(&Method::HEAD, "/healthz");
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(body_to_string(head.into_body()).await.unwrap(), "");

        let post = router.respond(&Method::POST, "/healthz");
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        let probes = [FakeProbe::alive(), FakeProbe::dead()];
        let registry = polled(&probes).await;
        let server = HealthServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            router(&registry, "/health/", ServeMode::Auto),
        )
        .await
        .unwrap();
        let addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(shutdown_rx));

        let client = hyper::Client::new();
        let fetch = |path: &str| {
            let uri: hyper::Uri = format!("http://{}{}", addr, path).parse().unwrap();
            let client = client.clone();
            async move {
                let response = client.get(uri).await.unwrap();
                let status = response.status();
                (status, body_to_string(response.into_body()).await.unwrap())
            }
        };

        assert_eq!(fetch("/health/0").await, (StatusCode::OK, "10.0.0.0:6379 is HEALTHY\n".to_string()));
        assert_eq!(fetch("/health/1").await, (StatusCode::GONE, "10.0.0.1:6379 is UNHEALTHY\n".to_string()));
        assert_eq!(fetch("/health/2").await, (StatusCode::BAD_REQUEST, "BAD REQUEST\n".to_string()));
        assert_eq!(fetch("/health/abc").await, (StatusCode::BAD_REQUEST, "BAD REQUEST\n".to_string()));

        // The listener reads live state; a new poll is visible immediately.
        probes[1].set_alive(true);
        HealthPoller::new(Arc::clone(&registry), Duration::from_millis(500))
            .poll_once()
            .await;
        assert_eq!(fetch("/health/1").await.0, StatusCode::OK);

        shutdown_tx.send(true).unwrap();
        drop(client);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not shut down")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_startup_error() {
        let registry = polled(&[FakeProbe::alive()]).await;
        let first = HealthServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            router(&registry, "/healthz", ServeMode::Auto),
        )
        .await
        .unwrap();

        let err = HealthServer::bind(first.local_addr(), router(&registry, "/healthz", ServeMode::Auto))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ListenerStartup(_)));
    }
}
