//! Health query service
//!
//! Read side of the registry. Answers from whatever the poller last
//! published and never triggers a probe, so a query costs one atomic load.

use crate::error::{Error, Result};
use crate::models::HealthSnapshot;
use crate::registry::TargetRegistry;
use std::sync::Arc;

/// Maps a requested index to the current health of that target.
#[derive(Debug, Clone)]
pub struct HealthQueryService {
    registry: Arc<TargetRegistry>,
}

impl HealthQueryService {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Health of the target at `index`.
    pub fn query(&self, index: i64) -> Result<HealthSnapshot> {
        let len = self.registry.size();
        let position = usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        Ok(self.registry.get(position)?.snapshot())
    }

    /// Health of the target named by a raw index token, such as the path
    /// suffix of `/health/1`.
    pub fn query_token(&self, token: &str) -> Result<HealthSnapshot> {
        let index = parse_index(token)?;
        self.query(index)
    }

    /// Health of the first (in single-target mode, the only) target.
    pub fn query_sole(&self) -> Result<HealthSnapshot> {
        self.query(0)
    }
}

/// Parse a decimal index. An optional sign is accepted so that `-1` is
/// reported as out of range rather than malformed.
pub fn parse_index(token: &str) -> Result<i64> {
    token
        .parse::<i64>()
        .map_err(|_| Error::MalformedIndex(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HealthState, ProbeOutcome};
    use crate::poller::HealthPoller;
    use crate::registry::tests::{fake_registry, FakeProbe};
    use std::time::Duration;

    fn service(probes: &[Arc<FakeProbe>]) -> HealthQueryService {
        HealthQueryService::new(Arc::new(fake_registry(probes)))
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("0").unwrap(), 0);
        assert_eq!(parse_index("17").unwrap(), 17);
        assert_eq!(parse_index("+2").unwrap(), 2);
        assert_eq!(parse_index("-1").unwrap(), -1);
        for token in ["", "abc", "1.5", " 1", "0x1", "99999999999999999999"] {
            assert!(
                matches!(parse_index(token), Err(Error::MalformedIndex(_))),
                "{:?} should be malformed",
                token
            );
        }
    }

    #[test]
    fn test_unprobed_targets_fail_closed() {
        let service = service(&[FakeProbe::alive(), FakeProbe::alive()]);
        for index in 0..2 {
            let snapshot = service.query(index).unwrap();
            assert_eq!(snapshot.status, HealthState::Unknown);
            assert!(!snapshot.is_healthy());
        }
    }

    #[test]
    fn test_query_resolves_configured_endpoint() {
        let service = service(&[FakeProbe::alive(), FakeProbe::dead(), FakeProbe::alive()]);
        for index in 0..3 {
            let snapshot = service.query(index).unwrap();
            assert_eq!(snapshot.index, index as usize);
            assert_eq!(snapshot.endpoint, format!("10.0.0.{}:6379", index));
        }
        assert_eq!(service.query_token("2").unwrap().endpoint, "10.0.0.2:6379");
        assert_eq!(service.query_sole().unwrap().endpoint, "10.0.0.0:6379");
    }

    #[test]
    fn test_out_of_range() {
        let service = service(&[FakeProbe::alive(), FakeProbe::alive()]);
        for index in [2, 3, -1, i64::MIN, i64::MAX] {
            match service.query(index) {
                Err(Error::IndexOutOfRange { index: got, len }) => {
                    assert_eq!(got, index);
                    assert_eq!(len, 2);
                }
                other => panic!("index {} gave {:?}", index, other),
            }
        }
        assert!(matches!(service.query_token("-1"), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(service.query_token("abc"), Err(Error::MalformedIndex(_))));
    }

    #[tokio::test]
    async fn test_reflects_latest_poll() {
        let probes = [FakeProbe::alive(), FakeProbe::dead()];
        let service = service(&probes);
        let mut poller = HealthPoller::new(Arc::clone(service.registry()), Duration::from_millis(500));

        poller.poll_once().await;
        assert!(service.query(0).unwrap().is_healthy());
        assert!(!service.query(1).unwrap().is_healthy());

        probes[0].set_alive(false);
        probes[1].set_alive(true);
        poller.poll_once().await;
        assert!(!service.query(0).unwrap().is_healthy());
        assert!(service.query(1).unwrap().is_healthy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_during_writes() {
        let service = service(&[FakeProbe::alive(), FakeProbe::alive()]);
        let registry = Arc::clone(service.registry());
        registry.get(0).unwrap().publish(ProbeOutcome::Success);

        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for i in 0..10_000 {
                    let outcome = if i % 2 == 0 { ProbeOutcome::Failure } else { ProbeOutcome::Success };
                    registry.get(0).unwrap().publish(outcome);
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                registry.get(0).unwrap().publish(ProbeOutcome::Success);
            })
        };

        let readers: Vec<_> = (0..32)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    for i in 0..2_000 {
                        let first = service.query(0).unwrap();
                        assert_ne!(first.status, HealthState::Unknown);
                        assert_eq!(first.endpoint, "10.0.0.0:6379");
                        // Writes to target 0 never leak into target 1.
                        assert_eq!(service.query(1).unwrap().status, HealthState::Unknown);
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(30), async {
            writer.await.unwrap();
            for reader in readers {
                reader.await.unwrap();
            }
        })
        .await
        .expect("readers or writer deadlocked");

        // Once the write has completed, every reader sees it.
        let after: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.query(0).unwrap().status })
            })
            .collect();
        for handle in after {
            assert_eq!(handle.await.unwrap(), HealthState::Healthy);
        }
    }
}
