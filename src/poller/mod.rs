//! Periodic health poller
//!
//! One task, one loop: sleep for the refresh interval, probe every target,
//! publish each result into the target's own health cell. A failed or slow
//! probe only ever degrades its own target; the loop itself never stops
//! until the shutdown signal fires.

use crate::error::Error;
use crate::logging::log_probe_cycle;
use crate::models::{HealthState, ProbeCycleLog, ProbeOutcome, ProbeResultLog};
use crate::registry::TargetRegistry;
use crate::utils::duration_to_ms;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poll interval used when none (or a too-small one) is configured
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;

/// Smallest poll interval accepted; protects the store from being hammered
pub const MIN_REFRESH_INTERVAL_MS: u64 = 500;

/// Apply the interval floor: anything below the minimum falls back to the
/// default, with a warning.
pub fn effective_refresh_interval(interval_ms: u64) -> u64 {
    if interval_ms < MIN_REFRESH_INTERVAL_MS {
        warn!(
            "Refresh interval {}ms is below the {}ms minimum, using {}ms instead",
            interval_ms, MIN_REFRESH_INTERVAL_MS, DEFAULT_REFRESH_INTERVAL_MS
        );
        DEFAULT_REFRESH_INTERVAL_MS
    } else {
        interval_ms
    }
}

/// Background loop that refreshes the health of every registry target.
pub struct HealthPoller {
    registry: Arc<TargetRegistry>,
    interval: Duration,
    probe_timeout: Duration,
    probe_on_start: bool,
    cycles: u64,
}

impl HealthPoller {
    /// Create a poller. The probe timeout starts out equal to the interval.
    pub fn new(registry: Arc<TargetRegistry>, interval: Duration) -> Self {
        let interval_ms = effective_refresh_interval(duration_to_ms(interval));
        let interval = Duration::from_millis(interval_ms);
        Self {
            registry,
            interval,
            probe_timeout: interval,
            probe_on_start: false,
            cycles: 0,
        }
    }

    /// Bound each probe by `timeout`, never longer than one interval.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = if timeout.is_zero() || timeout > self.interval {
            self.interval
        } else {
            timeout
        };
        self
    }

    /// Run one cycle immediately when the loop starts instead of waiting a
    /// full interval first.
    pub fn with_probe_on_start(mut self, probe_on_start: bool) -> Self {
        self.probe_on_start = probe_on_start;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Probe every target once and publish the results.
    ///
    /// Probes are issued in registry order and awaited together; each is cut
    /// off at the probe timeout even if the probe ignores its own deadline.
    pub async fn poll_once(&mut self) -> ProbeCycleLog {
        self.cycles += 1;
        let started = Instant::now();
        let mut cycle_log = ProbeCycleLog::new(self.cycles, Utc::now());
        let timeout = self.probe_timeout;

        let probes = self.registry.iter().map(|target| async move {
            match tokio::time::timeout(timeout, target.probe().ping(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(Error::ProbeTimeout {
                    endpoint: target.endpoint().to_string(),
                    timeout,
                }),
            }
        });
        let results = join_all(probes).await;

        for (target, result) in self.registry.iter().zip(results) {
            let outcome = match &result {
                Ok(()) => ProbeOutcome::Success,
                Err(_) => ProbeOutcome::Failure,
            };
            let previous = target.publish(outcome);
            let error = result.err().map(|e| e.to_string());

            match (previous, outcome) {
                (HealthState::Healthy, ProbeOutcome::Failure) | (HealthState::Unknown, ProbeOutcome::Failure) => {
                    warn!(
                        "Target {} ({}) is UNHEALTHY: {}",
                        target.index(),
                        target.endpoint(),
                        error.as_deref().unwrap_or("probe failed")
                    );
                }
                (HealthState::Unhealthy, ProbeOutcome::Success) | (HealthState::Unknown, ProbeOutcome::Success) => {
                    info!("Target {} ({}) is HEALTHY", target.index(), target.endpoint());
                }
                (_, ProbeOutcome::Failure) => {
                    debug!(
                        "Target {} ({}) still failing: {}",
                        target.index(),
                        target.endpoint(),
                        error.as_deref().unwrap_or("probe failed")
                    );
                }
                _ => {}
            }

            cycle_log.results.push(ProbeResultLog {
                index: target.index(),
                endpoint: target.endpoint().to_string(),
                healthy: outcome == ProbeOutcome::Success,
                error,
            });
        }

        cycle_log.duration_ms = duration_to_ms(started.elapsed());
        log_probe_cycle(&cycle_log);
        cycle_log
    }

    /// Poll until `shutdown` flips to `true` (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Health poller started: {} targets, every {}ms, probe timeout {}ms",
            self.registry.size(),
            self.interval.as_millis(),
            self.probe_timeout.as_millis()
        );

        if self.probe_on_start && !*shutdown.borrow() {
            self.poll_once().await;
        }

        while !*shutdown.borrow() {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health poller stopped after {} cycles", self.cycles);
    }

    /// Run the loop on its own task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
