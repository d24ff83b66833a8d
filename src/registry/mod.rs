//! Registry of monitored targets
//!
//! Built once at startup and never resized. Index `i` refers to the same
//! endpoint for the lifetime of the process. Each target owns its own health
//! cell, so the poller and HTTP readers never share a lock.

use crate::error::{Error, Result};
use crate::models::{AtomicHealth, HealthSnapshot, HealthState, ProbeOutcome};
use crate::probe::{Probe, RedisProbe};
use std::fmt;
use std::sync::Arc;

/// Builds the probe for one endpoint address.
pub type ProbeFactory = Box<dyn FnOnce(&str) -> Result<Arc<dyn Probe>> + Send>;

/// One monitored store endpoint.
pub struct MonitoredTarget {
    index: usize,
    endpoint: String,
    probe: Arc<dyn Probe>,
    health: AtomicHealth,
}

impl MonitoredTarget {
    fn new(index: usize, endpoint: String, probe: Arc<dyn Probe>) -> Self {
        Self {
            index,
            endpoint,
            probe,
            health: AtomicHealth::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }

    pub fn health(&self) -> HealthState {
        self.health.load()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            index: self.index,
            endpoint: self.endpoint.clone(),
            status: self.health(),
        }
    }

    /// Publish a probe outcome, returning the previous state.
    /// Only the poller writes health.
    pub(crate) fn publish(&self, outcome: ProbeOutcome) -> HealthState {
        self.health.publish(outcome)
    }
}

impl fmt::Debug for MonitoredTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredTarget")
            .field("index", &self.index)
            .field("endpoint", &self.endpoint)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

/// Fixed, ordered set of targets addressable by index.
#[derive(Debug)]
pub struct TargetRegistry {
    targets: Vec<MonitoredTarget>,
}

impl TargetRegistry {
    /// Build the registry from `(address, factory)` pairs, in order.
    ///
    /// Fails if the list is empty or any factory rejects its address.
    pub fn build<I>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, ProbeFactory)>,
    {
        let mut targets = Vec::new();
        for (index, (endpoint, factory)) in endpoints.into_iter().enumerate() {
            let probe = factory(&endpoint)?;
            targets.push(MonitoredTarget::new(index, endpoint, probe));
        }

        if targets.is_empty() {
            return Err(Error::Config("no endpoints configured".to_string()));
        }
        Ok(Self { targets })
    }

    /// Build the registry using one factory for every address.
    pub fn with_factory<F>(endpoints: &[String], factory: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Arc<dyn Probe>>,
    {
        let mut targets = Vec::with_capacity(endpoints.len());
        for (index, endpoint) in endpoints.iter().enumerate() {
            let probe = factory(endpoint)?;
            targets.push(MonitoredTarget::new(index, endpoint.clone(), probe));
        }

        if targets.is_empty() {
            return Err(Error::Config("no endpoints configured".to_string()));
        }
        Ok(Self { targets })
    }

    /// Build a registry of `RedisProbe`s sharing one password and database.
    pub fn redis(endpoints: &[String], password: Option<&str>, db: i64) -> Result<Self> {
        Self::with_factory(endpoints, |endpoint| {
            let probe = RedisProbe::connect(endpoint, password, db)?;
            Ok(Arc::new(probe) as Arc<dyn Probe>)
        })
    }

    pub fn size(&self) -> usize {
        self.targets.len()
    }

    /// Bounds-checked access to the target at `index`.
    pub fn get(&self, index: usize) -> Result<&MonitoredTarget> {
        self.targets.get(index).ok_or(Error::IndexOutOfRange {
            index: index as i64,
            len: self.targets.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitoredTarget> {
        self.targets.iter()
    }

    pub fn endpoints(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.endpoint()).collect()
    }
}
