use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Liveness classification currently held for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum HealthState {
    /// No probe has completed yet
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthState {
    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Healthy,
            2 => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }

    /// Only a completed, successful probe counts. `Unknown` fails closed.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Result of one probe, as published by the poller.
///
/// There is no variant mapping back to `Unknown`, so a published state can
/// only ever move between `Healthy` and `Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

impl From<ProbeOutcome> for HealthState {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success => HealthState::Healthy,
            ProbeOutcome::Failure => HealthState::Unhealthy,
        }
    }
}

/// Lock-free cell holding a target's `HealthState`.
///
/// Single writer (the poller), any number of readers.
#[derive(Debug)]
pub struct AtomicHealth(AtomicU8);

impl AtomicHealth {
    pub fn new() -> Self {
        Self(AtomicU8::new(HealthState::Unknown as u8))
    }

    pub fn load(&self) -> HealthState {
        HealthState::from_code(self.0.load(Ordering::Acquire))
    }

    /// Store the outcome and return the state it replaced.
    pub fn publish(&self, outcome: ProbeOutcome) -> HealthState {
        let next: HealthState = outcome.into();
        HealthState::from_code(self.0.swap(next as u8, Ordering::AcqRel))
    }
}

impl Default for AtomicHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one target, handed to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub index: usize,
    pub endpoint: String,
    pub status: HealthState,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Per-target entry of a `ProbeCycleLog`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResultLog {
    pub index: usize,
    pub endpoint: String,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Summary of one poll cycle, logged as JSON at debug level.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeCycleLog {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<ProbeResultLog>,
}

impl ProbeCycleLog {
    pub fn new(cycle: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle,
            started_at,
            duration_ms: 0,
            results: Vec::new(),
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.results.iter().filter(|r| r.healthy).count()
    }
}
