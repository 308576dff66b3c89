//! Controller errors and best-effort teardown reports.

use std::fmt;

use crate::types::PeerAddr;

/// Errors surfaced by the controller's public operations.
///
/// Every variant leaves the affected group in a well-defined state: either
/// unchanged, fully rolled back, or (for teardown paths) advanced as far as
/// possible with the per-step failures kept in a [`Teardown`].
#[derive(Debug, thiserror::Error)]
pub enum BandupError {
    #[error("invalid group configuration: {0}")]
    Configuration(String),

    #[error("failed to bind {iface} to master {master}")]
    Binding {
        iface: String,
        master: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist membership of group {group}")]
    Persistence {
        group: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to duplicate session of group {group} onto {iface}")]
    Duplication {
        group: String,
        iface: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to configure device sensitivity for group {group}")]
    DeviceSensitivity {
        group: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("traffic poller failed for group {group}")]
    Poller {
        group: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to arm signal monitor on {iface}")]
    SignalMonitor {
        iface: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to disconnect {peer} from {iface}")]
    Disconnect {
        iface: String,
        peer: PeerAddr,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("peer {peer} is not a member of group {group}")]
    UnknownPeer { group: String, peer: PeerAddr },

    #[error("interface {iface} does not belong to group {group}")]
    UnknownInterface { group: String, iface: String },

    #[error("dispatch runtime is no longer running")]
    RuntimeGone,
}

pub type Result<T, E = BandupError> = std::result::Result<T, E>;

// ─── Teardown Reports ───────────────────────────────────────────────────────

/// A step inside a best-effort loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Unbind,
    Dedup,
    Transfer,
    Persist,
    DeviceSensitivity,
    StopPoller,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Unbind => "unbind",
            Step::Dedup => "dedup",
            Step::Transfer => "transfer",
            Step::Persist => "persist",
            Step::DeviceSensitivity => "device_sensitivity",
            Step::StopPoller => "stop_poller",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed step of a best-effort loop.
#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub iface: String,
    pub error: anyhow::Error,
}

/// Outcome of a teardown loop that must always make forward progress.
///
/// Failures are recorded in the order they happened; the loop itself never
/// stops early.
#[derive(Debug, Default)]
pub struct Teardown {
    pub failures: Vec<StepFailure>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, step: Step, iface: &str, error: anyhow::Error) {
        let detail = format!("{error:#}");
        tracing::warn!(step = %step, iface = %iface, error = %detail, "teardown step failed");
        self.failures.push(StepFailure {
            step,
            iface: iface.to_string(),
            error,
        });
    }

    /// Run `op`, recording its error under `step` instead of returning it.
    pub fn attempt(&mut self, step: Step, iface: &str, op: impl FnOnce() -> anyhow::Result<()>) {
        if let Err(e) = op() {
            self.record(step, iface, e);
        }
    }

    pub fn merge(&mut self, other: Teardown) {
        self.failures.extend(other.failures);
    }

    /// Failures of a given step, in order.
    pub fn failed(&self, step: Step) -> impl Iterator<Item = &StepFailure> {
        self.failures.iter().filter(move |f| f.step == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_group() {
        let err = BandupError::UnknownGroup("g1".into());
        assert_eq!(err.to_string(), "unknown group: g1");
    }

    #[test]
    fn test_display_unknown_peer() {
        let err = BandupError::UnknownPeer {
            group: "g1".into(),
            peer: PeerAddr::new([2, 0, 0, 0, 0, 1]),
        };
        assert_eq!(err.to_string(), "peer 02:00:00:00:00:01 is not a member of group g1");
    }

    #[test]
    fn test_duplication_keeps_source() {
        let err = BandupError::Duplication {
            group: "g1".into(),
            iface: "wlan2".into(),
            source: anyhow::anyhow!("firmware busy"),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "firmware busy");
    }

    #[test]
    fn teardown_attempt_records_only_failures() {
        let mut td = Teardown::new();
        td.attempt(Step::Transfer, "wlan1", || Ok(()));
        td.attempt(Step::Dedup, "wlan1", || Err(anyhow::anyhow!("gone")));
        assert!(!td.is_clean());
        assert_eq!(td.failures.len(), 1);
        assert_eq!(td.failed(Step::Dedup).count(), 1);
        assert_eq!(td.failures[0].iface, "wlan1");
    }
}
