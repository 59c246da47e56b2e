//! Probe lifecycle manager.
//!
//! Owns the tracing provider from the first attach to the final detach.
//! Each probe is attached on its own; failures are counted and logged and
//! the remaining probes are still tried. Two situations are fatal: nothing
//! at all attached, or the record stream closed after start.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics::catalog::{ERRORS, PROBES_ATTACHED, error_type};
use crate::metrics::{MetricsError, MetricsStore};
use crate::provider::{PROBES, ProbeSpec, ProviderError, TracingProvider};
use crate::types::RawRecord;

/// Where the manager is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unattached,
    Attaching,
    Attached { attached: usize, total: usize },
    Failed,
    Detached,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unattached => f.write_str("unattached"),
            LifecycleState::Attaching => f.write_str("attaching"),
            LifecycleState::Attached { attached, total } => {
                write!(f, "attached ({attached} of {total})")
            }
            LifecycleState::Failed => f.write_str("failed"),
            LifecycleState::Detached => f.write_str("detached"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no probes could be attached ({total} tried)")]
    NoProbesAttached { total: usize },

    #[error("cannot attach probes while {0}")]
    InvalidState(LifecycleState),

    #[error("failed to start the probe stream: {0}")]
    Start(#[from] ProviderError),

    #[error("probe stream closed by the provider")]
    StreamClosed,

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Result of comparing the provider's target with the configured binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetCheck {
    Matches(PathBuf),
    Mismatch { expected: PathBuf, actual: PathBuf },
    Unknown,
}

/// Attaches, polls and releases a [`TracingProvider`].
pub struct ProbeLifecycle<P: TracingProvider> {
    provider: P,
    metrics: Arc<MetricsStore>,
    probes: Vec<ProbeSpec>,
    state: LifecycleState,
}

impl<P: TracingProvider> ProbeLifecycle<P> {
    /// Manages every known probe.
    pub fn new(provider: P, metrics: Arc<MetricsStore>) -> Self {
        Self::with_probes(provider, metrics, PROBES.to_vec())
    }

    pub fn with_probes(provider: P, metrics: Arc<MetricsStore>, probes: Vec<ProbeSpec>) -> Self {
        Self {
            provider,
            metrics,
            probes,
            state: LifecycleState::Unattached,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Compares the binary the provider attached to with `expected`.
    ///
    /// Both paths are resolved through symlinks first. A mismatch is only
    /// logged: the operator may be pointing at a wrapper script.
    pub fn verify_target(&mut self, expected: &Path) -> TargetCheck {
        let Some(actual) = self.provider.resolved_target() else {
            warn!(expected = %expected.display(), "could not determine target binary");
            return TargetCheck::Unknown;
        };

        let expected = canonical(expected);
        let actual = canonical(&actual);
        if expected == actual {
            info!(target = %actual.display(), "target binary verified");
            TargetCheck::Matches(actual)
        } else {
            warn!(
                expected = %expected.display(),
                actual = %actual.display(),
                "binary path mismatch: probes attach to the running process's binary"
            );
            TargetCheck::Mismatch { expected, actual }
        }
    }

    /// Attaches every probe, then starts the record stream.
    ///
    /// Returns the number of probes attached. Fails only if none attached,
    /// in which case the exporter is marked down.
    pub fn attach_all(&mut self) -> Result<usize, LifecycleError> {
        if self.state != LifecycleState::Unattached {
            return Err(LifecycleError::InvalidState(self.state));
        }
        self.state = LifecycleState::Attaching;

        let total = self.probes.len();
        let mut attached = 0;
        for probe in &self.probes {
            match self.provider.attach(probe) {
                Ok(()) => {
                    info!(%probe, "attached probe");
                    attached += 1;
                }
                Err(e) => {
                    warn!(%probe, error = %e, "failed to attach probe");
                    self.metrics.increment(ERRORS, &[error_type::ATTACH], 1.0)?;
                }
            }
        }
        self.metrics.set(PROBES_ATTACHED, &[], attached as f64)?;

        if attached == 0 {
            self.state = LifecycleState::Failed;
            self.metrics.mark_down()?;
            error!("no probes attached; likely causes:");
            error!("  - the binary was built without USDT tracepoint support");
            error!("  - the PID does not belong to a process running that binary");
            error!("  - insufficient privileges (root or CAP_BPF/CAP_PERFMON required)");
            return Err(LifecycleError::NoProbesAttached { total });
        }

        if let Err(e) = self.provider.start() {
            self.state = LifecycleState::Failed;
            self.metrics.mark_down()?;
            return Err(e.into());
        }

        self.state = LifecycleState::Attached { attached, total };
        if attached < total {
            warn!(attached, total, "running with a partial probe set");
        } else {
            info!(attached, "all probes attached");
        }
        Ok(attached)
    }

    /// Waits up to `timeout` for records.
    ///
    /// A closed stream cannot recover: the manager moves to `Failed`, zeroes
    /// the probe gauge and marks the exporter down before returning the
    /// error.
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, ProviderError> {
        if !matches!(self.state, LifecycleState::Attached { .. }) {
            return Err(ProviderError::NotStarted);
        }
        let result = self.provider.poll(timeout);
        if matches!(result, Err(ProviderError::Closed)) {
            self.fail_stream();
        }
        result
    }

    fn fail_stream(&mut self) {
        self.state = LifecycleState::Failed;
        error!("probe stream closed; no further events will be recorded");
        if let Err(e) = self.metrics.set(PROBES_ATTACHED, &[], 0.0) {
            warn!(error = %e, "failed to reset probe gauge");
        }
        if let Err(e) = self.metrics.mark_down() {
            warn!(error = %e, "failed to mark exporter down");
        }
    }

    /// Detaches every probe. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == LifecycleState::Detached {
            return;
        }
        self.provider.detach();
        self.state = LifecycleState::Detached;
        if let Err(e) = self.metrics.set(PROBES_ATTACHED, &[], 0.0) {
            warn!(error = %e, "failed to reset probe gauge");
        }
        info!("probes detached");
    }
}

impl<P: TracingProvider> Drop for ProbeLifecycle<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    fn metrics() -> Arc<MetricsStore> {
        let store = MetricsStore::new().expect("create metrics store");
        store
            .mark_up(std::time::SystemTime::now())
            .expect("mark up");
        Arc::new(store)
    }

    #[test]
    fn partial_attach_keeps_running() {
        let provider = MemoryProvider::new().refuse("udp:block_send_start");
        let metrics = metrics();
        let mut lifecycle = ProbeLifecycle::new(provider.clone(), metrics.clone());

        assert_eq!(lifecycle.attach_all().unwrap(), 3);
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Attached {
                attached: 3,
                total: 4
            }
        );
        assert_eq!(metrics.value(PROBES_ATTACHED, &[]).unwrap(), 3.0);
        assert_eq!(metrics.value(ERRORS, &[error_type::ATTACH]).unwrap(), 1.0);
        assert!(metrics.is_up());
        assert!(provider.is_started());
    }

    #[test]
    fn no_probes_attached_is_fatal() {
        let provider = MemoryProvider::new().refuse_all();
        let metrics = metrics();
        let mut lifecycle = ProbeLifecycle::new(provider.clone(), metrics.clone());

        assert!(matches!(
            lifecycle.attach_all(),
            Err(LifecycleError::NoProbesAttached { total: 4 })
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert_eq!(metrics.value(PROBES_ATTACHED, &[]).unwrap(), 0.0);
        assert_eq!(metrics.value(ERRORS, &[error_type::ATTACH]).unwrap(), 4.0);
        assert!(!metrics.is_up());
        assert!(!provider.is_started());
    }

    #[test]
    fn attaching_twice_is_rejected() {
        let mut lifecycle = ProbeLifecycle::new(MemoryProvider::new(), metrics());
        lifecycle.attach_all().unwrap();
        assert!(matches!(
            lifecycle.attach_all(),
            Err(LifecycleError::InvalidState(_))
        ));
    }

    #[test]
    fn poll_requires_attached_probes() {
        let mut lifecycle = ProbeLifecycle::new(MemoryProvider::new(), metrics());
        assert!(matches!(
            lifecycle.poll(Duration::ZERO),
            Err(ProviderError::NotStarted)
        ));
    }

    #[test]
    fn closed_stream_marks_the_exporter_down() {
        let provider = MemoryProvider::new();
        let metrics = metrics();
        let mut lifecycle = ProbeLifecycle::new(provider.clone(), metrics.clone());
        lifecycle.attach_all().unwrap();
        provider.push_close();

        assert!(matches!(
            lifecycle.poll(Duration::ZERO),
            Err(ProviderError::Closed)
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert_eq!(metrics.value(PROBES_ATTACHED, &[]).unwrap(), 0.0);
        assert!(!metrics.is_up());
        assert!(matches!(
            lifecycle.poll(Duration::ZERO),
            Err(ProviderError::NotStarted)
        ));

        lifecycle.shutdown();
        assert_eq!(provider.detach_calls(), 1);
    }

    #[test]
    fn drop_detaches_exactly_once() {
        let provider = MemoryProvider::new();
        {
            let mut lifecycle = ProbeLifecycle::new(provider.clone(), metrics());
            lifecycle.attach_all().unwrap();
            lifecycle.shutdown();
            assert_eq!(lifecycle.state(), LifecycleState::Detached);
        }
        assert_eq!(provider.detach_calls(), 1);
        assert!(provider.attached().is_empty());
    }

    #[test]
    fn target_verification_resolves_paths() {
        let dir = std::env::temp_dir();
        let provider = MemoryProvider::new().with_target(dir.join("."));
        let mut lifecycle = ProbeLifecycle::new(provider, metrics());
        assert!(matches!(
            lifecycle.verify_target(&dir),
            TargetCheck::Matches(_)
        ));

        let provider = MemoryProvider::new().with_target("/definitely/not/bitcoind");
        let mut lifecycle = ProbeLifecycle::new(provider, metrics());
        assert!(matches!(
            lifecycle.verify_target(Path::new("/usr/bin/bitcoind")),
            TargetCheck::Mismatch { .. }
        ));

        let mut lifecycle = ProbeLifecycle::new(MemoryProvider::new(), metrics());
        assert_eq!(
            lifecycle.verify_target(Path::new("/usr/bin/bitcoind")),
            TargetCheck::Unknown
        );
    }
}
