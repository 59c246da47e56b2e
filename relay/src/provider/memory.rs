//! Scripted in-memory provider.
//!
//! Clones share state, so a test can keep one handle to script records and
//! inspect attach/detach calls while the lifecycle manager owns another.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{AttachError, ProbeSpec, ProviderError, TracingProvider};
use crate::types::RawRecord;

enum Batch {
    Records(Vec<RawRecord>),
    Failure(String),
    Close,
}

#[derive(Default)]
struct State {
    refused: HashSet<String>,
    attached: Vec<ProbeSpec>,
    batches: VecDeque<Batch>,
    target: Option<PathBuf>,
    started: bool,
    closed: bool,
    detach_calls: usize,
}

/// Provider that replays queued batches.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `attach` fail for the given `provider:name` probe.
    pub fn refuse(self, probe: &str) -> Self {
        self.lock().refused.insert(probe.to_string());
        self
    }

    /// Refuses every probe.
    pub fn refuse_all(self) -> Self {
        for probe in super::PROBES {
            self.lock().refused.insert(probe.to_string());
        }
        self
    }

    /// Sets the path reported by [`TracingProvider::resolved_target`].
    pub fn with_target(self, path: impl Into<PathBuf>) -> Self {
        self.lock().target = Some(path.into());
        self
    }

    /// Queues one batch for a future `poll`.
    pub fn push_records(&self, records: Vec<RawRecord>) {
        self.lock().batches.push_back(Batch::Records(records));
    }

    /// Queues a failing `poll`.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().batches.push_back(Batch::Failure(message.into()));
    }

    /// Ends the stream: this and every later `poll` reports it closed.
    pub fn push_close(&self) {
        self.lock().batches.push_back(Batch::Close);
    }

    /// Probes attached so far.
    pub fn attached(&self) -> Vec<ProbeSpec> {
        self.lock().attached.clone()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Number of `detach` calls seen.
    pub fn detach_calls(&self) -> usize {
        self.lock().detach_calls
    }

    /// Batches not yet polled.
    pub fn queued(&self) -> usize {
        self.lock().batches.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TracingProvider for MemoryProvider {
    fn attach(&mut self, probe: &ProbeSpec) -> Result<(), AttachError> {
        let mut state = self.lock();
        let key = probe.to_string();
        if state.refused.contains(&key) {
            return Err(AttachError::Refused {
                probe: key,
                reason: "probe not present in target binary".to_string(),
            });
        }
        state.attached.push(*probe);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        self.lock().started = true;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, ProviderError> {
        let next = {
            let mut state = self.lock();
            if state.closed {
                return Err(ProviderError::Closed);
            }
            state.batches.pop_front()
        };
        match next {
            Some(Batch::Records(records)) => Ok(records),
            Some(Batch::Failure(message)) => Err(ProviderError::Protocol(message)),
            Some(Batch::Close) => {
                self.lock().closed = true;
                Err(ProviderError::Closed)
            }
            None => {
                thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }

    fn resolved_target(&mut self) -> Option<PathBuf> {
        self.lock().target.clone()
    }

    fn detach(&mut self) {
        let mut state = self.lock();
        state.attached.clear();
        state.started = false;
        state.detach_calls += 1;
    }
}
