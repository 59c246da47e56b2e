//! Tracing providers.
//!
//! A provider attaches probes to the target process and hands back the raw
//! records they emit. The rest of the crate only talks to the
//! [`TracingProvider`] trait; two implementations ship:
//!
//! - [`LoaderProvider`] drives an external probe loader over pipes,
//! - [`MemoryProvider`] replays scripted records, for tests and dry runs.

pub mod loader;
pub mod memory;

pub use loader::LoaderProvider;
pub use memory::MemoryProvider;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::RawRecord;

/// One instrumentation point in the target binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeSpec {
    /// USDT provider name, e.g. `udp`.
    pub provider: &'static str,
    /// Probe name within the provider.
    pub name: &'static str,
}

impl ProbeSpec {
    pub const fn new(provider: &'static str, name: &'static str) -> Self {
        Self { provider, name }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

/// Every probe the exporter knows how to consume.
///
/// The three `udp` probes only fire on the FIBRE and compact-block paths;
/// `validation:block_connected` fires for every block.
pub const PROBES: [ProbeSpec; 4] = [
    ProbeSpec::new("udp", "block_reconstructed"),
    ProbeSpec::new("udp", "block_send_start"),
    ProbeSpec::new("udp", "block_race_winner"),
    ProbeSpec::new("validation", "block_connected"),
];

/// A single probe could not be attached.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("probe {probe} refused: {reason}")]
    Refused { probe: String, reason: String },

    #[error("provider cannot attach probes: {0}")]
    Unavailable(String),

    #[error("i/o error while attaching: {0}")]
    Io(#[from] io::Error),
}

/// Polling the provider failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider has not been started")]
    NotStarted,

    #[error("provider record stream closed")]
    Closed,

    #[error("provider protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Source of raw probe records.
///
/// The probe lifecycle manager owns the provider for its whole life: it
/// attaches probes, starts the stream, polls it from the ingestion loop and
/// detaches on shutdown.
pub trait TracingProvider: Send {
    /// Attaches one probe to the target.
    fn attach(&mut self, probe: &ProbeSpec) -> Result<(), AttachError>;

    /// Starts delivering records once the probes are attached.
    fn start(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Waits up to `timeout` for records and returns whatever arrived.
    ///
    /// An empty batch means the timeout elapsed.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, ProviderError>;

    /// Path of the binary the provider is actually attached to, if known.
    fn resolved_target(&mut self) -> Option<PathBuf>;

    /// Releases every probe. Must be idempotent.
    fn detach(&mut self);
}
