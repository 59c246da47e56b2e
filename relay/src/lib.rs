//! Relay library crate.
//!
//! This crate provides the building blocks of the block-relay probe
//! exporter:
//!
//! - strongly-typed probe events and their wire layout (`types`, `decode`),
//! - delivery mechanism classification (`classify`),
//! - joining of split block-race records (`correlation`),
//! - an owned Prometheus metrics store and its HTTP exposition (`metrics`),
//! - tracing providers that deliver raw records (`provider`),
//! - probe attach/detach management (`lifecycle`),
//! - and the ingestion loop tying them together (`pipeline`).
//!
//! The `fibre-exporter` binary composes these pieces with its own CLI,
//! logging and health endpoint.

pub mod classify;
pub mod config;
pub mod correlation;
pub mod decode;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod types;

pub use config::{PeerLabelConfig, RelayConfig};

// Re-export the decoder and classifier.
pub use classify::classify;
pub use decode::{DecodeError, decode, encode};

// Re-export the correlation engine.
pub use correlation::{
    CorrelationConfig, LossReason, LostRace, RaceCorrelator, RaceOutcome, RacePart, RaceResult,
};

// Re-export the metrics store and exposition.
pub use metrics::{MetricsAuth, MetricsError, MetricsStore, serve_metrics};

// Re-export providers and lifecycle management.
pub use lifecycle::{LifecycleError, LifecycleState, ProbeLifecycle, TargetCheck};
pub use provider::{
    AttachError, LoaderProvider, MemoryProvider, PROBES, ProbeSpec, ProviderError,
    TracingProvider,
};

pub use pipeline::{Pipeline, run_ingestion};

// Re-export domain types at the crate root for convenience.
pub use types::*;
