//! Configuration for the relay pipeline.
//!
//! Groups the knobs the ingestion side needs:
//!
//! - race correlation window and table size (`correlation`),
//! - how long one provider poll may block (`poll_timeout`),
//! - peer label bounds (`peer_labels`).
//!
//! The exporter binary builds this from its CLI, environment and config
//! file layers; tests use `RelayConfig::default()`.

use std::time::Duration;

use crate::correlation::CorrelationConfig;

/// Bounds on the free-form `peer` label.
#[derive(Clone, Debug)]
pub struct PeerLabelConfig {
    /// Distinct peer values kept before new peers fold into `overflow`.
    pub max_labels: usize,
    /// Characters kept from a peer identifier.
    pub max_len: usize,
}

impl Default for PeerLabelConfig {
    fn default() -> Self {
        Self {
            max_labels: 256,
            max_len: 48,
        }
    }
}

/// Top-level configuration for the ingestion pipeline.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Node identity put on every per-node series.
    pub node_name: String,
    pub correlation: CorrelationConfig,
    pub poll_timeout: Duration,
    pub peer_labels: PeerLabelConfig,
    /// Log every event at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_string(),
            correlation: CorrelationConfig::default(),
            poll_timeout: Duration::from_millis(1000),
            peer_labels: PeerLabelConfig::default(),
            verbose: false,
        }
    }
}
