//! Names, labels and buckets of every metric the exporter publishes.
//!
//! The store refuses to touch anything that is not declared here, so this
//! table is the full exposition surface.

/// Buckets for sub-second to multi-second durations.
pub const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Buckets for the number of FEC chunks used to rebuild a block.
pub const CHUNK_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0,
];

/// Buckets for transactions per connected block.
pub const TX_COUNT_BUCKETS: &[f64] = &[
    1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 3000.0, 5000.0, 10000.0,
];

/// Buckets for delivery latency and race margin. Races are usually decided
/// within tens of milliseconds, stragglers can take seconds.
pub const RACE_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

pub const BLOCKS_RECONSTRUCTED: &str = "fibre_blocks_reconstructed_total";
pub const RECONSTRUCTION_SECONDS: &str = "fibre_block_reconstruction_duration_seconds";
pub const CHUNKS_USED: &str = "fibre_block_chunks_used";
pub const CHUNKS_RECEIVED_TOTAL: &str = "fibre_chunks_received_total";
pub const CHUNKS_USED_TOTAL: &str = "fibre_chunks_used_total";
pub const BLOCKS_SENT: &str = "fibre_blocks_sent_total";
pub const BLOCK_DELIVERIES: &str = "fibre_block_deliveries_total";
pub const LAST_BLOCK_HEIGHT: &str = "fibre_last_block_height";

pub const RACE_WINS: &str = "fibre_race_wins_total";
pub const RACE_MARGIN_SECONDS: &str = "fibre_race_margin_seconds";
pub const DELIVERY_LATENCY_SECONDS: &str = "fibre_delivery_latency_seconds";
pub const RACE_CORRELATIONS_LOST: &str = "fibre_race_correlations_lost_total";
pub const RACE_PENDING: &str = "fibre_race_pending";

pub const BLOCKS_CONNECTED: &str = "bitcoin_blocks_connected_total";
pub const CONNECTION_SECONDS: &str = "bitcoin_block_connection_duration_seconds";
pub const BLOCK_TX_COUNT: &str = "bitcoin_block_tx_count";

pub const EXPORTER_UP: &str = "fibre_exporter_up";
pub const EXPORTER_START_TIME: &str = "fibre_exporter_start_time_seconds";
pub const EVENTS_PROCESSED: &str = "fibre_exporter_events_processed_total";
pub const ERRORS: &str = "fibre_exporter_errors_total";
pub const PROBES_ATTACHED: &str = "fibre_exporter_probes_attached";
pub const EXPORTER_INFO: &str = "fibre_exporter_info";

/// Values of the `error_type` label on [`ERRORS`].
pub mod error_type {
    pub const DECODE: &str = "decode";
    pub const ATTACH: &str = "attach";
    pub const POLL: &str = "poll";
    pub const CORRELATION_OVERFLOW: &str = "correlation_overflow";
}

/// What kind of series a metric is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram(&'static [f64]),
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram(_) => "histogram",
        }
    }
}

/// Declaration of one metric family.
#[derive(Clone, Copy, Debug)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
    pub kind: MetricKind,
}

const fn def(
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    kind: MetricKind,
) -> MetricDef {
    MetricDef {
        name,
        help,
        labels,
        kind,
    }
}

const NODE: &[&str] = &["node"];
const NODE_MECHANISM: &[&str] = &["node", "mechanism"];

/// Every metric family, in exposition order.
pub const DEFINITIONS: &[MetricDef] = &[
    def(
        BLOCKS_RECONSTRUCTED,
        "Total blocks reconstructed via FIBRE/UDP",
        NODE,
        MetricKind::Counter,
    ),
    def(
        RECONSTRUCTION_SECONDS,
        "Block reconstruction time",
        NODE,
        MetricKind::Histogram(DURATION_BUCKETS),
    ),
    def(
        CHUNKS_USED,
        "Number of chunks used per block",
        NODE,
        MetricKind::Histogram(CHUNK_BUCKETS),
    ),
    def(
        CHUNKS_RECEIVED_TOTAL,
        "Total chunks received",
        NODE,
        MetricKind::Counter,
    ),
    def(CHUNKS_USED_TOTAL, "Total chunks used", NODE, MetricKind::Counter),
    def(
        BLOCKS_SENT,
        "Total blocks sent via FIBRE/UDP",
        NODE,
        MetricKind::Counter,
    ),
    def(
        BLOCK_DELIVERIES,
        "Block deliveries by mechanism and peer",
        &["node", "mechanism", "peer"],
        MetricKind::Counter,
    ),
    def(
        LAST_BLOCK_HEIGHT,
        "Height of most recently processed block",
        NODE,
        MetricKind::Gauge,
    ),
    def(
        RACE_WINS,
        "Block delivery races won, by mechanism",
        NODE_MECHANISM,
        MetricKind::Counter,
    ),
    def(
        RACE_MARGIN_SECONDS,
        "How far ahead of the other mechanism the race winner delivered",
        NODE_MECHANISM,
        MetricKind::Histogram(RACE_BUCKETS),
    ),
    def(
        DELIVERY_LATENCY_SECONDS,
        "Block delivery latency per mechanism",
        NODE_MECHANISM,
        MetricKind::Histogram(RACE_BUCKETS),
    ),
    def(
        RACE_CORRELATIONS_LOST,
        "Races retired before both halves were seen",
        &["node", "reason"],
        MetricKind::Counter,
    ),
    def(
        RACE_PENDING,
        "Races waiting for their other half",
        NODE,
        MetricKind::Gauge,
    ),
    def(
        BLOCKS_CONNECTED,
        "Total blocks connected to the chain (all delivery paths)",
        NODE,
        MetricKind::Counter,
    ),
    def(
        CONNECTION_SECONDS,
        "Time to connect a block to the chain",
        NODE,
        MetricKind::Histogram(DURATION_BUCKETS),
    ),
    def(
        BLOCK_TX_COUNT,
        "Number of transactions per connected block",
        NODE,
        MetricKind::Histogram(TX_COUNT_BUCKETS),
    ),
    def(
        EXPORTER_UP,
        "Whether the FIBRE exporter is running (1 = up, 0 = down)",
        &[],
        MetricKind::Gauge,
    ),
    def(
        EXPORTER_START_TIME,
        "Unix timestamp when the exporter started",
        &[],
        MetricKind::Gauge,
    ),
    def(
        EVENTS_PROCESSED,
        "Total number of events processed by the exporter",
        &["event_type"],
        MetricKind::Counter,
    ),
    def(
        ERRORS,
        "Total number of errors encountered by the exporter",
        &["error_type"],
        MetricKind::Counter,
    ),
    def(
        PROBES_ATTACHED,
        "Number of USDT probes successfully attached",
        &[],
        MetricKind::Gauge,
    ),
    def(
        EXPORTER_INFO,
        "Information about the FIBRE exporter",
        &["version", "node_name", "bitcoind_path"],
        MetricKind::Gauge,
    ),
];
