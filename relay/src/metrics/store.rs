//! Owned metrics store backed by a private Prometheus registry.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;
use tracing::error;

use super::catalog::{
    DEFINITIONS, EXPORTER_INFO, EXPORTER_START_TIME, EXPORTER_UP, MetricDef, MetricKind,
};

/// Misuse of the metrics store.
///
/// These are programming errors: the caller named a metric or label set that
/// the catalog does not declare.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric {0} is not declared")]
    Undeclared(String),

    #[error("metric {name} is a {actual}, not a {expected}")]
    KindMismatch {
        name: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("metric {name} takes {expected} label values, got {actual}")]
    LabelMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid value {value} for metric {name}")]
    InvalidValue { name: &'static str, value: f64 },

    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Clone)]
enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

struct Entry {
    def: &'static MetricDef,
    family: Family,
}

/// Every declared metric, registered into a registry owned by this store.
///
/// There is no global registry: the store is created once, shared as an
/// `Arc` between the ingestion loop and the HTTP exposition, and dropped
/// with them. All updates go through atomics inside the Prometheus
/// primitives, so `&self` is enough for every operation.
pub struct MetricsStore {
    registry: Registry,
    entries: HashMap<&'static str, Entry>,
}

impl MetricsStore {
    /// Creates a store with every metric in [`DEFINITIONS`].
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_definitions(DEFINITIONS)
    }

    /// Creates a store that knows only `defs`.
    pub fn with_definitions(defs: &'static [MetricDef]) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut entries = HashMap::with_capacity(defs.len());

        for def in defs {
            let family = match def.kind {
                MetricKind::Counter => {
                    let vec = CounterVec::new(Opts::new(def.name, def.help), def.labels)?;
                    registry.register(Box::new(vec.clone()))?;
                    Family::Counter(vec)
                }
                MetricKind::Gauge => {
                    let vec = GaugeVec::new(Opts::new(def.name, def.help), def.labels)?;
                    registry.register(Box::new(vec.clone()))?;
                    Family::Gauge(vec)
                }
                MetricKind::Histogram(buckets) => {
                    let opts = HistogramOpts::new(def.name, def.help).buckets(buckets.to_vec());
                    let vec = HistogramVec::new(opts, def.labels)?;
                    registry.register(Box::new(vec.clone()))?;
                    Family::Histogram(vec)
                }
            };
            entries.insert(def.name, Entry { def, family });
        }

        Ok(Self { registry, entries })
    }

    /// Adds `delta` to a counter series.
    pub fn increment(&self, name: &str, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        let Family::Counter(vec) = family else {
            return Err(kind_mismatch(def, MetricKind::Counter));
        };
        if !delta.is_finite() || delta < 0.0 {
            return Err(MetricsError::InvalidValue {
                name: def.name,
                value: delta,
            });
        }
        vec.get_metric_with_label_values(labels)?.inc_by(delta);
        Ok(())
    }

    /// Records one observation into a histogram series.
    pub fn observe(&self, name: &str, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        let Family::Histogram(vec) = family else {
            return Err(kind_mismatch(def, MetricKind::Histogram(&[])));
        };
        if !value.is_finite() {
            return Err(MetricsError::InvalidValue {
                name: def.name,
                value,
            });
        }
        vec.get_metric_with_label_values(labels)?.observe(value);
        Ok(())
    }

    /// Sets a gauge series.
    pub fn set(&self, name: &str, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        let Family::Gauge(vec) = family else {
            return Err(kind_mismatch(def, MetricKind::Gauge));
        };
        if !value.is_finite() {
            return Err(MetricsError::InvalidValue {
                name: def.name,
                value,
            });
        }
        vec.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }

    /// Current value of a counter or gauge series.
    ///
    /// Reading a series that was never written creates it at zero.
    pub fn value(&self, name: &str, labels: &[&str]) -> Result<f64, MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        match family {
            Family::Counter(vec) => Ok(vec.get_metric_with_label_values(labels)?.get()),
            Family::Gauge(vec) => Ok(vec.get_metric_with_label_values(labels)?.get()),
            Family::Histogram(_) => Err(kind_mismatch(def, MetricKind::Gauge)),
        }
    }

    /// Number of observations in a histogram series.
    pub fn histogram_count(&self, name: &str, labels: &[&str]) -> Result<u64, MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        match family {
            Family::Histogram(vec) => Ok(vec.get_metric_with_label_values(labels)?.get_sample_count()),
            _ => Err(kind_mismatch(def, MetricKind::Histogram(&[]))),
        }
    }

    /// Sum of observations in a histogram series.
    pub fn histogram_sum(&self, name: &str, labels: &[&str]) -> Result<f64, MetricsError> {
        let (def, family) = self.resolve(name, labels)?;
        match family {
            Family::Histogram(vec) => Ok(vec.get_metric_with_label_values(labels)?.get_sample_sum()),
            _ => Err(kind_mismatch(def, MetricKind::Histogram(&[]))),
        }
    }

    /// Marks the exporter as running and stamps its start time.
    pub fn mark_up(&self, started_at: SystemTime) -> Result<(), MetricsError> {
        let secs = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.set(EXPORTER_START_TIME, &[], secs)?;
        self.set(EXPORTER_UP, &[], 1.0)
    }

    /// Marks the exporter as down.
    pub fn mark_down(&self) -> Result<(), MetricsError> {
        self.set(EXPORTER_UP, &[], 0.0)
    }

    /// Returns `true` between [`mark_up`](Self::mark_up) and
    /// [`mark_down`](Self::mark_down).
    pub fn is_up(&self) -> bool {
        self.value(EXPORTER_UP, &[]).is_ok_and(|v| v >= 1.0)
    }

    /// Publishes the static build and target description.
    pub fn set_info(
        &self,
        version: &str,
        node_name: &str,
        bitcoind_path: &str,
    ) -> Result<(), MetricsError> {
        self.set(EXPORTER_INFO, &[version, node_name, bitcoind_path], 1.0)
    }

    /// Encodes all metrics into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn resolve(
        &self,
        name: &str,
        labels: &[&str],
    ) -> Result<(&'static MetricDef, &Family), MetricsError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| MetricsError::Undeclared(name.to_string()))?;
        if entry.def.labels.len() != labels.len() {
            return Err(MetricsError::LabelMismatch {
                name: entry.def.name,
                expected: entry.def.labels.len(),
                actual: labels.len(),
            });
        }
        Ok((entry.def, &entry.family))
    }
}

fn kind_mismatch(def: &MetricDef, expected: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: def.name,
        expected: expected.as_str(),
        actual: def.kind.as_str(),
    }
}

impl std::fmt::Debug for MetricsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsStore")
            .field("families", &self.entries.len())
            .finish()
    }
}
