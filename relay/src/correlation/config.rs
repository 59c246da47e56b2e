use std::time::Duration;

/// Tuning knobs for the race correlator.
#[derive(Clone, Debug)]
pub struct CorrelationConfig {
    /// How long a half-joined race may wait for its other half.
    ///
    /// Defaults to the target block interval: a partner that shows up later
    /// than that almost certainly belongs to a different block.
    pub race_window: Duration,
    /// Maximum number of races waiting for their other half.
    pub max_pending: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            race_window: Duration::from_secs(600),
            max_pending: 64,
        }
    }
}
