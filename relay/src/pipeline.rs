//! Ingestion pipeline: decode, classify, correlate and record.
//!
//! [`Pipeline`] holds all single-threaded state (the race correlator and
//! the peer labeler) and writes through a shared [`MetricsStore`].
//! [`run_ingestion`] is the blocking loop that feeds it from the probe
//! lifecycle manager until the shutdown flag is raised.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::config::RelayConfig;
use crate::correlation::{Latencies, LossReason, RaceCorrelator, RaceOutcome, RacePart};
use crate::decode::decode;
use crate::lifecycle::{LifecycleError, ProbeLifecycle};
use crate::metrics::catalog::{
    BLOCK_DELIVERIES, BLOCK_TX_COUNT, BLOCKS_CONNECTED, BLOCKS_RECONSTRUCTED, BLOCKS_SENT,
    CHUNKS_RECEIVED_TOTAL, CHUNKS_USED, CHUNKS_USED_TOTAL, CONNECTION_SECONDS,
    DELIVERY_LATENCY_SECONDS, ERRORS, EVENTS_PROCESSED, LAST_BLOCK_HEIGHT, RACE_CORRELATIONS_LOST,
    RACE_MARGIN_SECONDS, RACE_PENDING, RACE_WINS, RECONSTRUCTION_SECONDS, error_type,
};
use crate::metrics::{MetricsError, MetricsStore, PeerLabeler};
use crate::provider::{ProviderError, TracingProvider};
use crate::types::{DeliveryWinner, Event, Height, RawRecord};

/// Turns raw probe records into metric updates.
pub struct Pipeline {
    node: String,
    verbose: bool,
    metrics: Arc<MetricsStore>,
    correlator: RaceCorrelator,
    peers: PeerLabeler,
}

impl Pipeline {
    pub fn new(config: &RelayConfig, metrics: Arc<MetricsStore>) -> Self {
        Self {
            node: config.node_name.clone(),
            verbose: config.verbose,
            metrics,
            correlator: RaceCorrelator::new(config.correlation.clone()),
            peers: PeerLabeler::new(config.peer_labels.max_labels, config.peer_labels.max_len),
        }
    }

    pub fn correlator(&self) -> &RaceCorrelator {
        &self.correlator
    }

    /// Decodes and applies one record.
    ///
    /// A record that does not decode is counted and dropped. Only a metrics
    /// store misuse is returned as an error.
    pub fn handle_record(&mut self, raw: &RawRecord, now: Instant) -> Result<(), MetricsError> {
        let event = match decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping undecodable record");
                return self.metrics.increment(ERRORS, &[error_type::DECODE], 1.0);
            }
        };

        self.metrics
            .increment(EVENTS_PROCESSED, &[event.tag().as_str()], 1.0)?;
        if self.verbose {
            info!(node = %self.node, ?event, "probe event");
        } else {
            debug!(node = %self.node, ?event, "probe event");
        }
        self.apply(event, now)
    }

    /// Retires races whose window has passed. Called on every loop tick so
    /// records expire while the feed is idle.
    pub fn tick(&mut self, now: Instant) -> Result<(), MetricsError> {
        let outcomes = self.correlator.expire(now);
        self.record_outcomes(outcomes)
    }

    fn apply(&mut self, event: Event, now: Instant) -> Result<(), MetricsError> {
        let node = [self.node.as_str()];
        match event {
            Event::BlockReconstructed(e) => {
                self.metrics.increment(BLOCKS_RECONSTRUCTED, &node, 1.0)?;
                if let Some(duration) = e.duration {
                    self.metrics
                        .observe(RECONSTRUCTION_SECONDS, &node, duration.as_secs_f64())?;
                }
                self.metrics
                    .observe(CHUNKS_USED, &node, f64::from(e.chunks_used))?;
                self.metrics
                    .increment(CHUNKS_USED_TOTAL, &node, f64::from(e.chunks_used))?;
                self.metrics
                    .increment(CHUNKS_RECEIVED_TOTAL, &node, f64::from(e.chunks_received))?;
            }
            Event::BlockSendStarted => {
                self.metrics.increment(BLOCKS_SENT, &node, 1.0)?;
            }
            Event::DeliveryWinner(w) => {
                self.record_delivery(&w)?;
                let outcomes = self.correlator.observe(RacePart::Winner(w), now);
                self.record_outcomes(outcomes)?;
            }
            Event::DeliveryTiming(t) => {
                let outcomes = self.correlator.observe(RacePart::Timing(t), now);
                self.record_outcomes(outcomes)?;
            }
            Event::DeliveryRace(race) => {
                self.record_delivery(&race.winner)?;
                let mut outcomes = self.correlator.expire(now);
                outcomes.push(self.correlator.observe_joined(&race));
                self.record_outcomes(outcomes)?;
            }
            Event::BlockConnected(c) => {
                self.metrics.increment(BLOCKS_CONNECTED, &node, 1.0)?;
                self.set_height(c.height)?;
                if let Some(elapsed) = c.connection_time.filter(|d| !d.is_zero()) {
                    self.metrics
                        .observe(CONNECTION_SECONDS, &node, elapsed.as_secs_f64())?;
                }
                if let Some(tx_count) = c.tx_count.filter(|n| *n > 0) {
                    self.metrics
                        .observe(BLOCK_TX_COUNT, &node, f64::from(tx_count))?;
                }
            }
        }
        Ok(())
    }

    fn record_delivery(&mut self, winner: &DeliveryWinner) -> Result<(), MetricsError> {
        let mechanism = classify(&winner.winner_tag);
        let peer = self.peers.label(&winner.peer_id);
        self.metrics.increment(
            BLOCK_DELIVERIES,
            &[self.node.as_str(), mechanism.as_label(), peer.as_str()],
            1.0,
        )?;
        self.set_height(winner.height)
    }

    fn set_height(&self, height: Height) -> Result<(), MetricsError> {
        self.metrics
            .set(LAST_BLOCK_HEIGHT, &[self.node.as_str()], f64::from(height))
    }

    fn record_outcomes(&self, outcomes: Vec<RaceOutcome>) -> Result<(), MetricsError> {
        for outcome in outcomes {
            match outcome {
                RaceOutcome::Completed(result) => {
                    let labels = [self.node.as_str(), result.winner.as_label()];
                    self.metrics.increment(RACE_WINS, &labels, 1.0)?;
                    if let Some(margin) = result.margin {
                        self.metrics
                            .observe(RACE_MARGIN_SECONDS, &labels, margin.as_secs_f64())?;
                    }
                    self.record_latencies(&result.latencies)?;
                    debug!(
                        height = result.height,
                        winner = %result.winner,
                        margin_ms = result.margin.map(|m| m.as_secs_f64() * 1000.0),
                        "race resolved"
                    );
                }
                RaceOutcome::Lost(lost) => {
                    self.metrics.increment(
                        RACE_CORRELATIONS_LOST,
                        &[self.node.as_str(), lost.reason.as_label()],
                        1.0,
                    )?;
                    if lost.reason == LossReason::Evicted {
                        warn!(height = lost.height, "race table full, evicted oldest race");
                        self.metrics
                            .increment(ERRORS, &[error_type::CORRELATION_OVERFLOW], 1.0)?;
                    } else {
                        debug!(
                            height = lost.height,
                            reason = lost.reason.as_label(),
                            "race retired incomplete"
                        );
                    }
                    self.record_latencies(&lost.latencies)?;
                }
            }
        }
        self.metrics.set(
            RACE_PENDING,
            &[self.node.as_str()],
            self.correlator.pending() as f64,
        )
    }

    fn record_latencies(&self, latencies: &Latencies) -> Result<(), MetricsError> {
        for (mechanism, latency) in latencies.iter() {
            self.metrics.observe(
                DELIVERY_LATENCY_SECONDS,
                &[self.node.as_str(), mechanism.as_label()],
                latency.as_secs_f64(),
            )?;
        }
        Ok(())
    }
}

/// Runs the ingestion loop until `shutdown` is set.
///
/// Meant for a dedicated blocking thread. Transient poll failures are
/// counted and the loop carries on. A closed record stream or a metrics
/// store misuse ends it with an error.
pub fn run_ingestion<P: TracingProvider>(
    lifecycle: &mut ProbeLifecycle<P>,
    pipeline: &mut Pipeline,
    poll_timeout: Duration,
    shutdown: &AtomicBool,
) -> Result<(), LifecycleError> {
    info!(poll_timeout_ms = poll_timeout.as_millis() as u64, "ingestion loop started");

    while !shutdown.load(Ordering::Acquire) {
        match lifecycle.poll(poll_timeout) {
            Ok(records) => {
                for raw in &records {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    pipeline.handle_record(raw, Instant::now())?;
                }
            }
            Err(ProviderError::Closed) => {
                pipeline
                    .metrics
                    .increment(ERRORS, &[error_type::POLL], 1.0)?;
                return Err(LifecycleError::StreamClosed);
            }
            Err(e) => {
                warn!(error = %e, "probe poll failed");
                pipeline
                    .metrics
                    .increment(ERRORS, &[error_type::POLL], 1.0)?;
            }
        }
        pipeline.tick(Instant::now())?;
    }

    info!("ingestion loop stopped");
    Ok(())
}
