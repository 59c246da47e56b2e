//! Race correlator.
//!
//! The race-winner probe reports who delivered a block first and, in a
//! separate record, how long each mechanism took. The two records arrive in
//! no particular order. The correlator keys them by height, joins them,
//! and retires every pending record exactly once: completed, expired,
//! evicted or superseded.

use std::time::Instant;

use indexmap::IndexMap;

use crate::types::{DeliveryRace, Height};

use super::config::CorrelationConfig;
use super::record::{LossReason, RaceOutcome, RacePart, RaceRecord, resolve};

enum Action {
    Open,
    Merge,
    Reset,
}

/// Joins winner and timing halves of block races.
///
/// Pending records are kept in arrival order so the oldest one is evicted
/// first when the table is full. The correlator is driven by a single
/// ingestion loop and needs no locking.
pub struct RaceCorrelator {
    config: CorrelationConfig,
    pending: IndexMap<Height, RaceRecord>,
}

impl RaceCorrelator {
    pub fn new(config: CorrelationConfig) -> Self {
        let capacity = config.max_pending.max(1);
        Self {
            config,
            pending: IndexMap::with_capacity(capacity),
        }
    }

    /// Number of races waiting for their other half.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if a race at `height` is waiting for its other half.
    pub fn is_pending(&self, height: Height) -> bool {
        self.pending.contains_key(&height)
    }

    /// Feeds one half of a race.
    ///
    /// Returns every race retired by this call: stale records expired
    /// first, then whatever the new part completed, superseded or evicted.
    pub fn observe(&mut self, part: RacePart, now: Instant) -> Vec<RaceOutcome> {
        let mut retired = self.expire(now);
        let height = part.height();

        let action = match self.pending.get(&height) {
            None => Action::Open,
            Some(record) if record.holds(&part) => Action::Reset,
            Some(_) => Action::Merge,
        };

        match action {
            Action::Open => self.open(part, now, &mut retired),
            Action::Merge => {
                let complete = match self.pending.get_mut(&height) {
                    Some(record) => {
                        record.merge(part);
                        record.is_complete()
                    }
                    None => false,
                };
                if complete {
                    let result = self
                        .pending
                        .shift_remove(&height)
                        .and_then(RaceRecord::into_result);
                    retired.extend(result.map(RaceOutcome::Completed));
                }
            }
            Action::Reset => {
                // Same half again: the height now belongs to a different block.
                if let Some(stale) = self.pending.shift_remove(&height) {
                    retired.push(RaceOutcome::Lost(stale.into_lost(LossReason::Superseded)));
                }
                self.open(part, now, &mut retired);
            }
        }

        retired
    }

    /// Scores a race that arrived already joined.
    ///
    /// The pending table is not consulted or modified.
    pub fn observe_joined(&self, race: &DeliveryRace) -> RaceOutcome {
        RaceOutcome::Completed(resolve(Some(&race.winner), &race.timing))
    }

    /// Retires every record older than the race window.
    pub fn expire(&mut self, now: Instant) -> Vec<RaceOutcome> {
        let window = self.config.race_window;
        let stale: Vec<Height> = self
            .pending
            .iter()
            .filter(|(_, record)| record.is_expired(now, window))
            .map(|(height, _)| *height)
            .collect();

        stale
            .into_iter()
            .filter_map(|height| self.pending.shift_remove(&height))
            .map(|record| RaceOutcome::Lost(record.into_lost(LossReason::Expired)))
            .collect()
    }

    fn open(&mut self, part: RacePart, now: Instant, retired: &mut Vec<RaceOutcome>) {
        while self.pending.len() >= self.config.max_pending.max(1) {
            match self.pending.shift_remove_index(0) {
                Some((_, oldest)) => {
                    retired.push(RaceOutcome::Lost(oldest.into_lost(LossReason::Evicted)))
                }
                None => break,
            }
        }
        let record = RaceRecord::open(part, now);
        self.pending.insert(record.height(), record);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::correlation::record::{Latencies, LostRace, RaceResult};
    use crate::types::{DeliveryTiming, DeliveryWinner, Mechanism};

    fn winner(height: Height, tag: &str) -> RacePart {
        RacePart::Winner(DeliveryWinner {
            height,
            winner_tag: tag.to_string(),
            peer_id: "peer-1".to_string(),
        })
    }

    fn timing(height: Height, fibre_ms: u64, compact_ms: u64) -> RacePart {
        RacePart::Timing(DeliveryTiming {
            height,
            fibre_latency: Some(Duration::from_millis(fibre_ms)),
            compact_latency: Some(Duration::from_millis(compact_ms)),
        })
    }

    fn correlator(window_secs: u64, max_pending: usize) -> RaceCorrelator {
        RaceCorrelator::new(CorrelationConfig {
            race_window: Duration::from_secs(window_secs),
            max_pending,
        })
    }

    fn completed(outcome: &RaceOutcome) -> &RaceResult {
        match outcome {
            RaceOutcome::Completed(result) => result,
            other => panic!("expected a completed race, got {other:?}"),
        }
    }

    fn lost(outcome: &RaceOutcome) -> &LostRace {
        match outcome {
            RaceOutcome::Lost(lost) => lost,
            other => panic!("expected a lost race, got {other:?}"),
        }
    }

    #[test]
    fn winner_then_timing_emits_one_margin() {
        let mut c = correlator(600, 64);
        let now = Instant::now();

        assert!(c.observe(winner(100, "FIBRE"), now).is_empty());
        assert!(c.is_pending(100));

        let out = c.observe(timing(100, 50, 80), now);
        assert_eq!(out.len(), 1);
        let result = completed(&out[0]);
        assert_eq!(result.height, 100);
        assert_eq!(result.winner, Mechanism::FibreUdp);
        assert_eq!(result.margin, Some(Duration::from_millis(30)));
        assert!(!c.is_pending(100));
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn timing_then_winner_emits_the_same_margin() {
        let mut c = correlator(600, 64);
        let now = Instant::now();

        assert!(c.observe(timing(100, 50, 80), now).is_empty());
        let out = c.observe(winner(100, "FIBRE"), now + Duration::from_millis(5));

        assert_eq!(out.len(), 1);
        let result = completed(&out[0]);
        assert_eq!(result.winner, Mechanism::FibreUdp);
        assert_eq!(result.margin, Some(Duration::from_millis(30)));
        assert!(!c.is_pending(100));
    }

    #[test]
    fn timing_without_winner_expires_with_both_latencies() {
        let mut c = correlator(10, 64);
        let now = Instant::now();

        assert!(c.observe(timing(200, 50, 80), now).is_empty());
        assert!(c.expire(now + Duration::from_secs(9)).is_empty());

        let out = c.expire(now + Duration::from_secs(10));
        assert_eq!(out.len(), 1);
        let lost = lost(&out[0]);
        assert_eq!(lost.reason, LossReason::Expired);
        assert_eq!(
            lost.latencies,
            Latencies {
                fibre: Some(Duration::from_millis(50)),
                compact: Some(Duration::from_millis(80)),
            }
        );
        assert_eq!(lost.latencies.iter().count(), 2);
        assert!(!c.is_pending(200));
    }

    #[test]
    fn stale_records_expire_when_new_parts_arrive() {
        let mut c = correlator(10, 64);
        let now = Instant::now();

        c.observe(winner(1, "BIP152"), now);
        let out = c.observe(winner(2, "BIP152"), now + Duration::from_secs(11));

        assert_eq!(out.len(), 1);
        assert_eq!(lost(&out[0]).height, 1);
        assert!(c.is_pending(2));
    }

    #[test]
    fn full_table_evicts_oldest_arrival() {
        let mut c = correlator(600, 2);
        let now = Instant::now();

        c.observe(winner(10, "FIBRE"), now);
        c.observe(winner(11, "FIBRE"), now);
        let out = c.observe(winner(12, "FIBRE"), now);

        assert_eq!(out.len(), 1);
        let evicted = lost(&out[0]);
        assert_eq!(evicted.height, 10);
        assert_eq!(evicted.reason, LossReason::Evicted);
        assert_eq!(c.pending(), 2);
        assert!(c.is_pending(11) && c.is_pending(12));
    }

    #[test]
    fn repeated_half_resets_the_height() {
        let mut c = correlator(600, 64);
        let now = Instant::now();

        c.observe(winner(300, "FIBRE"), now);
        let out = c.observe(winner(300, "BIP152"), now);
        assert_eq!(out.len(), 1);
        assert_eq!(lost(&out[0]).reason, LossReason::Superseded);

        // The fresh record joins with the new block's timing.
        let out = c.observe(timing(300, 90, 40), now);
        let result = completed(&out[0]);
        assert_eq!(result.winner, Mechanism::CompactBlock);
        assert_eq!(result.margin, Some(Duration::from_millis(50)));
    }

    #[test]
    fn completed_height_can_be_reused() {
        let mut c = correlator(600, 64);
        let now = Instant::now();

        c.observe(winner(400, "FIBRE"), now);
        c.observe(timing(400, 10, 20), now);
        assert!(c.observe(winner(400, "BIP152"), now).is_empty());
        assert!(c.is_pending(400));
    }

    #[test]
    fn joined_race_skips_pending_table() {
        let c = correlator(600, 64);
        let race = DeliveryRace {
            winner: DeliveryWinner {
                height: 500,
                winner_tag: "BIP152".to_string(),
                peer_id: "peer-9".to_string(),
            },
            timing: DeliveryTiming {
                height: 500,
                fibre_latency: Some(Duration::from_millis(70)),
                compact_latency: Some(Duration::from_millis(20)),
            },
        };

        let result = match c.observe_joined(&race) {
            RaceOutcome::Completed(result) => result,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(result.winner, Mechanism::CompactBlock);
        assert_eq!(result.margin, Some(Duration::from_millis(50)));
        assert_eq!(c.pending(), 0);
    }
}
