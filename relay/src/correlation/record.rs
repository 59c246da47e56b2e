//! Join state and outcomes of a single block race.

use std::time::{Duration, Instant};

use crate::classify::classify;
use crate::types::{DeliveryTiming, DeliveryWinner, Height, Mechanism};

/// One half of a race as it arrives from the probes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RacePart {
    Winner(DeliveryWinner),
    Timing(DeliveryTiming),
}

impl RacePart {
    pub fn height(&self) -> Height {
        match self {
            RacePart::Winner(w) => w.height,
            RacePart::Timing(t) => t.height,
        }
    }
}

/// Latency observed per racing mechanism.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Latencies {
    pub fibre: Option<Duration>,
    pub compact: Option<Duration>,
}

impl Latencies {
    pub fn get(&self, mechanism: Mechanism) -> Option<Duration> {
        match mechanism {
            Mechanism::FibreUdp => self.fibre,
            Mechanism::CompactBlock => self.compact,
            Mechanism::Other => None,
        }
    }

    /// Known latencies in canonical mechanism order.
    pub fn iter(&self) -> impl Iterator<Item = (Mechanism, Duration)> + '_ {
        Mechanism::RACING
            .into_iter()
            .filter_map(|m| self.get(m).map(|d| (m, d)))
    }

    /// Mechanism with the smallest known latency.
    ///
    /// Ties go to the mechanism that comes first in canonical order.
    pub fn fastest(&self) -> Option<Mechanism> {
        self.iter().min_by_key(|(_, d)| *d).map(|(m, _)| m)
    }

    /// Absolute difference between the two latencies, when both are known.
    pub fn spread(&self) -> Option<Duration> {
        Some(self.fibre?.abs_diff(self.compact?))
    }
}

impl From<&DeliveryTiming> for Latencies {
    fn from(timing: &DeliveryTiming) -> Self {
        Self {
            fibre: timing.fibre_latency,
            compact: timing.compact_latency,
        }
    }
}

/// A race whose winner and timing were both seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceResult {
    pub height: Height,
    /// Mechanism credited with the win.
    pub winner: Mechanism,
    /// Peer that delivered first, when the winner half was seen.
    pub peer_id: Option<String>,
    /// How far ahead of the loser the winner was.
    pub margin: Option<Duration>,
    pub latencies: Latencies,
}

/// Why a race was retired without a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossReason {
    /// The other half never arrived within the race window.
    Expired,
    /// The pending table was full and this was its oldest entry.
    Evicted,
    /// The same half arrived again for the height, which was reused by a new block.
    Superseded,
}

impl LossReason {
    pub const fn as_label(&self) -> &'static str {
        match self {
            LossReason::Expired => "expired",
            LossReason::Evicted => "evicted",
            LossReason::Superseded => "superseded",
        }
    }
}

/// A race retired with only partial data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LostRace {
    pub height: Height,
    pub reason: LossReason,
    /// Whatever latencies the partial record carried.
    pub latencies: Latencies,
}

/// What the correlator emits when it retires a race.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaceOutcome {
    Completed(RaceResult),
    Lost(LostRace),
}

/// Pending join state for one height.
#[derive(Clone, Debug)]
pub struct RaceRecord {
    height: Height,
    winner: Option<DeliveryWinner>,
    timing: Option<DeliveryTiming>,
    opened_at: Instant,
}

impl RaceRecord {
    pub fn open(part: RacePart, now: Instant) -> Self {
        let mut record = Self {
            height: part.height(),
            winner: None,
            timing: None,
            opened_at: now,
        };
        record.merge(part);
        record
    }

    pub fn height(&self) -> Height {
        self.height
    }

    /// Returns `true` if this record already holds a part of the same kind.
    pub fn holds(&self, part: &RacePart) -> bool {
        match part {
            RacePart::Winner(_) => self.winner.is_some(),
            RacePart::Timing(_) => self.timing.is_some(),
        }
    }

    pub fn merge(&mut self, part: RacePart) {
        match part {
            RacePart::Winner(w) => self.winner = Some(w),
            RacePart::Timing(t) => self.timing = Some(t),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.winner.is_some() && self.timing.is_some()
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.opened_at) >= window
    }

    /// Scores the race once both halves are present.
    pub fn into_result(self) -> Option<RaceResult> {
        let timing = self.timing.as_ref()?;
        self.winner
            .as_ref()
            .map(|winner| resolve(Some(winner), timing))
    }

    /// Retires a partial record, keeping whatever latencies it carried.
    pub fn into_lost(self, reason: LossReason) -> LostRace {
        LostRace {
            height: self.height,
            reason,
            latencies: self.timing.as_ref().map(Latencies::from).unwrap_or_default(),
        }
    }
}

/// Scores a race from its winner (if any) and its timing.
///
/// The winner tag decides who won. When it does not name a racing mechanism
/// the faster latency wins instead, ties going to FIBRE/UDP.
pub fn resolve(winner: Option<&DeliveryWinner>, timing: &DeliveryTiming) -> RaceResult {
    let latencies = Latencies::from(timing);
    let tagged = winner.map_or(Mechanism::Other, |w| classify(&w.winner_tag));
    let credited = match tagged {
        Mechanism::Other => latencies.fastest().unwrap_or(Mechanism::Other),
        mechanism => mechanism,
    };

    RaceResult {
        height: timing.height,
        winner: credited,
        peer_id: winner.map(|w| w.peer_id.clone()),
        margin: latencies.spread(),
        latencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(fibre_ms: Option<u64>, compact_ms: Option<u64>) -> DeliveryTiming {
        DeliveryTiming {
            height: 7,
            fibre_latency: fibre_ms.map(Duration::from_millis),
            compact_latency: compact_ms.map(Duration::from_millis),
        }
    }

    fn winner(tag: &str) -> DeliveryWinner {
        DeliveryWinner {
            height: 7,
            winner_tag: tag.to_string(),
            peer_id: "10.0.0.1:8333".to_string(),
        }
    }

    #[test]
    fn tagged_winner_is_credited_even_when_slower() {
        let result = resolve(Some(&winner("BIP152")), &timing(Some(10), Some(25)));
        assert_eq!(result.winner, Mechanism::CompactBlock);
        assert_eq!(result.margin, Some(Duration::from_millis(15)));
        assert_eq!(result.peer_id.as_deref(), Some("10.0.0.1:8333"));
    }

    #[test]
    fn untagged_winner_is_inferred_from_latency() {
        let result = resolve(Some(&winner("?")), &timing(Some(40), Some(25)));
        assert_eq!(result.winner, Mechanism::CompactBlock);

        let result = resolve(None, &timing(None, Some(25)));
        assert_eq!(result.winner, Mechanism::CompactBlock);
        assert_eq!(result.margin, None);
    }

    #[test]
    fn equal_latencies_go_to_fibre() {
        let result = resolve(None, &timing(Some(30), Some(30)));
        assert_eq!(result.winner, Mechanism::FibreUdp);
        assert_eq!(result.margin, Some(Duration::ZERO));
    }

    #[test]
    fn no_latency_and_no_tag_is_other() {
        let result = resolve(None, &timing(None, None));
        assert_eq!(result.winner, Mechanism::Other);
        assert_eq!(result.margin, None);
    }

    #[test]
    fn partial_record_retires_as_lost() {
        let now = Instant::now();
        let record = RaceRecord::open(RacePart::Timing(timing(Some(5), None)), now);
        assert!(!record.is_complete());
        assert!(record.clone().into_result().is_none());
        assert!(record.is_expired(now + Duration::from_secs(2), Duration::from_secs(1)));

        let lost = record.into_lost(LossReason::Expired);
        assert_eq!(lost.reason, LossReason::Expired);
        assert_eq!(lost.latencies.fibre, Some(Duration::from_millis(5)));
        assert_eq!(lost.latencies.compact, None);
    }
}
