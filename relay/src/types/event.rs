//! Decoded probe events.
//!
//! Every record emitted by the probe program carries exactly one type tag.
//! The decoder maps that tag onto one [`Event`] variant, so the rest of the
//! pipeline matches on a closed sum type instead of inspecting a shared
//! mutable struct.

use std::fmt;
use std::time::Duration;

use super::Height;

/// Wire-level type tag of a probe record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventTag {
    BlockReconstructed = 1,
    BlockSendStart = 2,
    DeliveryWinner = 3,
    DeliveryTiming = 4,
    DeliveryRace = 5,
    BlockConnected = 10,
}

impl EventTag {
    /// Every tag the decoder understands.
    pub const ALL: [EventTag; 6] = [
        EventTag::BlockReconstructed,
        EventTag::BlockSendStart,
        EventTag::DeliveryWinner,
        EventTag::DeliveryTiming,
        EventTag::DeliveryRace,
        EventTag::BlockConnected,
    ];

    /// Maps a raw tag value onto a known tag.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u32 == raw)
    }

    /// Label value used for `event_type` in the self-monitoring metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventTag::BlockReconstructed => "block_reconstructed",
            EventTag::BlockSendStart => "block_send_start",
            EventTag::DeliveryWinner => "block_delivery",
            EventTag::DeliveryTiming => "block_race_timing",
            EventTag::DeliveryRace => "block_race",
            EventTag::BlockConnected => "block_connected",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block was rebuilt from FIBRE chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockReconstructed {
    /// Wall time spent reconstructing, microsecond resolution; `None` when
    /// the probe reported it as unknown.
    pub duration: Option<Duration>,
    pub chunks_used: u32,
    pub chunks_received: u32,
}

/// First delivery of a block: which mechanism and which peer won.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryWinner {
    pub height: Height,
    /// Raw mechanism identifier, e.g. `"FIBRE"` or `"BIP152"`.
    pub winner_tag: String,
    /// Peer address or identifier that delivered first.
    pub peer_id: String,
}

/// Per-mechanism latency for one block race.
///
/// Either side may be unknown, e.g. when a mechanism never delivered the
/// block at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryTiming {
    pub height: Height,
    pub fibre_latency: Option<Duration>,
    pub compact_latency: Option<Duration>,
}

/// Winner and timing for one race delivered as a single record.
///
/// Both halves always refer to the same height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRace {
    pub winner: DeliveryWinner,
    pub timing: DeliveryTiming,
}

/// A block was connected to the active chain, whatever path delivered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockConnected {
    pub height: Height,
    /// Transactions in the block; `None` when the node did not report it.
    pub tx_count: Option<u32>,
    /// Time spent connecting the block; `None` when the node did not report it.
    pub connection_time: Option<Duration>,
}

/// One decoded probe event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    BlockReconstructed(BlockReconstructed),
    BlockSendStarted,
    DeliveryWinner(DeliveryWinner),
    DeliveryTiming(DeliveryTiming),
    DeliveryRace(DeliveryRace),
    BlockConnected(BlockConnected),
}

impl Event {
    /// Wire tag this event is encoded with.
    pub fn tag(&self) -> EventTag {
        match self {
            Event::BlockReconstructed(_) => EventTag::BlockReconstructed,
            Event::BlockSendStarted => EventTag::BlockSendStart,
            Event::DeliveryWinner(_) => EventTag::DeliveryWinner,
            Event::DeliveryTiming(_) => EventTag::DeliveryTiming,
            Event::DeliveryRace(_) => EventTag::DeliveryRace,
            Event::BlockConnected(_) => EventTag::BlockConnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_resolve_from_raw_values() {
        for tag in EventTag::ALL {
            assert_eq!(EventTag::from_raw(tag as u32), Some(tag));
        }
        assert_eq!(EventTag::from_raw(0), None);
        assert_eq!(EventTag::from_raw(6), None);
        assert_eq!(EventTag::from_raw(10), Some(EventTag::BlockConnected));
    }

    #[test]
    fn event_reports_its_tag() {
        assert_eq!(Event::BlockSendStarted.tag(), EventTag::BlockSendStart);
        let timing = Event::DeliveryTiming(DeliveryTiming {
            height: 1,
            fibre_latency: None,
            compact_latency: None,
        });
        assert_eq!(timing.tag().as_str(), "block_race_timing");
    }

    #[test]
    fn delivery_winner_keeps_the_block_delivery_label() {
        assert_eq!(EventTag::DeliveryWinner.as_str(), "block_delivery");
        assert_eq!(EventTag::from_raw(3).map(|t| t.to_string()).as_deref(), Some("block_delivery"));
    }
}
