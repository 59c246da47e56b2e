//! Event decoder.
//!
//! Turns one [`RawRecord`] into one [`Event`], validating the type tag and
//! the fixed layout for that tag. [`encode`] is the exact inverse and is
//! what scripted providers and tests use to produce records.

pub mod error;
pub mod layout;

pub use error::DecodeError;
pub use layout::{ABSENT, RECORD_LEN, record_len};

use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::types::{
    BlockConnected, BlockReconstructed, DeliveryRace, DeliveryTiming, DeliveryWinner, Event,
    EventTag, RawRecord,
};
use layout::{Fields, PEER_CAPACITY, TAG_LEN, WINNER_CAPACITY, read_str, write_str};

/// Decodes a raw probe record.
///
/// Fails when the tag is unknown, the length does not match the tag's
/// layout, or a numeric field is outside its domain. Negative latencies,
/// durations and transaction counts are the probes' "unknown" sentinel and
/// decode to `None`.
pub fn decode(raw: &RawRecord) -> Result<Event, DecodeError> {
    let bytes = raw.as_bytes();
    if bytes.len() < TAG_LEN {
        return Err(DecodeError::Truncated { len: bytes.len() });
    }

    let mut buf = bytes;
    let raw_tag = buf.get_u32_ne();
    let tag = EventTag::from_raw(raw_tag).ok_or(DecodeError::UnknownTag(raw_tag))?;

    let expected = record_len(tag);
    if bytes.len() != expected {
        return Err(DecodeError::LengthMismatch {
            tag,
            expected,
            actual: bytes.len(),
        });
    }

    let fields = Fields::read(&mut buf);

    let event = match tag {
        EventTag::BlockReconstructed => Event::BlockReconstructed(BlockReconstructed {
            duration: u64::try_from(fields.duration)
                .ok()
                .map(Duration::from_micros),
            chunks_used: fields.chunks_used,
            chunks_received: fields.chunks_received,
        }),
        EventTag::BlockSendStart => Event::BlockSendStarted,
        EventTag::DeliveryWinner => Event::DeliveryWinner(winner(&fields)?),
        EventTag::DeliveryTiming => Event::DeliveryTiming(timing(&fields)?),
        EventTag::DeliveryRace => Event::DeliveryRace(DeliveryRace {
            winner: winner(&fields)?,
            timing: timing(&fields)?,
        }),
        EventTag::BlockConnected => {
            // Negative is the "unknown" sentinel.
            let tx_count = match u64::try_from(fields.udp_ns) {
                Err(_) => None,
                Ok(n) => Some(u32::try_from(n).map_err(|_| DecodeError::FieldOutOfRange {
                    field: "tx_count",
                    value: fields.udp_ns,
                })?),
            };
            Event::BlockConnected(BlockConnected {
                height: height(fields.height)?,
                tx_count,
                connection_time: optional_nanos(fields.duration),
            })
        }
    };

    Ok(event)
}

/// Encodes an event into the probes' fixed layout.
///
/// Strings longer than their buffer are truncated, absent values are
/// written as [`ABSENT`]. Heights above `i32::MAX` cannot be represented and
/// saturate.
pub fn encode(event: &Event) -> RawRecord {
    let mut fields = Fields::default();

    match event {
        Event::BlockReconstructed(e) => {
            fields.duration = e
                .duration
                .map_or(ABSENT, |d| saturating_i64(d.as_micros()));
            fields.chunks_used = e.chunks_used;
            fields.chunks_received = e.chunks_received;
        }
        Event::BlockSendStarted => {}
        Event::DeliveryWinner(w) => put_winner(&mut fields, w),
        Event::DeliveryTiming(t) => put_timing(&mut fields, t),
        Event::DeliveryRace(race) => {
            put_winner(&mut fields, &race.winner);
            put_timing(&mut fields, &race.timing);
        }
        Event::BlockConnected(c) => {
            fields.height = encode_height(c.height);
            fields.udp_ns = c.tx_count.map_or(ABSENT, i64::from);
            fields.duration = encode_nanos(c.connection_time);
        }
    }

    let mut out = BytesMut::with_capacity(RECORD_LEN);
    fields.write(event.tag(), &mut out);
    RawRecord::new(out.freeze())
}

fn winner(fields: &Fields) -> Result<DeliveryWinner, DecodeError> {
    Ok(DeliveryWinner {
        height: height(fields.height)?,
        winner_tag: read_str(&fields.winner),
        peer_id: read_str(&fields.peer),
    })
}

fn timing(fields: &Fields) -> Result<DeliveryTiming, DecodeError> {
    Ok(DeliveryTiming {
        height: height(fields.height)?,
        fibre_latency: optional_nanos(fields.udp_ns),
        compact_latency: optional_nanos(fields.cmpct_ns),
    })
}

fn put_winner(fields: &mut Fields, w: &DeliveryWinner) {
    fields.height = encode_height(w.height);
    fields.winner = write_str::<WINNER_CAPACITY>(&w.winner_tag);
    fields.peer = write_str::<PEER_CAPACITY>(&w.peer_id);
}

fn put_timing(fields: &mut Fields, t: &DeliveryTiming) {
    fields.height = encode_height(t.height);
    fields.udp_ns = encode_nanos(t.fibre_latency);
    fields.cmpct_ns = encode_nanos(t.compact_latency);
}

fn height(raw: i32) -> Result<u32, DecodeError> {
    u32::try_from(raw).map_err(|_| DecodeError::FieldOutOfRange {
        field: "height",
        value: i64::from(raw),
    })
}

fn encode_height(height: u32) -> i32 {
    i32::try_from(height).unwrap_or(i32::MAX)
}

fn optional_nanos(raw: i64) -> Option<Duration> {
    u64::try_from(raw).ok().map(Duration::from_nanos)
}

fn encode_nanos(value: Option<Duration>) -> i64 {
    value.map_or(ABSENT, |d| saturating_i64(d.as_nanos()))
}

fn saturating_i64(value: u128) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_tag(tag: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; RECORD_LEN];
        bytes[..4].copy_from_slice(&tag.to_ne_bytes());
        bytes
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = RawRecord::from(with_tag(7));
        assert_eq!(decode(&raw), Err(DecodeError::UnknownTag(7)));
    }

    #[test]
    fn short_record_is_rejected() {
        let raw = RawRecord::from(vec![1u8, 0]);
        assert_eq!(decode(&raw), Err(DecodeError::Truncated { len: 2 }));
    }

    #[test]
    fn wrong_length_for_tag_is_rejected() {
        let mut bytes = with_tag(EventTag::DeliveryWinner as u32);
        bytes.truncate(100);
        let err = decode(&RawRecord::from(bytes)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                tag: EventTag::DeliveryWinner,
                expected: RECORD_LEN,
                actual: 100,
            }
        );
    }

    #[test]
    fn negative_latency_decodes_to_absent() {
        let event = Event::DeliveryTiming(DeliveryTiming {
            height: 800_000,
            fibre_latency: Some(Duration::from_millis(12)),
            compact_latency: None,
        });
        let raw = encode(&event);

        // The compact latency slot carries the sentinel, not zero.
        assert_eq!(&raw.as_bytes()[40..48], &ABSENT.to_ne_bytes());
        assert_eq!(decode(&raw).unwrap(), event);
    }

    #[test]
    fn negative_height_is_out_of_range() {
        let mut bytes = with_tag(EventTag::DeliveryWinner as u32);
        bytes[24..28].copy_from_slice(&(-5i32).to_ne_bytes());
        assert_eq!(
            decode(&RawRecord::from(bytes)),
            Err(DecodeError::FieldOutOfRange {
                field: "height",
                value: -5
            })
        );
    }

    #[test]
    fn unterminated_and_garbled_strings_do_not_fail_the_record() {
        let mut bytes = with_tag(EventTag::DeliveryWinner as u32);
        bytes[24..28].copy_from_slice(&42i32.to_ne_bytes());
        bytes[48..72].fill(b'F');
        bytes[72] = 0xff;
        bytes[73] = 0xfe;

        match decode(&RawRecord::from(bytes)).unwrap() {
            Event::DeliveryWinner(w) => {
                assert_eq!(w.height, 42);
                assert_eq!(w.winner_tag, "F".repeat(WINNER_CAPACITY));
                assert_eq!(w.peer_id, "");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn block_connected_reads_reused_slots() {
        let mut bytes = with_tag(EventTag::BlockConnected as u32);
        bytes[8..16].copy_from_slice(&2_500_000i64.to_ne_bytes());
        bytes[24..28].copy_from_slice(&850_000i32.to_ne_bytes());
        bytes[32..40].copy_from_slice(&3_100i64.to_ne_bytes());

        assert_eq!(
            decode(&RawRecord::from(bytes)).unwrap(),
            Event::BlockConnected(BlockConnected {
                height: 850_000,
                tx_count: Some(3_100),
                connection_time: Some(Duration::from_micros(2_500)),
            })
        );
    }

    #[test]
    fn unknown_reconstruction_time_keeps_the_record() {
        let mut bytes = with_tag(EventTag::BlockReconstructed as u32);
        bytes[8..16].copy_from_slice(&ABSENT.to_ne_bytes());
        bytes[16..20].copy_from_slice(&40u32.to_ne_bytes());
        bytes[20..24].copy_from_slice(&55u32.to_ne_bytes());

        assert_eq!(
            decode(&RawRecord::from(bytes)).unwrap(),
            Event::BlockReconstructed(BlockReconstructed {
                duration: None,
                chunks_used: 40,
                chunks_received: 55,
            })
        );
    }

    #[test]
    fn unknown_tx_count_keeps_the_record() {
        let mut bytes = with_tag(EventTag::BlockConnected as u32);
        bytes[8..16].copy_from_slice(&ABSENT.to_ne_bytes());
        bytes[24..28].copy_from_slice(&850_000i32.to_ne_bytes());
        bytes[32..40].copy_from_slice(&ABSENT.to_ne_bytes());

        assert_eq!(
            decode(&RawRecord::from(bytes)).unwrap(),
            Event::BlockConnected(BlockConnected {
                height: 850_000,
                tx_count: None,
                connection_time: None,
            })
        );
    }

    #[test]
    fn oversized_tx_count_is_out_of_range() {
        let mut bytes = with_tag(EventTag::BlockConnected as u32);
        let huge = i64::from(u32::MAX) + 1;
        bytes[32..40].copy_from_slice(&huge.to_ne_bytes());
        assert_eq!(
            decode(&RawRecord::from(bytes)),
            Err(DecodeError::FieldOutOfRange {
                field: "tx_count",
                value: huge
            })
        );
    }

    fn ident() -> impl Strategy<Value = String> {
        "[A-Za-z0-9:.]{0,20}"
    }

    fn latency() -> impl Strategy<Value = Option<Duration>> {
        proptest::option::of((0u64..10_000_000_000).prop_map(Duration::from_nanos))
    }

    fn event() -> impl Strategy<Value = Event> {
        let height = 0u32..=i32::MAX as u32;
        prop_oneof![
            (proptest::option::of(0u64..100_000_000), any::<u32>(), any::<u32>()).prop_map(
                |(us, used, recvd)| {
                    Event::BlockReconstructed(BlockReconstructed {
                        duration: us.map(Duration::from_micros),
                        chunks_used: used,
                        chunks_received: recvd,
                    })
                }
            ),
            Just(Event::BlockSendStarted),
            (height.clone(), ident(), ident()).prop_map(|(height, winner_tag, peer_id)| {
                Event::DeliveryWinner(DeliveryWinner {
                    height,
                    winner_tag,
                    peer_id,
                })
            }),
            (height.clone(), latency(), latency()).prop_map(|(height, fibre, compact)| {
                Event::DeliveryTiming(DeliveryTiming {
                    height,
                    fibre_latency: fibre,
                    compact_latency: compact,
                })
            }),
            (height.clone(), ident(), ident(), latency(), latency()).prop_map(
                |(height, winner_tag, peer_id, fibre, compact)| {
                    Event::DeliveryRace(DeliveryRace {
                        winner: DeliveryWinner {
                            height,
                            winner_tag,
                            peer_id,
                        },
                        timing: DeliveryTiming {
                            height,
                            fibre_latency: fibre,
                            compact_latency: compact,
                        },
                    })
                }
            ),
            (height, proptest::option::of(any::<u32>()), latency()).prop_map(|(height, tx_count, connection_time)| {
                Event::BlockConnected(BlockConnected {
                    height,
                    tx_count,
                    connection_time,
                })
            }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(event in event()) {
            let raw = encode(&event);
            prop_assert_eq!(raw.len(), RECORD_LEN);
            prop_assert_eq!(decode(&raw).unwrap(), event);
        }
    }
}
