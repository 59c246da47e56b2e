//! Fixed binary layout of probe records.
//!
//! The probe program submits a native-endian C struct:
//!
//! ```text
//! struct event_t {
//!     u32  type;          //  0
//!     s64  duration_us;   //  8  (connection_time_ns for block_connected)
//!     u32  chunks_used;   // 16
//!     u32  chunks_recvd;  // 20
//!     s32  height;        // 24
//!     s64  udp_ns;        // 32  (tx_count for block_connected)
//!     s64  cmpct_ns;      // 40
//!     char winner[24];    // 48
//!     char peer[48];      // 72
//! };                      // 120 bytes
//! ```
//!
//! Records come from the same host, so no byte-order negotiation happens.

use bytes::{Buf, BufMut, BytesMut};

use crate::types::EventTag;

/// Size of the leading type tag.
pub const TAG_LEN: usize = 4;

/// Size of every schema v1 record.
pub const RECORD_LEN: usize = 120;

/// Capacity of the winner tag buffer.
pub const WINNER_CAPACITY: usize = 24;

/// Capacity of the peer identifier buffer.
pub const PEER_CAPACITY: usize = 48;

/// Sentinel the probes write for an unknown latency or duration.
pub const ABSENT: i64 = -1;

/// Expected record length for `tag`.
///
/// All v1 tags share one struct, the per-tag lookup keeps the check honest
/// if a future tag grows its own layout.
pub const fn record_len(tag: EventTag) -> usize {
    match tag {
        EventTag::BlockReconstructed
        | EventTag::BlockSendStart
        | EventTag::DeliveryWinner
        | EventTag::DeliveryTiming
        | EventTag::DeliveryRace
        | EventTag::BlockConnected => RECORD_LEN,
    }
}

/// The untyped fields following the tag, in wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Fields {
    pub duration: i64,
    pub chunks_used: u32,
    pub chunks_received: u32,
    pub height: i32,
    pub udp_ns: i64,
    pub cmpct_ns: i64,
    pub winner: [u8; WINNER_CAPACITY],
    pub peer: [u8; PEER_CAPACITY],
}

impl Default for Fields {
    fn default() -> Self {
        Self {
            duration: 0,
            chunks_used: 0,
            chunks_received: 0,
            height: 0,
            udp_ns: 0,
            cmpct_ns: 0,
            winner: [0; WINNER_CAPACITY],
            peer: [0; PEER_CAPACITY],
        }
    }
}

impl Fields {
    /// Reads the body of a record. `buf` must be positioned right after the
    /// tag and hold `RECORD_LEN - TAG_LEN` bytes.
    pub fn read(buf: &mut impl Buf) -> Self {
        let mut fields = Fields::default();
        buf.advance(4); // padding
        fields.duration = buf.get_i64_ne();
        fields.chunks_used = buf.get_u32_ne();
        fields.chunks_received = buf.get_u32_ne();
        fields.height = buf.get_i32_ne();
        buf.advance(4); // padding
        fields.udp_ns = buf.get_i64_ne();
        fields.cmpct_ns = buf.get_i64_ne();
        buf.copy_to_slice(&mut fields.winner);
        buf.copy_to_slice(&mut fields.peer);
        fields
    }

    /// Writes a complete record, tag included.
    pub fn write(&self, tag: EventTag, out: &mut BytesMut) {
        out.put_u32_ne(tag as u32);
        out.put_bytes(0, 4);
        out.put_i64_ne(self.duration);
        out.put_u32_ne(self.chunks_used);
        out.put_u32_ne(self.chunks_received);
        out.put_i32_ne(self.height);
        out.put_bytes(0, 4);
        out.put_i64_ne(self.udp_ns);
        out.put_i64_ne(self.cmpct_ns);
        out.put_slice(&self.winner);
        out.put_slice(&self.peer);
    }
}

/// Decodes a fixed-capacity C string.
///
/// The first NUL ends the string; a buffer without any NUL is read up to its
/// capacity. Invalid UTF-8 sequences are dropped and the valid text around
/// them is kept, so a character cut at capacity costs only that character.
pub(crate) fn read_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf[..end].utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Copies `s` into a fixed-capacity buffer, truncating at capacity.
pub(crate) fn write_str<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let len = s.len().min(N);
    out[..len].copy_from_slice(&s.as_bytes()[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_write_exactly_one_record() {
        let mut out = BytesMut::new();
        Fields::default().write(EventTag::BlockSendStart, &mut out);
        assert_eq!(out.len(), RECORD_LEN);
    }

    #[test]
    fn read_str_stops_at_first_nul() {
        assert_eq!(read_str(b"FIBRE\0garbage"), "FIBRE");
        assert_eq!(read_str(b"\0FIBRE"), "");
    }

    #[test]
    fn read_str_tolerates_missing_terminator() {
        let full = [b'a'; WINNER_CAPACITY];
        assert_eq!(read_str(&full).len(), WINNER_CAPACITY);
    }

    #[test]
    fn read_str_drops_only_invalid_sequences() {
        assert_eq!(read_str(&[0xff, 0xfe, b'x', 0]), "x");
        assert_eq!(read_str(b"FIBRE\xff"), "FIBRE");
        assert_eq!(read_str("caf\u{e9}".as_bytes()), "caf\u{e9}");
    }

    #[test]
    fn read_str_keeps_text_before_a_split_character() {
        let mut peer = [b'a'; PEER_CAPACITY];
        peer[PEER_CAPACITY - 1] = 0xc3;
        assert_eq!(read_str(&peer), "a".repeat(PEER_CAPACITY - 1));
    }

    #[test]
    fn write_str_truncates_at_capacity() {
        let out: [u8; 4] = write_str("abcdef");
        assert_eq!(&out, b"abcd");
        let out: [u8; 4] = write_str("ab");
        assert_eq!(&out, b"ab\0\0");
    }
}
