//! Core domain types shared by the decoder, classifier and correlator.
//!
//! - [`Event`] is the decoded form of one probe record,
//! - [`Mechanism`] identifies a block delivery path,
//! - [`RawRecord`] is the opaque byte block delivered by a tracing provider.

pub mod event;
pub mod mechanism;

pub use event::{
    BlockConnected, BlockReconstructed, DeliveryRace, DeliveryTiming, DeliveryWinner, Event,
    EventTag,
};
pub use mechanism::Mechanism;

use bytes::Bytes;

/// Block height as reported by the node's tracepoints.
pub type Height = u32;

/// One fixed-size record exactly as the tracing provider handed it over.
///
/// The decoder borrows it for a single decode call and never keeps it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord(Bytes);

impl RawRecord {
    /// Wraps raw bytes into a record.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the record contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the record length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the record carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawRecord {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<Bytes> for RawRecord {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}
