use thiserror::Error;

use crate::types::EventTag;

/// Why a raw probe record could not be turned into an [`crate::Event`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The record is too short to even hold a type tag.
    #[error("record of {len} bytes is too short to carry a type tag")]
    Truncated { len: usize },

    /// The type tag is not one this decoder knows about.
    #[error("unknown event tag {0}")]
    UnknownTag(u32),

    /// The record length does not match the fixed layout of its tag.
    #[error("{tag} record must be {expected} bytes, got {actual}")]
    LengthMismatch {
        tag: EventTag,
        expected: usize,
        actual: usize,
    },

    /// A numeric field holds a value outside its domain.
    #[error("field {field} out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: i64 },
}
