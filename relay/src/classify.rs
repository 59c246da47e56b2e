//! Delivery mechanism classification.
//!
//! The node reports mechanisms as free-form strings. Only the first
//! character carries meaning: `F...` is FIBRE/UDP, `B...` is a BIP152
//! compact block, everything else is `Other`. The same rule applies to
//! winner tags and peer identifiers.

use crate::types::Mechanism;

/// Derives the delivery mechanism from an identifier.
pub fn classify(identifier: &str) -> Mechanism {
    match identifier.as_bytes().first() {
        Some(b'F') => Mechanism::FibreUdp,
        Some(b'B') => Mechanism::CompactBlock,
        _ => Mechanism::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_selects_mechanism() {
        assert_eq!(classify("FIBRE"), Mechanism::FibreUdp);
        assert_eq!(classify("F"), Mechanism::FibreUdp);
        assert_eq!(classify("BIP152"), Mechanism::CompactBlock);
        assert_eq!(classify("B:10.0.0.1:8333"), Mechanism::CompactBlock);
    }

    #[test]
    fn everything_else_is_other() {
        assert_eq!(classify(""), Mechanism::Other);
        assert_eq!(classify("fibre"), Mechanism::Other);
        assert_eq!(classify("headers"), Mechanism::Other);
        assert_eq!(classify("\u{0}F"), Mechanism::Other);
    }

    #[test]
    fn classification_is_deterministic() {
        for id in ["FIBRE", "BIP152", "x", ""] {
            assert_eq!(classify(id), classify(id));
        }
    }
}
