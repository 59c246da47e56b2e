//! Bounded peer labels.
//!
//! Peer identifiers come straight from the node and are the only free-form
//! label value. They are sanitized and capped in length, and only a fixed
//! number of distinct values is kept. Anything past that is folded into
//! [`OVERFLOW_LABEL`].

use std::collections::HashSet;

/// Label used for an empty peer identifier.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Label used for peers beyond the cardinality limit.
pub const OVERFLOW_LABEL: &str = "overflow";

/// Replaces characters outside `[A-Za-z0-9._:\[\]-]` with `_` and caps the
/// result at `max_len` characters.
pub fn sanitize_peer(raw: &str, max_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .take(max_len)
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | ':' | '[' | ']' | '-' => c,
            _ => '_',
        })
        .collect();

    if cleaned.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        cleaned
    }
}

/// Hands out peer label values with bounded cardinality.
#[derive(Debug)]
pub struct PeerLabeler {
    max_labels: usize,
    max_len: usize,
    seen: HashSet<String>,
}

impl PeerLabeler {
    pub fn new(max_labels: usize, max_len: usize) -> Self {
        Self {
            max_labels,
            max_len: max_len.max(1),
            seen: HashSet::new(),
        }
    }

    /// Returns the label to publish for `peer`.
    ///
    /// Peers already seen keep their label. A new peer gets its own label
    /// only while fewer than `max_labels` are in use.
    pub fn label(&mut self, peer: &str) -> String {
        let label = sanitize_peer(peer, self.max_len);
        if self.seen.contains(&label) {
            return label;
        }
        if self.seen.len() >= self.max_labels {
            return OVERFLOW_LABEL.to_string();
        }
        self.seen.insert(label.clone());
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(sanitize_peer("10.0.0.1:8333", 48), "10.0.0.1:8333");
        assert_eq!(sanitize_peer("[::1]:8333", 48), "[::1]:8333");
        assert_eq!(sanitize_peer("peer \"x\"\n", 48), "peer__x__");
        assert_eq!(sanitize_peer("nœud", 48), "n_ud");
    }

    #[test]
    fn long_and_empty_values_are_bounded() {
        assert_eq!(sanitize_peer(&"a".repeat(100), 8), "aaaaaaaa");
        assert_eq!(sanitize_peer("", 8), UNKNOWN_LABEL);
    }

    #[test]
    fn new_peers_past_the_limit_overflow() {
        let mut labeler = PeerLabeler::new(2, 48);
        assert_eq!(labeler.label("a"), "a");
        assert_eq!(labeler.label("b"), "b");
        assert_eq!(labeler.label("c"), OVERFLOW_LABEL);
        // Known peers keep their own label.
        assert_eq!(labeler.label("a"), "a");
        assert_eq!(labeler.seen.len(), 2);
    }
}
