use std::fmt;

/// Block delivery mechanism competing in a relay race.
///
/// The declaration order is the canonical order used for tie-breaks:
/// FIBRE/UDP sorts before BIP152 compact blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// FIBRE over UDP.
    FibreUdp,
    /// BIP152 compact block relay.
    CompactBlock,
    /// Anything that does not identify one of the above.
    Other,
}

impl Mechanism {
    /// The two racing mechanisms in canonical order.
    pub const RACING: [Mechanism; 2] = [Mechanism::FibreUdp, Mechanism::CompactBlock];

    /// Label value used in the metrics exposition.
    pub const fn as_label(&self) -> &'static str {
        match self {
            Mechanism::FibreUdp => "fibre_udp",
            Mechanism::CompactBlock => "bip152_cmpct",
            Mechanism::Other => "other",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
