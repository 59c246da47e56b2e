//! Correlation of the two halves of a block race.
//!
//! The race-winner probe reports the winner and the per-mechanism timing as
//! separate records. [`RaceCorrelator`] joins them by height and scores
//! each race with [`resolve`].

pub mod config;
pub mod engine;
pub mod record;

pub use config::CorrelationConfig;
pub use engine::RaceCorrelator;
pub use record::{
    Latencies, LossReason, LostRace, RaceOutcome, RacePart, RaceRecord, RaceResult, resolve,
};
