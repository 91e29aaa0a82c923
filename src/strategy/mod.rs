//! Strategy: vote aggregation and stake sizing.

pub mod consensus;
pub mod sizing;

pub use consensus::{decide, ConsensusOutcome, Tally};
pub use sizing::EdgeAnalysis;
