//! Per-pair matchup statistics recomputed from ingested matchups.

pub mod averages;
pub mod consensus;

pub use averages::{AggregationEngine, RecomputeSummary};
pub use consensus::plurality_consensus;
