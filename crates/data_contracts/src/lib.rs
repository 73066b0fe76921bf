//! Shared data contracts for dataset metadata, normalization factors, and epoch records.

pub mod meta;
pub mod norm;
pub mod record;

pub use meta::{ContractError, FoldEntry, MetaEntry};
pub use norm::NormFactors;
pub use record::{EpochRecord, Phase, PhaseMetrics};
