//! Acoustic scene dataset handling for the capsule trainer.
//!
//! This crate provides:
//! - A registry of supported DCASE development sets and their on-disk layout
//! - Metadata and evaluation-setup loading
//! - Log-mel feature extraction and a binary feature cache
//! - Normalization factor accumulation and persistence
//! - Balanced train/validation splitting by recording location
//! - A `(sample, label)` dataset adapter and Burn-compatible batch iteration

pub mod features;
pub mod meta;
pub mod normalizer;
pub mod prepare;
pub mod registry;
pub mod splits;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use features::{feature_path_for, FeatureExtractor, FeatureMatrix, LogMelConfig, LogMelExtractor};
pub use meta::DevelopmentSet;
pub use normalizer::Normalizer;
pub use prepare::{prepare_features, PrepareReport};
pub use registry::{DataName, DatasetLayout};
pub use splits::{validation_split, SplitConfig};
pub use types::*;

#[cfg(feature = "burn-runtime")]
pub use batch::{load_data, BatchIter, DataLoaders, LoaderConfig, SceneBatch, SceneDataset, SceneLoader};
