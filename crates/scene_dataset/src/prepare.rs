//! One-time feature cache and normalization factor preparation.

use crate::features::{feature_path_for, FeatureExtractor, FeatureMatrix};
use crate::meta::DevelopmentSet;
use crate::normalizer::{save_norm_factors, Normalizer};
use crate::types::{DatasetResult, SceneDatasetError};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;

/// Fold whose training files define the normalization statistics.
pub const NORM_FOLD: usize = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareReport {
    /// Audio files converted to cached features in this call.
    pub extracted: usize,
    /// Whether normalization factors were computed in this call.
    pub norm_written: bool,
}

fn progress(len: usize, msg: String) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} [{elapsed_precise}]") {
        bar.set_style(style);
    }
    bar.set_message(msg);
    bar
}

/// Extract features for every file and compute normalization factors, skipping
/// whichever artifact already exists.
pub fn prepare_features(
    set: &DevelopmentSet,
    extractor: &dyn FeatureExtractor,
) -> DatasetResult<PrepareReport> {
    let layout = set.layout();
    let features_dir = layout.features_dir();
    let mut report = PrepareReport::default();

    if !features_dir.exists() {
        fs::create_dir_all(&features_dir).map_err(SceneDatasetError::io(&features_dir))?;
        let files = set.all_files();
        let bar = progress(files.len(), format!("processing features for {}", layout.name));
        let result: DatasetResult<()> = files.par_iter().try_for_each(|filename| {
            let audio_path = layout.audio_path(filename);
            let feature = extractor.extract_file(&audio_path)?;
            feature.save(&feature_path_for(&features_dir, filename))?;
            bar.inc(1);
            Ok(())
        });
        bar.finish_and_clear();
        if let Err(e) = result {
            // Never leave a partial cache behind.
            let _ = fs::remove_dir_all(&features_dir);
            return Err(e);
        }
        report.extracted = files.len();
        tracing::info!(dataset = %layout.name, files = files.len(), "cached features");
    }

    let norm_path = layout.norm_factors_path();
    if !norm_path.exists() {
        let files = set.train_files(NORM_FOLD)?;
        let bar = progress(files.len(), format!("generating normalizer for {}", layout.name));
        let mut normalizer = Normalizer::new();
        for filename in &files {
            let feature = FeatureMatrix::load(&feature_path_for(&features_dir, filename))?;
            normalizer.accumulate(&feature)?;
            bar.inc(1);
        }
        bar.finish_and_clear();
        let norm = normalizer.finalize()?;
        save_norm_factors(&norm_path, &norm)?;
        report.norm_written = true;
        tracing::info!(
            dataset = %layout.name,
            frames = norm.frames,
            path = %norm_path.display(),
            "saved normalization factors"
        );
    }

    Ok(report)
}
