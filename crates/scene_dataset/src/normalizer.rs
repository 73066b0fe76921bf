//! Per-band mean/std accumulation over training features.

use crate::features::FeatureMatrix;
use crate::types::{DatasetResult, SceneDatasetError};
use data_contracts::NormFactors;
use std::fs;
use std::path::Path;

/// Streaming accumulator; feed training features one file at a time.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    frames: u64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, feature: &FeatureMatrix) -> DatasetResult<()> {
        if self.sum.is_empty() {
            self.sum = vec![0.0; feature.bands];
            self.sum_sq = vec![0.0; feature.bands];
        } else if self.sum.len() != feature.bands {
            return Err(SceneDatasetError::Other(format!(
                "feature has {} bands, normalizer expects {}",
                feature.bands,
                self.sum.len()
            )));
        }
        for band in 0..feature.bands {
            for &v in feature.band(band) {
                let v = v as f64;
                self.sum[band] += v;
                self.sum_sq[band] += v * v;
            }
        }
        self.frames += feature.frames as u64;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Mean and unbiased standard deviation per band. A zero deviation is stored as 1.
    pub fn finalize(&self) -> DatasetResult<NormFactors> {
        if self.frames < 2 {
            return Err(SceneDatasetError::Other(format!(
                "need at least two frames to normalize, got {}",
                self.frames
            )));
        }
        let n = self.frames as f64;
        let mut mean = Vec::with_capacity(self.sum.len());
        let mut std = Vec::with_capacity(self.sum.len());
        for (&s1, &s2) in self.sum.iter().zip(&self.sum_sq) {
            mean.push((s1 / n) as f32);
            let var = ((n * s2 - s1 * s1) / (n * (n - 1.0))).max(0.0);
            let sd = var.sqrt() as f32;
            std.push(if sd > 0.0 && sd.is_finite() { sd } else { 1.0 });
        }
        Ok(NormFactors {
            mean,
            std,
            frames: self.frames,
        })
    }
}

pub fn save_norm_factors(path: &Path, norm: &NormFactors) -> DatasetResult<()> {
    let data = serde_json::to_vec_pretty(norm).map_err(|source| SceneDatasetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(SceneDatasetError::io(path))
}

pub fn load_norm_factors(path: &Path) -> DatasetResult<NormFactors> {
    let raw = fs::read(path).map_err(SceneDatasetError::io(path))?;
    let norm: NormFactors =
        serde_json::from_slice(&raw).map_err(|source| SceneDatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    norm.validate().map_err(|source| SceneDatasetError::Contract {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(norm)
}

/// Standardize each band in place.
pub fn normalize(norm: &NormFactors, feature: &mut FeatureMatrix) -> DatasetResult<()> {
    if norm.bands() != feature.bands {
        return Err(SceneDatasetError::Other(format!(
            "feature has {} bands, normalization factors have {}",
            feature.bands,
            norm.bands()
        )));
    }
    for band in 0..feature.bands {
        let (mean, std) = (norm.mean[band], norm.std[band]);
        for v in feature.band_mut(band) {
            *v = (*v - mean) / std;
        }
    }
    Ok(())
}
