//! The `(sample, label)` dataset adapter and batch iteration for training and evaluation.

use crate::features::{feature_path_for, FeatureMatrix, LogMelConfig, LogMelExtractor};
use crate::meta::DevelopmentSet;
use crate::normalizer::{load_norm_factors, normalize};
use crate::prepare::prepare_features;
use crate::registry::DataName;
use crate::splits::{validation_split, SplitConfig};
use crate::types::{DatasetResult, LabelIndex, LabeledFile, SceneDatasetError};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use data_contracts::NormFactors;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Feature files of one split with their dense targets and shared normalization.
#[derive(Debug, Clone)]
pub struct SceneDataset {
    files: Vec<LabeledFile>,
    targets: Vec<usize>,
    classes: Vec<String>,
    norm: Arc<NormFactors>,
    min_shape: [usize; 2],
}

impl SceneDataset {
    pub fn new(
        files: Vec<LabeledFile>,
        labels: &LabelIndex,
        norm: Arc<NormFactors>,
    ) -> DatasetResult<Self> {
        let targets = files
            .iter()
            .map(|f| labels.index_of(&f.label))
            .collect::<DatasetResult<Vec<_>>>()?;
        Ok(Self {
            files,
            targets,
            classes: labels.classes().to_vec(),
            norm,
            min_shape: [1, 1],
        })
    }

    /// Reject samples with fewer than `[bands, frames]` when they are loaded.
    pub fn with_min_shape(mut self, min_shape: [usize; 2]) -> Self {
        self.min_shape = min_shape;
        self
    }

    pub fn min_shape(&self) -> [usize; 2] {
        self.min_shape
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    pub fn files(&self) -> &[LabeledFile] {
        &self.files
    }

    /// Load and normalize one sample. The matrix is one channel of `[bands, frames]`.
    pub fn get(&self, index: usize) -> DatasetResult<(FeatureMatrix, usize)> {
        let file = self.files.get(index).ok_or_else(|| {
            SceneDatasetError::Other(format!("index {index} out of range ({})", self.len()))
        })?;
        let mut feature = FeatureMatrix::load(&file.feature_path)?;
        let [min_bands, min_frames] = self.min_shape;
        if feature.bands < min_bands || feature.frames < min_frames {
            return Err(SceneDatasetError::FeatureTooSmall {
                path: file.feature_path.clone(),
                bands: feature.bands,
                frames: feature.frames,
                min: self.min_shape,
            });
        }
        normalize(&self.norm, &mut feature)?;
        Ok((feature, self.targets[index]))
    }
}

pub struct SceneBatch<B: Backend> {
    /// Shape `[batch, 1, bands, frames]`.
    pub features: Tensor<B, 4>,
    /// Shape `[batch]`.
    pub targets: Tensor<B, 1, Int>,
    /// Targets as host values, for meters.
    pub target_indices: Vec<usize>,
}

impl<B: Backend> SceneBatch<B> {
    pub fn len(&self) -> usize {
        self.target_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_indices.is_empty()
    }
}

/// Batches over a dataset; reshuffled per epoch when `shuffle` is set.
#[derive(Debug, Clone)]
pub struct SceneLoader {
    dataset: Arc<SceneDataset>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl SceneLoader {
    pub fn new(dataset: SceneDataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            dataset: Arc::new(dataset),
            batch_size: batch_size.max(1),
            shuffle,
            seed,
        }
    }

    pub fn dataset(&self) -> &SceneDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn iter(&self, epoch: usize) -> BatchIter {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        BatchIter {
            dataset: Arc::clone(&self.dataset),
            order,
            cursor: 0,
            batch_size: self.batch_size,
        }
    }
}

pub struct BatchIter {
    dataset: Arc<SceneDataset>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
}

impl BatchIter {
    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    /// Next batch, or `None` once every sample was yielded. The final batch may be short.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<SceneBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let loaded = slice
            .par_iter()
            .map(|&i| self.dataset.get(i))
            .collect::<DatasetResult<Vec<_>>>()?;

        let (bands, frames) = (loaded[0].0.bands, loaded[0].0.frames);
        let batch = loaded.len();
        let mut buf = Vec::with_capacity(batch * bands * frames);
        let mut targets = Vec::with_capacity(batch);
        let mut target_indices = Vec::with_capacity(batch);
        for (pos, (feature, target)) in loaded.into_iter().enumerate() {
            if feature.bands != bands || feature.frames != frames {
                return Err(SceneDatasetError::Other(format!(
                    "feature shapes differ within batch: {} is {}x{}, expected {bands}x{frames}",
                    self.dataset.files()[slice[pos]].feature_path.display(),
                    feature.bands,
                    feature.frames
                )));
            }
            buf.extend_from_slice(&feature.data);
            targets.push(target as i64);
            target_indices.push(target);
        }

        let features =
            Tensor::<B, 4>::from_data(TensorData::new(buf, [batch, 1, bands, frames]), device);
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch]), device);
        Ok(Some(SceneBatch {
            features,
            targets,
            target_indices,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding one subdirectory per dataset name.
    pub data_root: PathBuf,
    pub batch_size: usize,
    pub split: SplitConfig,
    pub extractor: LogMelConfig,
    /// Smallest `[bands, frames]` a sample may have.
    pub min_shape: [usize; 2],
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            batch_size: 32,
            split: SplitConfig::default(),
            extractor: LogMelConfig::default(),
            min_shape: [1, 1],
        }
    }
}

pub struct DataLoaders {
    pub name: DataName,
    pub train: SceneLoader,
    pub val: SceneLoader,
    pub test: SceneLoader,
    /// Class names in target-index order.
    pub classes: Vec<String>,
}

/// Resolve a dataset by name, prepare its cached features, and build the three loaders.
pub fn load_data(name: &str, cfg: &LoaderConfig) -> DatasetResult<DataLoaders> {
    let data_name = DataName::parse(name)?;
    let set = DevelopmentSet::initialize(data_name.layout(&cfg.data_root))?;
    prepare_features(&set, &LogMelExtractor::new(cfg.extractor))?;

    let (train_files, val_files) = validation_split(&set, &cfg.split)?;
    let test_files = set.eval_files(cfg.split.fold)?;

    let features_dir = set.layout().features_dir();
    let labeled = |files: &[String]| -> DatasetResult<Vec<LabeledFile>> {
        files
            .iter()
            .map(|f| {
                Ok(LabeledFile {
                    feature_path: feature_path_for(&features_dir, f),
                    label: set.label_of(f)?.to_string(),
                })
            })
            .collect()
    };
    let train = labeled(&train_files)?;
    let val = labeled(&val_files)?;
    let test = labeled(&test_files)?;

    let labels = LabelIndex::from_labels(train.iter().map(|f| f.label.as_str()));
    let norm = Arc::new(load_norm_factors(&set.layout().norm_factors_path())?);

    let train_set = SceneDataset::new(train, &labels, Arc::clone(&norm))?.with_min_shape(cfg.min_shape);
    let val_set = SceneDataset::new(val, &labels, Arc::clone(&norm))?.with_min_shape(cfg.min_shape);
    let test_set = SceneDataset::new(test, &labels, norm)?.with_min_shape(cfg.min_shape);
    tracing::info!(
        "# {} dataset --- train: {} val: {} test: {}",
        data_name,
        train_set.len(),
        val_set.len(),
        test_set.len()
    );

    Ok(DataLoaders {
        name: data_name,
        train: SceneLoader::new(train_set, cfg.batch_size, true, cfg.split.seed),
        val: SceneLoader::new(val_set, cfg.batch_size, false, cfg.split.seed),
        test: SceneLoader::new(test_set, cfg.batch_size, false, cfg.split.seed),
        classes: labels.classes().to_vec(),
    })
}
