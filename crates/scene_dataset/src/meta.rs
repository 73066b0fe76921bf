//! Metadata and evaluation-setup loading for an unpacked development set.

use crate::registry::DatasetLayout;
use crate::types::{DatasetResult, SceneDatasetError};
use data_contracts::{FoldEntry, MetaEntry};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::Path;

fn read_tsv<T: DeserializeOwned>(path: &Path) -> DatasetResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| SceneDatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|source| SceneDatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

pub fn load_meta(path: &Path) -> DatasetResult<Vec<MetaEntry>> {
    let rows: Vec<MetaEntry> = read_tsv(path)?;
    for row in &rows {
        row.validate().map_err(|source| SceneDatasetError::Contract {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(rows)
}

pub fn load_fold(path: &Path) -> DatasetResult<Vec<FoldEntry>> {
    let rows: Vec<FoldEntry> = read_tsv(path)?;
    for row in &rows {
        row.validate().map_err(|source| SceneDatasetError::Contract {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(rows)
}

/// An initialized development set: meta rows plus lookups by filename.
#[derive(Debug, Clone)]
pub struct DevelopmentSet {
    layout: DatasetLayout,
    meta: Vec<MetaEntry>,
    by_filename: HashMap<String, usize>,
}

impl DevelopmentSet {
    /// Check the package is present and load its meta file.
    pub fn initialize(layout: DatasetLayout) -> DatasetResult<Self> {
        let package = layout.package_root();
        if !package.is_dir() {
            return Err(SceneDatasetError::Other(format!(
                "dataset package {} not found; unpack the {} development set there",
                package.display(),
                layout.name
            )));
        }
        let meta = load_meta(&layout.meta_path())?;
        let by_filename = meta
            .iter()
            .enumerate()
            .map(|(i, m)| (m.filename.clone(), i))
            .collect();
        tracing::info!(
            dataset = %layout.name,
            files = meta.len(),
            "initialized development set"
        );
        Ok(Self {
            layout,
            meta,
            by_filename,
        })
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn meta(&self) -> &[MetaEntry] {
        &self.meta
    }

    pub fn entry(&self, filename: &str) -> DatasetResult<&MetaEntry> {
        self.by_filename
            .get(filename)
            .map(|&i| &self.meta[i])
            .ok_or_else(|| SceneDatasetError::UnknownFile(filename.to_string()))
    }

    pub fn label_of(&self, filename: &str) -> DatasetResult<&str> {
        Ok(self.entry(filename)?.scene_label.as_str())
    }

    /// Recording location of a file, if the meta lists one.
    pub fn identifier_of(&self, filename: &str) -> DatasetResult<Option<&str>> {
        Ok(self.entry(filename)?.identifier.as_deref())
    }

    /// Every audio file in the set, in meta order.
    pub fn all_files(&self) -> Vec<String> {
        self.meta.iter().map(|m| m.filename.clone()).collect()
    }

    /// Training files of a fold, in list order.
    pub fn train_files(&self, fold: usize) -> DatasetResult<Vec<String>> {
        self.fold_files(&self.layout.fold_train_path(fold))
    }

    /// Unique evaluation files of a fold, in first-seen order.
    pub fn eval_files(&self, fold: usize) -> DatasetResult<Vec<String>> {
        self.fold_files(&self.layout.fold_evaluate_path(fold))
    }

    fn fold_files(&self, path: &Path) -> DatasetResult<Vec<String>> {
        let rows = load_fold(path)?;
        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            self.entry(&row.filename)?;
            if seen.insert(row.filename.clone()) {
                files.push(row.filename);
            }
        }
        Ok(files)
    }
}
