//! Error definitions and small shared types for scene_dataset.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SceneDatasetError>;

#[derive(Debug, Error)]
pub enum SceneDatasetError {
    #[error("{0} is not implemented")]
    NotImplemented(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv parse error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("wav decode error at {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("invalid record at {path}: {source}")]
    Contract {
        path: PathBuf,
        #[source]
        source: data_contracts::ContractError,
    },
    #[error("bad feature file {path}: {msg}")]
    FeatureFormat { path: PathBuf, msg: String },
    #[error("feature {path} is {bands}x{frames}, the model needs at least {}x{}", min[0], min[1])]
    FeatureTooSmall {
        path: PathBuf,
        bands: usize,
        frames: usize,
        min: [usize; 2],
    },
    #[error("file {0} is not listed in the dataset meta")]
    UnknownFile(String),
    #[error("label {0} does not appear in the training split")]
    UnknownLabel(String),
    #[error("{0}")]
    Other(String),
}

impl SceneDatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| SceneDatasetError::Io { path, source }
    }
}

/// A feature file paired with its scene label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledFile {
    pub feature_path: PathBuf,
    pub label: String,
}

/// Dense label indices assigned in sorted label order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    classes: Vec<String>,
    by_label: BTreeMap<String, usize>,
}

impl LabelIndex {
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let sorted: std::collections::BTreeSet<&str> = labels.into_iter().collect();
        let classes: Vec<String> = sorted.into_iter().map(str::to_string).collect();
        let by_label = classes
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { classes, by_label }
    }

    pub fn index_of(&self, label: &str) -> DatasetResult<usize> {
        self.by_label
            .get(label)
            .copied()
            .ok_or_else(|| SceneDatasetError::UnknownLabel(label.to_string()))
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
