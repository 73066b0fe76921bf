use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of a development set `meta.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaEntry {
    /// Audio path relative to the dataset package root (e.g. `audio/airport-lisbon-1000-40000-a.wav`).
    pub filename: String,
    pub scene_label: String,
    /// Recording location shared by every segment cut from one recording.
    #[serde(default)]
    pub identifier: Option<String>,
    /// Recording device (mobile sets only).
    #[serde(default)]
    pub source_label: Option<String>,
}

/// One row of an `evaluation_setup/fold<N>_*.csv` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoldEntry {
    pub filename: String,
    #[serde(default)]
    pub scene_label: Option<String>,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("empty filename")]
    EmptyFilename,
    #[error("empty scene label for {0}")]
    EmptyLabel(String),
    #[error("not a wav file: {0}")]
    NotWav(String),
    #[error("normalization factors have mismatched lengths (mean {mean}, std {std})")]
    NormShape { mean: usize, std: usize },
    #[error("normalization factors are empty")]
    NormEmpty,
    #[error("normalization factor {index} is not usable: mean {mean}, std {std}")]
    NormValue { index: usize, mean: f32, std: f32 },
}

fn check_filename(filename: &str) -> Result<(), ContractError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(ContractError::EmptyFilename);
    }
    if !trimmed.to_ascii_lowercase().ends_with(".wav") {
        return Err(ContractError::NotWav(trimmed.to_string()));
    }
    Ok(())
}

impl MetaEntry {
    pub fn validate(&self) -> Result<(), ContractError> {
        check_filename(&self.filename)?;
        if self.scene_label.trim().is_empty() {
            return Err(ContractError::EmptyLabel(self.filename.clone()));
        }
        Ok(())
    }

    /// Identifier used to keep recordings together when splitting; falls back to the filename.
    pub fn group_key(&self) -> &str {
        self.identifier
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.filename)
    }
}

impl FoldEntry {
    pub fn validate(&self) -> Result<(), ContractError> {
        check_filename(&self.filename)
    }
}
