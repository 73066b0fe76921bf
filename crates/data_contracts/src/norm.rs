use serde::{Deserialize, Serialize};

use crate::meta::ContractError;

/// Per-band normalization state computed over the training fold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormFactors {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    /// Number of frames accumulated to produce the statistics.
    pub frames: u64,
}

impl NormFactors {
    pub fn bands(&self) -> usize {
        self.mean.len()
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.mean.len() != self.std.len() {
            return Err(ContractError::NormShape {
                mean: self.mean.len(),
                std: self.std.len(),
            });
        }
        if self.mean.is_empty() {
            return Err(ContractError::NormEmpty);
        }
        for (index, (&mean, &std)) in self.mean.iter().zip(&self.std).enumerate() {
            if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
                return Err(ContractError::NormValue { index, mean, std });
            }
        }
        Ok(())
    }
}
