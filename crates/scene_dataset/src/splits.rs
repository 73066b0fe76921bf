//! Balanced train/validation splitting that keeps recording locations together.

use crate::meta::DevelopmentSet;
use crate::types::DatasetResult;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConfig {
    pub fold: usize,
    /// Target share of each scene label moved to validation.
    pub validation_amount: f32,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            fold: 1,
            validation_amount: 0.3,
            seed: 42,
        }
    }
}

/// Split a fold's training files into `(train, val)`.
///
/// For every scene label, whole identifier groups are moved to validation until the
/// label's validation share reaches `validation_amount`. A group never straddles both
/// sides, and a label with more than one group always keeps one in train. Both lists
/// preserve the fold's file order.
pub fn validation_split(
    set: &DevelopmentSet,
    cfg: &SplitConfig,
) -> DatasetResult<(Vec<String>, Vec<String>)> {
    let files = set.train_files(cfg.fold)?;
    let amount = cfg.validation_amount.clamp(0.0, 1.0);

    let mut by_label: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for filename in &files {
        let entry = set.entry(filename)?;
        *by_label
            .entry(entry.scene_label.as_str())
            .or_default()
            .entry(entry.group_key())
            .or_default() += 1;
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(cfg.seed);
    let mut val_groups: HashSet<(&str, &str)> = HashSet::new();
    for (label, groups) in &by_label {
        let total: usize = groups.values().sum();
        let target = (total as f32 * amount).round() as usize;
        let mut keys: Vec<(&str, usize)> = groups.iter().map(|(k, n)| (*k, *n)).collect();
        keys.shuffle(&mut rng);
        let mut taken = 0usize;
        let mut remaining_groups = keys.len();
        for (key, count) in keys {
            if taken >= target || remaining_groups <= 1 {
                break;
            }
            val_groups.insert((*label, key));
            taken += count;
            remaining_groups -= 1;
        }
    }

    let mut train = Vec::new();
    let mut val = Vec::new();
    for filename in &files {
        let entry = set.entry(filename)?;
        if val_groups.contains(&(entry.scene_label.as_str(), entry.group_key())) {
            val.push(filename.clone());
        } else {
            train.push(filename.clone());
        }
    }
    tracing::debug!(train = train.len(), val = val.len(), "validation split");
    Ok((train, val))
}
