//! Supported development sets and where their files live on disk.

use crate::types::{DatasetResult, SceneDatasetError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataName {
    Dcase2018A,
    Dcase2018B,
    Dcase2019A,
    Dcase2019B,
}

impl DataName {
    pub const ALL: [DataName; 4] = [
        DataName::Dcase2018A,
        DataName::Dcase2018B,
        DataName::Dcase2019A,
        DataName::Dcase2019B,
    ];

    /// Names accepted on the command line.
    pub const NAMES: [&'static str; 4] = ["DCASE2018A", "DCASE2018B", "DCASE2019A", "DCASE2019B"];

    pub fn parse(name: &str) -> DatasetResult<Self> {
        match name {
            "DCASE2018A" => Ok(DataName::Dcase2018A),
            "DCASE2018B" => Ok(DataName::Dcase2018B),
            "DCASE2019A" => Ok(DataName::Dcase2019A),
            "DCASE2019B" => Ok(DataName::Dcase2019B),
            other => Err(SceneDatasetError::NotImplemented(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataName::Dcase2018A => "DCASE2018A",
            DataName::Dcase2018B => "DCASE2018B",
            DataName::Dcase2019A => "DCASE2019A",
            DataName::Dcase2019B => "DCASE2019B",
        }
    }

    /// Directory name of the unpacked development package.
    pub fn package_dir(&self) -> &'static str {
        match self {
            DataName::Dcase2018A => "TUT-urban-acoustic-scenes-2018-development",
            DataName::Dcase2018B => "TUT-urban-acoustic-scenes-2018-mobile-development",
            DataName::Dcase2019A => "TAU-urban-acoustic-scenes-2019-development",
            DataName::Dcase2019B => "TAU-urban-acoustic-scenes-2019-mobile-development",
        }
    }

    pub fn layout(&self, data_root: &Path) -> DatasetLayout {
        DatasetLayout::new(*self, data_root)
    }
}

impl FromStr for DataName {
    type Err = SceneDatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataName::parse(s)
    }
}

impl fmt::Display for DataName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths for one dataset under `<data_root>/<NAME>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub name: DataName,
    pub root: PathBuf,
}

impl DatasetLayout {
    pub fn new(name: DataName, data_root: &Path) -> Self {
        Self {
            name,
            root: data_root.join(name.as_str()),
        }
    }

    pub fn package_root(&self) -> PathBuf {
        self.root.join("raw_data").join(self.name.package_dir())
    }

    pub fn meta_path(&self) -> PathBuf {
        self.package_root().join("meta.csv")
    }

    pub fn fold_train_path(&self, fold: usize) -> PathBuf {
        self.package_root()
            .join("evaluation_setup")
            .join(format!("fold{fold}_train.csv"))
    }

    pub fn fold_evaluate_path(&self, fold: usize) -> PathBuf {
        self.package_root()
            .join("evaluation_setup")
            .join(format!("fold{fold}_evaluate.csv"))
    }

    pub fn features_dir(&self) -> PathBuf {
        self.root.join("features")
    }

    pub fn norm_factors_path(&self) -> PathBuf {
        self.root.join("norm_factors.json")
    }

    /// Resolve a meta filename (relative to the package root) to an audio path.
    pub fn audio_path(&self, filename: &str) -> PathBuf {
        self.package_root().join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_not_implemented() {
        let err = DataName::parse("voc").unwrap_err();
        assert!(matches!(err, SceneDatasetError::NotImplemented(ref n) if n == "voc"));
        assert_eq!(err.to_string(), "voc is not implemented");
    }

    #[test]
    fn names_round_trip() {
        for (name, text) in DataName::ALL.iter().zip(DataName::NAMES) {
            assert_eq!(name.as_str(), text);
            assert_eq!(text.parse::<DataName>().unwrap(), *name);
        }
    }

    #[test]
    fn layout_nests_under_data_root() {
        let layout = DataName::Dcase2019B.layout(Path::new("data"));
        assert_eq!(layout.root, PathBuf::from("data/DCASE2019B"));
        assert_eq!(
            layout.meta_path(),
            PathBuf::from(
                "data/DCASE2019B/raw_data/TAU-urban-acoustic-scenes-2019-mobile-development/meta.csv"
            )
        );
        assert_eq!(
            layout.norm_factors_path(),
            PathBuf::from("data/DCASE2019B/norm_factors.json")
        );
    }
}
