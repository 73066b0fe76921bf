use std::path::{Path, PathBuf};

use anyhow::Context;
use models::{min_input_side, DEFAULT_CONV_CHANNELS};
use scene_dataset::LogMelConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "scene-caps.toml";
const CONFIG_ENV: &str = "SCENE_CAPS_CONFIG";

/// File-backed harness settings. CLI flags win over anything set here.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub data_root: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub statistics_dir: PathBuf,
    /// JSONL metrics file; disabled when `None`.
    pub metrics_path: Option<PathBuf>,
    /// Directory for confusion heatmap PNGs; disabled when `None`.
    pub heatmap_dir: Option<PathBuf>,
    pub seed: u64,
    pub validation_amount: f32,
    pub extractor: LogMelConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            checkpoint_dir: PathBuf::from("epochs"),
            statistics_dir: PathBuf::from("statistics"),
            metrics_path: None,
            heatmap_dir: Some(PathBuf::from("statistics/confusion")),
            seed: 42,
            validation_amount: 0.3,
            extractor: LogMelConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct HarnessConfigFile {
    data_root: Option<String>,
    checkpoint_dir: Option<String>,
    statistics_dir: Option<String>,
    metrics_path: Option<String>,
    heatmap_dir: Option<String>,
    seed: Option<u64>,
    validation_amount: Option<f32>,
    extractor: Option<LogMelConfig>,
}

impl HarnessConfig {
    /// Resolve the config: an explicit path must load; otherwise `SCENE_CAPS_CONFIG`,
    /// then `scene-caps.toml` in the working directory, then defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let cfg = Self::from_path(path)?
                .with_context(|| format!("config file {} does not exist", path.display()))?;
            cfg.warn_if_invalid();
            return Ok(cfg);
        }
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        let cfg = match Self::from_path(&path) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => Self::default(),
            Err(err) => {
                tracing::warn!("ignoring {}: {err:#}", path.display());
                Self::default()
            }
        };
        cfg.warn_if_invalid();
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: HarnessConfigFile =
            toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(Self::from_file(file)))
    }

    fn from_file(file: HarnessConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            data_root: file
                .data_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.data_root),
            checkpoint_dir: file
                .checkpoint_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.checkpoint_dir),
            statistics_dir: file
                .statistics_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.statistics_dir),
            metrics_path: file.metrics_path.map(|v| expand_path(&v)),
            heatmap_dir: match file.heatmap_dir {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(expand_path(&v)),
                None => defaults.heatmap_dir,
            },
            seed: file.seed.unwrap_or(defaults.seed),
            validation_amount: file.validation_amount.unwrap_or(defaults.validation_amount),
            extractor: file.extractor.unwrap_or(defaults.extractor),
        }
    }

    pub fn checkpoint_path(&self, data_name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{data_name}.bin"))
    }

    pub fn results_path(&self, data_name: &str) -> PathBuf {
        self.statistics_dir.join(format!("{data_name}_results.csv"))
    }

    /// Settings that load but will fail or be adjusted at run time.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !(0.0..1.0).contains(&self.validation_amount) {
            issues.push(format!(
                "validation_amount {} is outside [0, 1); it will be clamped",
                self.validation_amount
            ));
        }
        let min_bands = min_input_side(DEFAULT_CONV_CHANNELS.len());
        if self.extractor.n_mels < min_bands {
            issues.push(format!(
                "extractor.n_mels is {}; the model needs at least {min_bands} bands",
                self.extractor.n_mels
            ));
        }
        if self.extractor.hop_length_seconds <= 0.0 {
            issues.push("extractor.hop_length_seconds must be positive".to_string());
        }
        issues
    }

    fn warn_if_invalid(&self) {
        for issue in self.issues() {
            tracing::warn!("{issue}");
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(out)
}
