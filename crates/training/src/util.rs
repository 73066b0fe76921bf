use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::{Parser, ValueEnum};
use data_contracts::{EpochRecord, Phase, PhaseMetrics};
use indicatif::{ProgressBar, ProgressStyle};
use models::{
    min_input_side, CapsuleClassifier, ConvFeatures, SceneCapsNet, SceneCapsNetConfig,
    DEFAULT_CONV_CHANNELS,
};
use scene_dataset::{
    load_data, prepare_features, DataName, DevelopmentSet, LoaderConfig, LogMelExtractor,
    PrepareReport, SceneLoader, SplitConfig,
};
use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::meters::{AverageValueMeter, ClassAccuracyMeter, ConfusionMeter};
use crate::results::ResultsTable;
use crate::schedule::{MultiStepLr, MultiStepRouting};
use crate::visual::{HeatmapSink, JsonlSink, MetricsSink, SinkSet};
use crate::TrainBackend;

const FEATURES_LR: f64 = 1e-3;
const CLASSIFIER_LR: f64 = 1e-4;
const TOPK: [usize; 2] = [1, 5];

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Train the capsule network on a DCASE acoustic scene dataset"
)]
pub struct TrainArgs {
    /// Dataset to train on.
    #[arg(long = "data_name", default_value = "DCASE2018A", value_parser = DataName::NAMES)]
    pub data_name: String,
    /// Train batch size.
    #[arg(long = "batch_size", default_value_t = 64)]
    pub batch_size: usize,
    /// Initial routing iterations of the capsule classifier.
    #[arg(long = "num_iterations", default_value_t = 3)]
    pub num_iterations: usize,
    /// Number of training epochs.
    #[arg(long = "num_epochs", default_value_t = 100)]
    pub num_epochs: usize,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Seed for parameter init, shuffling and the validation split (config value if unset).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Harness config file (defaults to $SCENE_CAPS_CONFIG or ./scene-caps.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding one subdirectory per dataset (config value if unset).
    #[arg(long = "data_root")]
    pub data_root: Option<PathBuf>,
    /// Append per-epoch metrics as JSON lines to this file.
    #[arg(long = "metrics_out")]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "eval",
    about = "Evaluate a saved capsule network checkpoint on a dataset's test fold"
)]
pub struct EvalArgs {
    #[arg(long = "data_name", default_value = "DCASE2018A", value_parser = DataName::NAMES)]
    pub data_name: String,
    #[arg(long = "batch_size", default_value_t = 64)]
    pub batch_size: usize,
    /// Routing iterations at inference (defaults to the depth recorded with the checkpoint).
    #[arg(long = "num_iterations")]
    pub num_iterations: Option<usize>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Checkpoint path (defaults to <checkpoint_dir>/<NAME>.bin).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long = "data_root")]
    pub data_root: Option<PathBuf>,
    #[arg(long = "metrics_out")]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "prepare",
    about = "Extract cached log-mel features and normalization factors for a dataset"
)]
pub struct PrepareArgs {
    #[arg(long = "data_name", default_value = "DCASE2018A", value_parser = DataName::NAMES)]
    pub data_name: String,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long = "data_root")]
    pub data_root: Option<PathBuf>,
}

/// Stored next to the checkpoint so evaluation can rebuild the same network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub data_name: String,
    pub epoch: usize,
    pub classes: Vec<String>,
    pub routing_iterations: usize,
    pub accuracy_1: f32,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub data_name: DataName,
    pub checkpoint: PathBuf,
    pub results: PathBuf,
    /// Selection accuracy of the saved checkpoint.
    pub best_accuracy: Option<f32>,
    /// Routing iterations of the model after the last epoch.
    pub routing_iterations: usize,
    pub records: Vec<EpochRecord>,
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub data_name: DataName,
    pub classes: Vec<String>,
    pub metrics: PhaseMetrics,
    /// Row-normalized, rows are targets.
    pub confusion: Vec<Vec<f32>>,
}

pub fn checkpoint_meta_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("json")
}

pub fn load_scene_capsnet_from_checkpoint<P: AsRef<Path>>(
    path: P,
    cfg: &SceneCapsNetConfig,
    device: &<TrainBackend as Backend>::Device,
) -> anyhow::Result<SceneCapsNet<TrainBackend>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    SceneCapsNet::<TrainBackend>::new(cfg, device)
        .load_file(path.as_ref().to_path_buf(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.as_ref().display()))
}

fn loader_config(
    cfg: &HarnessConfig,
    data_root: Option<&Path>,
    batch_size: usize,
    seed: u64,
) -> LoaderConfig {
    LoaderConfig {
        data_root: data_root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cfg.data_root.clone()),
        batch_size,
        split: SplitConfig {
            validation_amount: cfg.validation_amount,
            seed,
            ..SplitConfig::default()
        },
        extractor: cfg.extractor,
        min_shape: [min_input_side(DEFAULT_CONV_CHANNELS.len()); 2],
    }
}

fn build_sinks(
    cfg: &HarnessConfig,
    metrics_out: Option<&Path>,
    env: &str,
) -> anyhow::Result<SinkSet> {
    let mut sinks = SinkSet::new();
    if let Some(path) = metrics_out
        .map(Path::to_path_buf)
        .or_else(|| cfg.metrics_path.clone())
    {
        sinks.push(JsonlSink::create(path, env)?);
    }
    if let Some(dir) = &cfg.heatmap_dir {
        sinks.push(HeatmapSink::create(dir, env)?);
    }
    Ok(sinks)
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainReport> {
    validate_backend_choice(args.backend)?;
    let cfg = HarnessConfig::load(args.config.as_deref())?;
    let seed = args.seed.unwrap_or(cfg.seed);
    let loader_cfg = loader_config(&cfg, args.data_root.as_deref(), args.batch_size, seed);
    let loaders = load_data(&args.data_name, &loader_cfg)?;
    let name = loaders.name;
    if loaders.train.dataset().is_empty() {
        anyhow::bail!("{name} has no training files in fold {}", loader_cfg.split.fold);
    }
    let classes = loaders.classes.clone();
    let num_classes = classes.len();

    let ckpt_path = cfg.checkpoint_path(name.as_str());
    let results_path = cfg.results_path(name.as_str());
    if let Some(parent) = ckpt_path.parent() {
        fs::create_dir_all(parent)?;
    }

    <ADBackend as Backend>::seed(seed);
    let device = <ADBackend as Backend>::Device::default();
    let mut routing =
        MultiStepRouting::for_epochs(args.num_iterations, args.num_epochs).verbose(true);
    // Milestones at epoch 0 already apply to the first epoch.
    let model_cfg =
        SceneCapsNetConfig::new(num_classes).with_routing_iterations(routing.iterations());
    let mut model = SceneCapsNet::<ADBackend>::new(&model_cfg, &device);
    tracing::info!("# parameters: {}", model.num_params());

    let mut optim_features = AdamConfig::new().init::<ADBackend, ConvFeatures<ADBackend>>();
    let mut optim_classifier = AdamConfig::new().init::<ADBackend, CapsuleClassifier<ADBackend>>();
    let mut lr_features = MultiStepLr::for_epochs(FEATURES_LR, args.num_epochs);
    let mut lr_classifier = MultiStepLr::for_epochs(CLASSIFIER_LR, args.num_epochs);
    let criterion = CrossEntropyLossConfig::new().init(&device);

    let mut meters = PhaseMeters::new(num_classes);
    let mut sinks = build_sinks(&cfg, args.metrics_out.as_deref(), name.as_str())?;
    let mut table = ResultsTable::new();
    let select_on_val = !loaders.val.dataset().is_empty();
    if !select_on_val {
        tracing::warn!("{name}: validation split is empty; selecting checkpoints on test accuracy");
    }
    let mut best: Option<f32> = None;

    for epoch in 1..=args.num_epochs {
        // train loop
        let total = loaders.train.dataset().len();
        let bar = progress_bar(loaders.train.num_batches());
        let (lr_f, lr_c) = (lr_features.lr(), lr_classifier.lr());
        let mut iter = loaders.train.iter(epoch);
        let mut seen = 0usize;
        while let Some(batch) = iter.next_batch::<ADBackend>(&device)? {
            seen += batch.len();
            let (out, _prob) = model.forward(batch.features);
            let loss = criterion.forward(out.clone(), batch.targets);
            let loss_value = first_value(loss.clone())?;
            let scores = tensor_values(out)?;

            let mut grads = loss.backward();
            let grads_features = GradientsParams::from_module::<ADBackend, _>(&mut grads, &model.features);
            let grads_classifier = GradientsParams::from_module::<ADBackend, _>(&mut grads, &model.classifier);
            model = SceneCapsNet {
                features: optim_features.step(lr_f, model.features, grads_features),
                classifier: optim_classifier.step(lr_c, model.classifier, grads_classifier),
            };

            meters.add(loss_value, &scores, &batch.target_indices)?;
            bar.set_message(meters.progress_message(Phase::Train, epoch, seen, total));
            bar.inc(1);
        }
        bar.finish();
        finish_phase(epoch, Phase::Train, &mut meters, &classes, &mut sinks, &mut table)?;

        lr_features.step();
        lr_classifier.step();
        if let Some(iterations) = routing.step() {
            model.set_routing_iterations(iterations);
        }

        let eval_model = model.valid();
        evaluate(&eval_model, &loaders.val, Phase::Val, epoch, &mut meters, &device)?;
        let val = finish_phase(epoch, Phase::Val, &mut meters, &classes, &mut sinks, &mut table)?;
        evaluate(&eval_model, &loaders.test, Phase::Test, epoch, &mut meters, &device)?;
        let test = finish_phase(epoch, Phase::Test, &mut meters, &classes, &mut sinks, &mut table)?;

        let selection = if select_on_val { val.accuracy_1 } else { test.accuracy_1 };
        if best.map_or(true, |b| selection > b) {
            best = Some(selection);
            let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
            eval_model
                .save_file(ckpt_path.clone(), &recorder)
                .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))?;
            let meta = CheckpointMeta {
                data_name: name.to_string(),
                epoch,
                classes: classes.clone(),
                routing_iterations: model.routing_iterations(),
                accuracy_1: selection,
            };
            fs::write(
                checkpoint_meta_path(&ckpt_path),
                serde_json::to_string_pretty(&meta)?,
            )?;
            tracing::info!(
                "epoch {epoch}: saved {} (top-1 {selection:.2}%)",
                ckpt_path.display()
            );
        }

        table.write_csv(&results_path)?;
    }

    Ok(TrainReport {
        data_name: name,
        checkpoint: ckpt_path,
        results: results_path,
        best_accuracy: best,
        routing_iterations: model.routing_iterations(),
        records: table.records().to_vec(),
    })
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<EvalReport> {
    validate_backend_choice(args.backend)?;
    let cfg = HarnessConfig::load(args.config.as_deref())?;
    let loader_cfg = loader_config(&cfg, args.data_root.as_deref(), args.batch_size, cfg.seed);
    let loaders = load_data(&args.data_name, &loader_cfg)?;
    let name = loaders.name;
    let classes = loaders.classes.clone();

    let ckpt_path = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| cfg.checkpoint_path(name.as_str()));
    let meta_path = checkpoint_meta_path(&ckpt_path);
    let meta: Option<CheckpointMeta> = if meta_path.exists() {
        let raw = fs::read_to_string(&meta_path)
            .with_context(|| format!("failed to read {}", meta_path.display()))?;
        Some(serde_json::from_str(&raw)?)
    } else {
        None
    };
    if let Some(meta) = &meta {
        if meta.classes != classes {
            anyhow::bail!(
                "checkpoint {} was trained on classes {:?}, dataset has {:?}",
                ckpt_path.display(),
                meta.classes,
                classes
            );
        }
    }
    let iterations = args
        .num_iterations
        .or(meta.as_ref().map(|m| m.routing_iterations))
        .unwrap_or(3);

    let device = <TrainBackend as Backend>::Device::default();
    let model_cfg = SceneCapsNetConfig::new(classes.len()).with_routing_iterations(iterations);
    let model = load_scene_capsnet_from_checkpoint(&ckpt_path, &model_cfg, &device)?;

    let mut meters = PhaseMeters::new(classes.len());
    evaluate(&model, &loaders.test, Phase::Test, 1, &mut meters, &device)?;
    let metrics = meters.metrics();
    let confusion = meters.confusion.normalized();

    let mut sinks = build_sinks(&cfg, args.metrics_out.as_deref(), name.as_str())?;
    sinks.log_scalar(1, "loss", Phase::Test.as_str(), metrics.loss)?;
    sinks.log_scalar(1, "accuracy", "test_top1", metrics.accuracy_1)?;
    sinks.log_scalar(1, "accuracy", "test_top5", metrics.accuracy_5)?;
    sinks.log_confusion(1, Phase::Test, &classes, &confusion)?;

    tracing::info!(
        "{name} test --- Loss: {:.4} Top1 Accuracy: {:.2}% Top5 Accuracy: {:.2}%",
        metrics.loss,
        metrics.accuracy_1,
        metrics.accuracy_5
    );
    for (class, row) in classes.iter().zip(&confusion) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.2}")).collect();
        tracing::info!("{class:>20} | {}", cells.join(" "));
    }

    Ok(EvalReport {
        data_name: name,
        classes,
        metrics,
        confusion,
    })
}

pub fn run_prepare(args: PrepareArgs) -> anyhow::Result<PrepareReport> {
    let cfg = HarnessConfig::load(args.config.as_deref())?;
    let name = DataName::parse(&args.data_name)?;
    let data_root = args.data_root.unwrap_or_else(|| cfg.data_root.clone());
    let set = DevelopmentSet::initialize(name.layout(&data_root))?;
    let report = prepare_features(&set, &LogMelExtractor::new(cfg.extractor))?;
    tracing::info!(
        "{name}: extracted {} files, normalization {}",
        report.extracted,
        if report.norm_written { "written" } else { "kept" }
    );
    Ok(report)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; running on the WGPU backend despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}

/// Forward-only pass over `loader`, accumulating into `meters`.
fn evaluate<B: Backend>(
    model: &SceneCapsNet<B>,
    loader: &SceneLoader,
    phase: Phase,
    epoch: usize,
    meters: &mut PhaseMeters,
    device: &B::Device,
) -> anyhow::Result<()> {
    let criterion = CrossEntropyLossConfig::new().init::<B>(device);
    let total = loader.dataset().len();
    let bar = progress_bar(loader.num_batches());
    let mut iter = loader.iter(epoch);
    let mut seen = 0usize;
    while let Some(batch) = iter.next_batch::<B>(device)? {
        seen += batch.len();
        let (out, _prob) = model.forward(batch.features);
        let loss = criterion.forward(out.clone(), batch.targets);
        meters.add(first_value(loss)?, &tensor_values(out)?, &batch.target_indices)?;
        bar.set_message(meters.progress_message(phase, epoch, seen, total));
        bar.inc(1);
    }
    bar.finish();
    Ok(())
}

/// Publish the phase's metrics, store them in the table, and reset the meters.
fn finish_phase(
    epoch: usize,
    phase: Phase,
    meters: &mut PhaseMeters,
    classes: &[String],
    sinks: &mut SinkSet,
    table: &mut ResultsTable,
) -> anyhow::Result<PhaseMetrics> {
    let metrics = meters.metrics();
    let key = phase.as_str();
    sinks.log_scalar(epoch, "loss", key, metrics.loss)?;
    sinks.log_scalar(epoch, "accuracy", &format!("{key}_top1"), metrics.accuracy_1)?;
    sinks.log_scalar(epoch, "accuracy", &format!("{key}_top5"), metrics.accuracy_5)?;
    sinks.log_confusion(epoch, phase, classes, &meters.confusion.normalized())?;
    table.record(epoch, phase, metrics);
    tracing::info!("{}", meters.summary(phase, epoch));
    meters.reset();
    Ok(metrics)
}

struct PhaseMeters {
    loss: AverageValueMeter,
    accuracy: ClassAccuracyMeter,
    confusion: ConfusionMeter,
}

impl PhaseMeters {
    fn new(num_classes: usize) -> Self {
        Self {
            loss: AverageValueMeter::new(),
            accuracy: ClassAccuracyMeter::new(&TOPK),
            confusion: ConfusionMeter::new(num_classes),
        }
    }

    fn add(&mut self, loss: f32, scores: &[f32], targets: &[usize]) -> anyhow::Result<()> {
        let k = self.confusion.num_classes();
        self.loss.add(loss);
        self.accuracy.add(scores, k, targets)?;
        self.confusion.add(scores, k, targets)?;
        Ok(())
    }

    fn metrics(&self) -> PhaseMetrics {
        PhaseMetrics {
            loss: self.loss.mean(),
            accuracy_1: self.accuracy.accuracy(1).unwrap_or(0.0),
            accuracy_5: self.accuracy.accuracy(5).unwrap_or(0.0),
        }
    }

    fn progress_message(&self, phase: Phase, epoch: usize, seen: usize, total: usize) -> String {
        let m = self.metrics();
        format!(
            "{} Epoch: {epoch}---{seen}/{total} Loss: {:.2} Top1 Accuracy: {:.2}% Top5 Accuracy: {:.2}%",
            phase.title(),
            m.loss,
            m.accuracy_1,
            m.accuracy_5
        )
    }

    fn summary(&self, phase: Phase, epoch: usize) -> String {
        let m = self.metrics();
        format!(
            "{} Epoch: {epoch} Loss: {:.4} Top1 Accuracy: {:.2}% Top5 Accuracy: {:.2}%",
            phase.title(),
            m.loss,
            m.accuracy_1,
            m.accuracy_5
        )
    }

    fn reset(&mut self) {
        self.loss.reset();
        self.accuracy.reset();
        self.confusion.reset();
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} [{elapsed_precise}]") {
        bar.set_style(style);
    }
    bar
}

fn tensor_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> anyhow::Result<Vec<f32>> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read tensor data: {e:?}"))
}

fn first_value<B: Backend, const D: usize>(t: Tensor<B, D>) -> anyhow::Result<f32> {
    tensor_values(t)?
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("empty loss tensor"))
}
