#![recursion_limit = "256"]

pub mod config;
pub mod meters;
pub mod results;
pub mod schedule;
pub mod util;
pub mod visual;

pub use config::HarnessConfig;
pub use meters::{AverageValueMeter, ClassAccuracyMeter, ConfusionMeter};
pub use models::{SceneCapsNet, SceneCapsNetConfig};
pub use results::ResultsTable;
pub use schedule::{MultiStepLr, MultiStepRouting};
pub use util::{run_eval, run_train, EvalArgs, TrainArgs};
pub use visual::{HeatmapSink, JsonlSink, MetricsSink, SinkSet};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

/// Install the fmt subscriber used by the binaries; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
