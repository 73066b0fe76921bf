//! Local replacements for the line-plot and heatmap loggers of a training run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use data_contracts::Phase;
use image::{Rgb, RgbImage};

/// Receives per-epoch scalars and confusion matrices.
pub trait MetricsSink {
    /// One point of the line plot `plot` (e.g. "loss"), on series `series` (e.g. "train_top1").
    fn log_scalar(&mut self, epoch: usize, plot: &str, series: &str, value: f32)
        -> anyhow::Result<()>;

    /// Row-normalized confusion matrix, rows are targets in `classes` order.
    fn log_confusion(
        &mut self,
        epoch: usize,
        phase: Phase,
        classes: &[String],
        matrix: &[Vec<f32>],
    ) -> anyhow::Result<()>;
}

/// Appends one JSON object per event to a file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
    env: String,
}

impl JsonlSink {
    pub fn create(path: impl Into<PathBuf>, env: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(Self {
            path,
            env: env.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: serde_json::Value) -> anyhow::Result<()> {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

impl MetricsSink for JsonlSink {
    fn log_scalar(
        &mut self,
        epoch: usize,
        plot: &str,
        series: &str,
        value: f32,
    ) -> anyhow::Result<()> {
        self.append(serde_json::json!({
            "env": self.env,
            "epoch": epoch,
            "plot": plot,
            "series": series,
            "value": value,
        }))
    }

    fn log_confusion(
        &mut self,
        epoch: usize,
        phase: Phase,
        classes: &[String],
        matrix: &[Vec<f32>],
    ) -> anyhow::Result<()> {
        self.append(serde_json::json!({
            "env": self.env,
            "epoch": epoch,
            "plot": "confusion",
            "series": phase.as_str(),
            "classes": classes,
            "matrix": matrix,
        }))
    }
}

/// Renders each confusion matrix to `<dir>/<env>_<phase>_confusion.png`, replacing
/// the previous epoch's image.
#[derive(Debug, Clone)]
pub struct HeatmapSink {
    dir: PathBuf,
    env: String,
    cell: u32,
}

impl HeatmapSink {
    pub fn create(dir: impl Into<PathBuf>, env: impl Into<String>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self {
            dir,
            env: env.into(),
            cell: 24,
        })
    }

    pub fn with_cell_size(mut self, cell: u32) -> Self {
        self.cell = cell.max(1);
        self
    }

    pub fn path_for(&self, phase: Phase) -> PathBuf {
        self.dir
            .join(format!("{}_{}_confusion.png", self.env, phase.as_str()))
    }
}

impl MetricsSink for HeatmapSink {
    fn log_scalar(&mut self, _: usize, _: &str, _: &str, _: f32) -> anyhow::Result<()> {
        Ok(())
    }

    fn log_confusion(
        &mut self,
        _epoch: usize,
        phase: Phase,
        _classes: &[String],
        matrix: &[Vec<f32>],
    ) -> anyhow::Result<()> {
        let img = render_heatmap(matrix, self.cell);
        let path = self.path_for(phase);
        img.save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Dark blue at 0 through red at 1; rows top to bottom, columns left to right.
pub fn render_heatmap(matrix: &[Vec<f32>], cell: u32) -> RgbImage {
    let rows = matrix.len().max(1) as u32;
    let cols = matrix.iter().map(Vec::len).max().unwrap_or(0).max(1) as u32;
    RgbImage::from_fn(cols * cell, rows * cell, |x, y| {
        let v = matrix
            .get((y / cell) as usize)
            .and_then(|row| row.get((x / cell) as usize))
            .copied()
            .unwrap_or(0.0);
        heat_color(v)
    })
}

fn heat_color(v: f32) -> Rgb<u8> {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let r = (255.0 * v) as u8;
    let g = (255.0 * (1.0 - (2.0 * v - 1.0).abs()) * 0.6) as u8;
    let b = (160.0 * (1.0 - v)) as u8;
    Rgb([r, g, b])
}

/// Fans every event out to all registered sinks.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl MetricsSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for SinkSet {
    fn log_scalar(
        &mut self,
        epoch: usize,
        plot: &str,
        series: &str,
        value: f32,
    ) -> anyhow::Result<()> {
        for sink in &mut self.sinks {
            sink.log_scalar(epoch, plot, series, value)?;
        }
        Ok(())
    }

    fn log_confusion(
        &mut self,
        epoch: usize,
        phase: Phase,
        classes: &[String],
        matrix: &[Vec<f32>],
    ) -> anyhow::Result<()> {
        for sink in &mut self.sinks {
            sink.log_confusion(epoch, phase, classes, matrix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlSink::create(dir.path().join("logs/metrics.jsonl"), "DCASE2018A").unwrap();
        sink.log_scalar(1, "loss", "train", 0.75).unwrap();
        sink.log_confusion(1, Phase::Test, &["a".into(), "b".into()], &[vec![1.0, 0.0], vec![0.5, 0.5]])
            .unwrap();

        let raw = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["series"], "train");
        assert_eq!(lines[0]["value"], 0.75);
        assert_eq!(lines[1]["series"], "test");
        assert_eq!(lines[1]["matrix"][1][0], 0.5);
    }

    #[test]
    fn heatmap_sink_writes_png_sized_by_classes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sinks = SinkSet::new();
        let heatmap = HeatmapSink::create(dir.path(), "DCASE2018A")
            .unwrap()
            .with_cell_size(4);
        let path = heatmap.path_for(Phase::Train);
        sinks.push(heatmap);
        let matrix = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.2, 0.3, 0.5]];
        sinks
            .log_confusion(3, Phase::Train, &["a".into(), "b".into(), "c".into()], &matrix)
            .unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (12, 12));
        assert_eq!(*img.get_pixel(0, 0), heat_color(1.0));
        assert_eq!(*img.get_pixel(5, 0), heat_color(0.0));
    }
}
