//! Helpers that write a tiny DCASE-style development package to disk.

use scene_dataset::{DataName, DatasetLayout};
use std::fs;
use std::path::Path;

pub struct FileSpec {
    pub name: String,
    pub label: String,
    pub identifier: String,
}

impl FileSpec {
    pub fn new(name: impl Into<String>, label: &str, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            identifier: identifier.into(),
        }
    }
}

pub const SAMPLE_RATE: u32 = 8000;

pub fn write_tone(path: &Path, freq: f32, seconds: f32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let n = (SAMPLE_RATE as f32 * seconds) as usize;
    for i in 0..n {
        let t = i as f32 / SAMPLE_RATE as f32;
        let v = 0.3 * (2.0 * std::f32::consts::PI * freq * t).sin();
        writer.write_sample((v * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write meta.csv, fold1 lists and audio for `files`; `eval` names go to fold1_evaluate.
pub fn write_dev_set(
    data_root: &Path,
    name: DataName,
    files: &[FileSpec],
    eval: &[String],
) -> anyhow::Result<DatasetLayout> {
    let layout = name.layout(data_root);
    let package = layout.package_root();
    fs::create_dir_all(package.join("audio"))?;
    fs::create_dir_all(package.join("evaluation_setup"))?;

    let mut meta = String::from("filename\tscene_label\tidentifier\tsource_label\n");
    let mut train = String::from("filename\tscene_label\n");
    let mut evaluate = String::from("filename\tscene_label\n");
    for (i, f) in files.iter().enumerate() {
        let filename = format!("audio/{}.wav", f.name);
        let freq = 200.0 + 150.0 * (f.label.len() as f32) + 10.0 * i as f32;
        write_tone(&package.join(&filename), freq, 0.5)?;
        meta.push_str(&format!("{filename}\t{}\t{}\ta\n", f.label, f.identifier));
        let line = format!("{filename}\t{}\n", f.label);
        if eval.contains(&f.name) {
            evaluate.push_str(&line);
        } else {
            train.push_str(&line);
        }
    }
    fs::write(package.join("meta.csv"), meta)?;
    fs::write(package.join("evaluation_setup/fold1_train.csv"), train)?;
    fs::write(package.join("evaluation_setup/fold1_evaluate.csv"), evaluate)?;
    Ok(layout)
}

/// Two scenes, three recording locations each with two segments, plus two eval files per scene.
pub fn standard_files() -> Vec<FileSpec> {
    let mut files = Vec::new();
    for label in ["park", "airport"] {
        for loc in 0..3 {
            for seg in 0..2 {
                files.push(FileSpec::new(
                    format!("{label}-loc{loc}-{seg}"),
                    label,
                    format!("{label}-loc{loc}"),
                ));
            }
        }
        for seg in 0..2 {
            files.push(FileSpec::new(
                format!("{label}-eval-{seg}"),
                label,
                format!("{label}-eval"),
            ));
        }
    }
    files
}

pub fn standard_eval() -> Vec<String> {
    ["park-eval-0", "park-eval-1", "airport-eval-0", "airport-eval-1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
