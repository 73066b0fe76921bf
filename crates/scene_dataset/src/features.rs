//! Log-mel feature extraction and the on-disk feature cache.

use crate::types::{DatasetResult, SceneDatasetError};
use rustfft::{num_complex::Complex, FftPlanner};
use std::fs;
use std::path::{Path, PathBuf};

const FEATURE_MAGIC: &[u8; 4] = b"SMF1";
const FEATURE_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;
const FEATURE_EXT: &str = "smf";

/// Band-major feature matrix: `data[band * frames + frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub bands: usize,
    pub frames: usize,
    /// Seconds between consecutive frames.
    pub time_resolution: f32,
    pub data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(bands: usize, frames: usize, time_resolution: f32, data: Vec<f32>) -> DatasetResult<Self> {
        if data.len() != bands * frames {
            return Err(SceneDatasetError::Other(format!(
                "feature data has {} values, expected {bands}x{frames}",
                data.len()
            )));
        }
        Ok(Self {
            bands,
            frames,
            time_resolution,
            data,
        })
    }

    pub fn band(&self, band: usize) -> &[f32] {
        &self.data[band * self.frames..(band + 1) * self.frames]
    }

    pub fn band_mut(&mut self, band: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.data[band * frames..(band + 1) * frames]
    }

    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        buf.extend_from_slice(FEATURE_MAGIC);
        buf.extend_from_slice(&FEATURE_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.bands as u32).to_le_bytes());
        buf.extend_from_slice(&(self.frames as u32).to_le_bytes());
        buf.extend_from_slice(&self.time_resolution.to_le_bytes());
        for v in &self.data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(path, buf).map_err(SceneDatasetError::io(path))
    }

    pub fn load(path: &Path) -> DatasetResult<Self> {
        let data = fs::read(path).map_err(SceneDatasetError::io(path))?;
        let bad = |msg: String| SceneDatasetError::FeatureFormat {
            path: path.to_path_buf(),
            msg,
        };
        if data.len() < HEADER_LEN {
            return Err(bad("file too small".into()));
        }
        if &data[0..4] != FEATURE_MAGIC {
            return Err(bad("bad magic".into()));
        }
        let version = read_u32_le(&data[4..8]);
        if version != FEATURE_VERSION {
            return Err(bad(format!("unsupported version {version}")));
        }
        let bands = read_u32_le(&data[8..12]) as usize;
        let frames = read_u32_le(&data[12..16]) as usize;
        let time_resolution = f32::from_le_bytes(read_arr(&data[16..20]));
        let expected = bands
            .checked_mul(frames)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| bad("overflow computing payload size".into()))?;
        if data.len() - HEADER_LEN != expected {
            return Err(bad(format!(
                "payload is {} bytes, expected {expected}",
                data.len() - HEADER_LEN
            )));
        }
        let values = data[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(read_arr(c)))
            .collect();
        Ok(Self {
            bands,
            frames,
            time_resolution,
            data: values,
        })
    }
}

fn read_arr(data: &[u8]) -> [u8; 4] {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    arr
}

fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes(read_arr(data))
}

/// Cache path for an audio file: its basename with the extension swapped.
pub fn feature_path_for(features_dir: &Path, audio_filename: &str) -> PathBuf {
    let name = Path::new(audio_filename)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(audio_filename));
    features_dir.join(name.with_extension(FEATURE_EXT))
}

/// Read a wav file and downmix it to mono f32 in [-1, 1].
pub fn load_audio_mono(path: &Path) -> DatasetResult<(Vec<f32>, u32)> {
    let wav_err = |source| SceneDatasetError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let reader = hound::WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(wav_err)?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Turns mono audio into a feature matrix.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, audio: &[f32], sample_rate: u32) -> DatasetResult<FeatureMatrix>;

    fn extract_file(&self, path: &Path) -> DatasetResult<FeatureMatrix> {
        let (audio, sample_rate) = load_audio_mono(path)?;
        self.extract(&audio, sample_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LogMelConfig {
    pub n_mels: usize,
    pub win_length_seconds: f32,
    pub hop_length_seconds: f32,
    pub n_fft: usize,
    pub fmin: f32,
    /// Upper band edge; `None` means Nyquist.
    pub fmax: Option<f32>,
}

impl Default for LogMelConfig {
    fn default() -> Self {
        Self {
            n_mels: 40,
            win_length_seconds: 0.04,
            hop_length_seconds: 0.02,
            n_fft: 2048,
            fmin: 0.0,
            fmax: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogMelExtractor {
    cfg: LogMelConfig,
}

impl LogMelExtractor {
    pub fn new(cfg: LogMelConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &LogMelConfig {
        &self.cfg
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Triangular mel filters (Slaney scale and area normalization), `[n_mels][n_fft / 2 + 1]`.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let bins = n_fft / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz: Vec<f32> = (0..bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();
    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (hi - lo).max(f32::EPSILON);
            bin_hz
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo).max(f32::EPSILON);
                    let upper = (hi - f) / (hi - center).max(f32::EPSILON);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

impl FeatureExtractor for LogMelExtractor {
    fn extract(&self, audio: &[f32], sample_rate: u32) -> DatasetResult<FeatureMatrix> {
        if sample_rate == 0 {
            return Err(SceneDatasetError::Other("sample rate must be positive".into()));
        }
        let cfg = &self.cfg;
        let sr = sample_rate as f32;
        let hop = ((cfg.hop_length_seconds * sr).round() as usize).max(1);
        let win = ((cfg.win_length_seconds * sr).round() as usize).max(1);
        let n_fft = cfg.n_fft.max(win.next_power_of_two());
        let fmax = cfg.fmax.unwrap_or(sr / 2.0).min(sr / 2.0);
        if cfg.n_mels == 0 || cfg.fmin >= fmax {
            return Err(SceneDatasetError::Other(format!(
                "invalid mel config: n_mels {}, fmin {}, fmax {fmax}",
                cfg.n_mels, cfg.fmin
            )));
        }

        // Asymmetric (periodic) hamming window.
        let window: Vec<f32> = (0..win)
            .map(|n| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * n as f32 / win as f32).cos())
            .collect();
        let filters = mel_filterbank(sample_rate, n_fft, cfg.n_mels, cfg.fmin, fmax);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);

        let frames = 1 + audio.len() / hop;
        let bins = n_fft / 2 + 1;
        let pad = (n_fft - win) / 2;
        let mut data = vec![0.0f32; cfg.n_mels * frames];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut magnitude = vec![0.0f32; bins];

        for t in 0..frames {
            buffer.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            // Frames are centered on t * hop.
            let start = (t * hop) as isize - (win / 2) as isize;
            for (n, w) in window.iter().enumerate() {
                let idx = start + n as isize;
                if idx >= 0 && (idx as usize) < audio.len() {
                    buffer[pad + n] = Complex::new(audio[idx as usize] * w, 0.0);
                }
            }
            fft.process(&mut buffer);
            for (m, c) in magnitude.iter_mut().zip(&buffer[..bins]) {
                *m = c.norm();
            }
            for (band, filter) in filters.iter().enumerate() {
                let energy: f32 = filter.iter().zip(&magnitude).map(|(w, m)| w * m).sum();
                data[band * frames + t] = (energy + f32::EPSILON).ln();
            }
        }

        FeatureMatrix::new(cfg.n_mels, frames, hop as f32 / sr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0f32, 440.0, 1000.0, 4000.0, 22050.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.5, "{hz} -> {back}");
        }
    }

    #[test]
    fn filters_cover_each_band() {
        let filters = mel_filterbank(16_000, 512, 20, 0.0, 8000.0);
        assert_eq!(filters.len(), 20);
        for f in &filters {
            assert_eq!(f.len(), 257);
            assert!(f.iter().any(|w| *w > 0.0));
        }
    }

    #[test]
    fn frame_count_follows_hop() {
        let extractor = LogMelExtractor::new(LogMelConfig {
            n_mels: 8,
            n_fft: 256,
            ..Default::default()
        });
        let audio = vec![0.1f32; 8000];
        let feats = extractor.extract(&audio, 8000).unwrap();
        // hop = 160 samples at 8 kHz.
        assert_eq!(feats.frames, 1 + 8000 / 160);
        assert_eq!(feats.bands, 8);
        assert!((feats.time_resolution - 0.02).abs() < 1e-6);
        assert!(feats.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn feature_path_swaps_extension() {
        let p = feature_path_for(Path::new("data/X/features"), "audio/park-lyon-1-a.wav");
        assert_eq!(p, PathBuf::from("data/X/features/park-lyon-1-a.smf"));
    }
}
