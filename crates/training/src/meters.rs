//! Running metrics accumulated over one pass of a loader.

/// Mean and sample standard deviation of scalar observations.
#[derive(Debug, Clone, Default)]
pub struct AverageValueMeter {
    n: usize,
    sum: f64,
    sum_sq: f64,
}

impl AverageValueMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f32) {
        let v = value as f64;
        self.n += 1;
        self.sum += v;
        self.sum_sq += v * v;
    }

    pub fn count(&self) -> usize {
        self.n
    }

    /// `(mean, std)`; NaN mean before any observation, zero std below two.
    pub fn value(&self) -> (f32, f32) {
        if self.n == 0 {
            return (f32::NAN, f32::NAN);
        }
        let n = self.n as f64;
        let mean = self.sum / n;
        let std = if self.n < 2 {
            0.0
        } else {
            ((self.sum_sq - n * mean * mean) / (n - 1.0)).max(0.0).sqrt()
        };
        (mean as f32, std as f32)
    }

    pub fn mean(&self) -> f32 {
        self.value().0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Top-k accuracy, reported in percent.
#[derive(Debug, Clone)]
pub struct ClassAccuracyMeter {
    topk: Vec<usize>,
    correct: Vec<usize>,
    n: usize,
}

impl ClassAccuracyMeter {
    pub fn new(topk: &[usize]) -> Self {
        Self {
            topk: topk.to_vec(),
            correct: vec![0; topk.len()],
            n: 0,
        }
    }

    /// `scores` is row-major `[targets.len(), num_classes]`. A `k` above the class
    /// count counts every sample as correct.
    pub fn add(&mut self, scores: &[f32], num_classes: usize, targets: &[usize]) -> anyhow::Result<()> {
        check_scores(scores, num_classes, targets)?;
        for (row, &target) in scores.chunks(num_classes).zip(targets) {
            let rank = rank_of(row, target);
            for (k, correct) in self.topk.iter().zip(self.correct.iter_mut()) {
                if rank < *k {
                    *correct += 1;
                }
            }
        }
        self.n += targets.len();
        Ok(())
    }

    /// Accuracy for the `k` passed at construction, or `None` if it was not tracked.
    pub fn accuracy(&self, k: usize) -> Option<f32> {
        let pos = self.topk.iter().position(|&t| t == k)?;
        Some(self.percent(self.correct[pos]))
    }

    /// Accuracies in the order the `k`s were given.
    pub fn values(&self) -> Vec<f32> {
        self.correct.iter().map(|&c| self.percent(c)).collect()
    }

    pub fn reset(&mut self) {
        self.correct.iter_mut().for_each(|c| *c = 0);
        self.n = 0;
    }

    fn percent(&self, correct: usize) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            100.0 * correct as f32 / self.n as f32
        }
    }
}

/// K x K counts of (target, argmax prediction).
#[derive(Debug, Clone)]
pub struct ConfusionMeter {
    k: usize,
    counts: Vec<u64>,
}

impl ConfusionMeter {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            counts: vec![0; k * k],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.k
    }

    pub fn add(&mut self, scores: &[f32], num_classes: usize, targets: &[usize]) -> anyhow::Result<()> {
        if num_classes != self.k {
            anyhow::bail!("confusion meter tracks {} classes, got {num_classes}", self.k);
        }
        check_scores(scores, num_classes, targets)?;
        for (row, &target) in scores.chunks(num_classes).zip(targets) {
            let pred = argmax(row);
            self.counts[target * self.k + pred] += 1;
        }
        Ok(())
    }

    /// Raw counts, rows are targets.
    pub fn counts(&self) -> Vec<Vec<u64>> {
        self.counts.chunks(self.k.max(1)).map(|r| r.to_vec()).collect()
    }

    /// Each row divided by its sum; empty rows stay zero.
    pub fn normalized(&self) -> Vec<Vec<f32>> {
        self.counts
            .chunks(self.k.max(1))
            .map(|row| {
                let total: u64 = row.iter().sum();
                row.iter()
                    .map(|&c| if total == 0 { 0.0 } else { c as f32 / total as f32 })
                    .collect()
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }
}

fn check_scores(scores: &[f32], num_classes: usize, targets: &[usize]) -> anyhow::Result<()> {
    if num_classes == 0 {
        anyhow::bail!("num_classes must be positive");
    }
    if scores.len() != targets.len() * num_classes {
        anyhow::bail!(
            "score buffer has {} values, expected {} x {num_classes}",
            scores.len(),
            targets.len()
        );
    }
    if let Some(bad) = targets.iter().find(|&&t| t >= num_classes) {
        anyhow::bail!("target {bad} out of range for {num_classes} classes");
    }
    Ok(())
}

/// Position of `target` when scores are sorted descending; ties go to the lower index.
fn rank_of(row: &[f32], target: usize) -> usize {
    let s = row[target];
    row.iter()
        .enumerate()
        .filter(|&(j, &v)| v > s || (v == s && j < target))
        .count()
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (j, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = j;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_meter_tracks_mean_and_std() {
        let mut m = AverageValueMeter::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.add(v);
        }
        let (mean, std) = m.value();
        assert!((mean - 2.5).abs() < 1e-6);
        assert!((std - 1.290_994_4).abs() < 1e-5);
        m.reset();
        assert_eq!(m.count(), 0);
        assert!(m.mean().is_nan());
    }

    #[test]
    fn topk_accuracy_in_percent() {
        let mut m = ClassAccuracyMeter::new(&[1, 5]);
        // 6 classes; first sample correct at top-1, second only within top-5, third outside.
        let scores = [
            0.9, 0.1, 0.0, 0.0, 0.0, 0.0, //
            0.5, 0.1, 0.2, 0.3, 0.4, 0.0, //
            0.1, 0.2, 0.3, 0.4, 0.5, 0.0,
        ];
        m.add(&scores, 6, &[0, 1, 5]).unwrap();
        assert!((m.accuracy(1).unwrap() - 100.0 / 3.0).abs() < 1e-4);
        assert!((m.accuracy(5).unwrap() - 200.0 / 3.0).abs() < 1e-4);
        assert!(m.accuracy(3).is_none());
    }

    #[test]
    fn topk_larger_than_class_count_is_always_correct() {
        let mut m = ClassAccuracyMeter::new(&[1, 5]);
        m.add(&[0.2, 0.8, 0.7, 0.3], 2, &[0, 1]).unwrap();
        assert_eq!(m.values(), vec![0.0, 100.0]);
        m.reset();
        assert_eq!(m.values(), vec![0.0, 0.0]);
    }

    #[test]
    fn meters_reject_bad_shapes() {
        let mut m = ClassAccuracyMeter::new(&[1]);
        assert!(m.add(&[0.1, 0.2, 0.3], 2, &[0, 1]).is_err());
        assert!(m.add(&[0.1, 0.2], 2, &[2]).is_err());
        let mut c = ConfusionMeter::new(3);
        assert!(c.add(&[0.1, 0.2], 2, &[0]).is_err());
    }

    #[test]
    fn normalized_confusion_rows_sum_to_one() {
        let mut c = ConfusionMeter::new(3);
        let scores = [
            0.8, 0.1, 0.1, //
            0.1, 0.8, 0.1, //
            0.7, 0.2, 0.1, //
            0.1, 0.1, 0.8,
        ];
        c.add(&scores, 3, &[0, 0, 0, 2]).unwrap();
        assert_eq!(c.counts()[0], vec![2, 1, 0]);
        let norm = c.normalized();
        for row in [&norm[0], &norm[2]] {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
        assert!(norm[1].iter().all(|&v| v == 0.0));
        c.reset();
        assert!(c.counts().iter().flatten().all(|&v| v == 0));
    }
}
