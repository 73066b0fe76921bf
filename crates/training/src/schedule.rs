//! Epoch-stepped schedules for the learning rate and the routing depth.

/// `⌊fraction · num_epochs⌋` for each fraction.
pub fn milestones(num_epochs: usize, fractions: &[f64]) -> Vec<usize> {
    fractions
        .iter()
        .map(|f| (num_epochs as f64 * f).floor() as usize)
        .collect()
}

fn passed(milestones: &[usize], epoch: usize) -> usize {
    milestones.iter().filter(|&&m| m <= epoch).count()
}

/// Learning rate decayed by `gamma` at every milestone already reached.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    last_epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Milestones at half and seven tenths of the run, gamma 0.1.
    pub fn for_epochs(base_lr: f64, num_epochs: usize) -> Self {
        Self::new(base_lr, milestones(num_epochs, &[0.5, 0.7]), 0.1)
    }

    pub fn lr(&self) -> f64 {
        self.base_lr * self.gamma.powi(passed(&self.milestones, self.last_epoch) as i32)
    }

    /// Advance one epoch and return the new rate.
    pub fn step(&mut self) -> f64 {
        self.last_epoch += 1;
        self.lr()
    }
}

/// Routing iterations raised by `addition` at every milestone already reached.
#[derive(Debug, Clone)]
pub struct MultiStepRouting {
    base: usize,
    milestones: Vec<usize>,
    addition: usize,
    last_epoch: usize,
    verbose: bool,
}

impl MultiStepRouting {
    pub fn new(base: usize, milestones: Vec<usize>, addition: usize) -> Self {
        Self {
            base,
            milestones,
            addition,
            last_epoch: 0,
            verbose: false,
        }
    }

    /// Milestones at seven and nine tenths of the run, +2 iterations each.
    pub fn for_epochs(base: usize, num_epochs: usize) -> Self {
        Self::new(base, milestones(num_epochs, &[0.7, 0.9]), 2)
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn iterations(&self) -> usize {
        self.base + self.addition * passed(&self.milestones, self.last_epoch)
    }

    /// Advance one epoch; returns the new iteration count when it changed.
    pub fn step(&mut self) -> Option<usize> {
        let before = self.iterations();
        self.last_epoch += 1;
        let after = self.iterations();
        if after == before {
            return None;
        }
        if self.verbose {
            tracing::info!(
                "epoch {}: routing iterations {before} -> {after}",
                self.last_epoch
            );
        }
        Some(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestones_floor_fractions() {
        assert_eq!(milestones(100, &[0.5, 0.7]), vec![50, 70]);
        assert_eq!(milestones(3, &[0.5, 0.7]), vec![1, 2]);
    }

    #[test]
    fn lr_decays_exactly_at_milestones() {
        let mut s = MultiStepLr::for_epochs(1e-3, 10);
        let mut lrs = vec![s.lr()];
        for _ in 0..8 {
            lrs.push(s.step());
        }
        let expected = [1e-3, 1e-3, 1e-3, 1e-3, 1e-3, 1e-4, 1e-4, 1e-5, 1e-5];
        for (got, want) in lrs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{lrs:?}");
        }
    }

    #[test]
    fn routing_grows_by_two_per_milestone() {
        let mut s = MultiStepRouting::for_epochs(3, 10).verbose(true);
        let changes: Vec<(usize, usize)> = (1..=10)
            .filter_map(|epoch| s.step().map(|it| (epoch, it)))
            .collect();
        assert_eq!(changes, vec![(7, 5), (9, 7)]);
        assert_eq!(s.iterations(), 7);
    }

    #[test]
    fn single_epoch_run_starts_past_both_routing_milestones() {
        let mut s = MultiStepRouting::for_epochs(3, 1);
        assert_eq!(s.iterations(), 7);
        assert_eq!(s.step(), None);
        assert_eq!(s.iterations(), 7);
    }
}
