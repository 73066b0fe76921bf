use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Val,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
            Phase::Test => "test",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Phase::Train => "Train",
            Phase::Val => "Val",
            Phase::Test => "Test",
        }
    }
}

/// Scalars produced by one pass over a split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub loss: f32,
    /// Top-1 accuracy in percent.
    pub accuracy_1: f32,
    /// Top-5 accuracy in percent.
    pub accuracy_5: f32,
}

/// One row of `statistics/<NAME>_results.csv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub test_loss: f32,
    pub train_accuracy_1: f32,
    pub val_accuracy_1: f32,
    pub test_accuracy_1: f32,
    pub train_accuracy_5: f32,
    pub val_accuracy_5: f32,
    pub test_accuracy_5: f32,
}

impl EpochRecord {
    pub fn new(epoch: usize) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    pub fn set(&mut self, phase: Phase, metrics: PhaseMetrics) {
        let (loss, acc1, acc5) = match phase {
            Phase::Train => (
                &mut self.train_loss,
                &mut self.train_accuracy_1,
                &mut self.train_accuracy_5,
            ),
            Phase::Val => (
                &mut self.val_loss,
                &mut self.val_accuracy_1,
                &mut self.val_accuracy_5,
            ),
            Phase::Test => (
                &mut self.test_loss,
                &mut self.test_accuracy_1,
                &mut self.test_accuracy_5,
            ),
        };
        *loss = metrics.loss;
        *acc1 = metrics.accuracy_1;
        *acc5 = metrics.accuracy_5;
    }
}
