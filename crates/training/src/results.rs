use std::path::Path;

use anyhow::Context;
use data_contracts::{EpochRecord, Phase, PhaseMetrics};

/// Per-epoch statistics, rewritten in full on every flush.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    records: Vec<EpochRecord>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one phase's metrics under `epoch` (1-based), opening the row if needed.
    pub fn record(&mut self, epoch: usize, phase: Phase, metrics: PhaseMetrics) {
        match self.records.iter_mut().find(|r| r.epoch == epoch) {
            Some(row) => row.set(phase, metrics),
            None => {
                let mut row = EpochRecord::new(epoch);
                row.set(phase, metrics);
                self.records.push(row);
            }
        }
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        for row in &self.records {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(loss: f32) -> PhaseMetrics {
        PhaseMetrics {
            loss,
            accuracy_1: 50.0,
            accuracy_5: 100.0,
        }
    }

    #[test]
    fn rows_merge_phases_and_rewrite_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statistics/DCASE2018A_results.csv");
        let mut table = ResultsTable::new();
        table.record(1, Phase::Train, metrics(1.5));
        table.record(1, Phase::Val, metrics(1.25));
        table.record(1, Phase::Test, metrics(1.0));
        table.write_csv(&path).unwrap();
        table.record(2, Phase::Train, metrics(0.5));
        table.write_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec![
                "epoch",
                "train_loss",
                "val_loss",
                "test_loss",
                "train_accuracy_1",
                "val_accuracy_1",
                "test_accuracy_1",
                "train_accuracy_5",
                "val_accuracy_5",
                "test_accuracy_5",
            ]
        );
        let rows: Vec<EpochRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].epoch, 1);
        assert_eq!(rows[0].val_loss, 1.25);
        assert_eq!(rows[1].train_loss, 0.5);
    }
}
