//! Training history returned by a fit call
//!
//! One [`EpochRecord`] per completed epoch, appended in order and never
//! rewritten. Accuracies are fractions in [0, 1].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Metrics of one completed epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 0-based epoch index
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl EpochRecord {
    pub fn new(
        epoch: usize,
        train_loss: f64,
        train_accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
    ) -> Self {
        Self {
            epoch,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
        }
    }
}

/// Append-only list of epoch records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
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

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    pub fn train_loss(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.train_loss).collect()
    }

    pub fn train_accuracy(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.train_accuracy).collect()
    }

    pub fn val_loss(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.val_loss).collect()
    }

    pub fn val_accuracy(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.val_accuracy).collect()
    }

    /// Epoch with the highest validation accuracy (first one on ties)
    pub fn best_epoch(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }

    pub fn best_val_accuracy(&self) -> f64 {
        self.best_epoch().map(|r| r.val_accuracy).unwrap_or(0.0)
    }

    /// Write the history as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn history() -> TrainingHistory {
        let mut history = TrainingHistory::new();
        history.push(EpochRecord::new(0, 0.70, 0.50, 0.69, 0.55));
        history.push(EpochRecord::new(1, 0.50, 0.75, 0.52, 0.80));
        history.push(EpochRecord::new(2, 0.40, 0.85, 0.50, 0.80));
        history
    }

    #[test]
    fn test_series_follow_epoch_order() {
        let history = history();
        assert_eq!(history.len(), 3);
        assert_eq!(history.train_loss(), vec![0.70, 0.50, 0.40]);
        assert_eq!(history.val_accuracy(), vec![0.55, 0.80, 0.80]);
        assert_eq!(history.last().unwrap().epoch, 2);
    }

    #[test]
    fn test_best_epoch_prefers_first_on_tie() {
        let history = history();
        assert_eq!(history.best_epoch().unwrap().epoch, 1);
        assert_eq!(history.best_val_accuracy(), 0.80);
        assert_eq!(TrainingHistory::new().best_val_accuracy(), 0.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("history.json");

        let history = history();
        history.save(&path).unwrap();
        assert_eq!(TrainingHistory::load(&path).unwrap(), history);
    }
}
