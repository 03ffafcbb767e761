//! Trial events for one subject.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::Table;

/// One trial as read from the events file. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 0-based row position in the events file.
    pub position: usize,
    /// Onset in seconds from the first acquisition.
    pub onset: f64,
    /// Duration in seconds.
    pub duration: f64,
    pub condition: String,
}

impl Trial {
    pub fn new(position: usize, onset: f64, duration: f64, condition: impl Into<String>) -> Self {
        Self {
            position,
            onset,
            duration,
            condition: condition.into(),
        }
    }

    /// Unique regressor label, e.g. `larger_later_12`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.condition, self.position + 1)
    }
}

/// Load trials from an events TSV with `onset`, `duration`, and the
/// configured condition column. Row order is preserved.
pub fn load_events(path: &Path, condition_column: &str) -> Result<Vec<Trial>> {
    let table = Table::read(path)?;
    trials_from_table(&table, condition_column)
}

pub fn trials_from_table(table: &Table, condition_column: &str) -> Result<Vec<Trial>> {
    let onsets = table.numeric_column("onset", None)?;
    let durations = table.numeric_column("duration", None)?;
    let cond_idx = table.require_column(condition_column)?;

    let trials: Vec<Trial> = table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| Trial::new(i, onsets[i], durations[i], row[cond_idx].clone()))
        .collect();

    if trials.is_empty() {
        return Err(Error::data(format!(
            "{}: no trials",
            table.source.display()
        )));
    }
    if let Some(t) = trials.iter().find(|t| t.condition.is_empty()) {
        return Err(Error::data(format!(
            "{}: trial {} has an empty '{condition_column}'",
            table.source.display(),
            t.position + 1
        )));
    }
    Ok(trials)
}

/// Every onset must lie in `[0, scan_duration)` and every duration must be
/// finite and non-negative. Out-of-range trials are an error, never clipped.
pub fn validate_trials(trials: &[Trial], scan_duration: f64) -> Result<()> {
    for t in trials {
        if !t.onset.is_finite() || t.onset < 0.0 || t.onset >= scan_duration {
            return Err(Error::data(format!(
                "trial {} onset {:.3}s outside scan window [0, {:.3})s",
                t.label(),
                t.onset,
                scan_duration
            )));
        }
        if !t.duration.is_finite() || t.duration < 0.0 {
            return Err(Error::data(format!(
                "trial {} has invalid duration {}",
                t.label(),
                t.duration
            )));
        }
    }
    Ok(())
}
