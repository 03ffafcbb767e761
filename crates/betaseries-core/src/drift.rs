//! Low-frequency drift regressors.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Drift basis appended to the nuisance block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DriftModel {
    None,
    /// Discrete cosine high-pass basis below `cutoff_hz`.
    Cosine { cutoff_hz: f64 },
    /// Centred polynomial terms of degree 1..=order.
    Polynomial { order: usize },
}

impl DriftModel {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::None => Ok(()),
            Self::Cosine { cutoff_hz } if cutoff_hz.is_finite() && cutoff_hz > 0.0 => Ok(()),
            Self::Cosine { cutoff_hz } => {
                Err(format!("cutoff_hz must be positive, got {cutoff_hz}"))
            }
            Self::Polynomial { order } if order >= 1 => Ok(()),
            Self::Polynomial { .. } => Err("polynomial order must be at least 1".to_string()),
        }
    }

    /// Highest usable cosine cutoff for a sampling interval: the Nyquist rate.
    pub fn max_cutoff_hz(tr: f64) -> f64 {
        0.5 / tr
    }

    /// Number of drift columns for a run of `n` time points.
    ///
    /// The cosine basis never exceeds `n - 1` columns.
    pub fn n_columns(&self, n: usize, tr: f64) -> usize {
        match *self {
            Self::None => 0,
            Self::Cosine { cutoff_hz } => {
                let count = (2.0 * n as f64 * tr * cutoff_hz).floor();
                (count.min(n.saturating_sub(1) as f64)) as usize
            }
            Self::Polynomial { order } => order,
        }
    }

    /// Drift columns, each of length `n`, with their labels.
    pub fn columns(&self, n: usize, tr: f64) -> Vec<(String, Vec<f64>)> {
        let count = self.n_columns(n, tr);
        match *self {
            Self::None => Vec::new(),
            Self::Cosine { .. } => {
                let norm = (2.0 / n as f64).sqrt();
                (1..=count)
                    .map(|k| {
                        let col = (0..n)
                            .map(|i| norm * (PI * (i as f64 + 0.5) * k as f64 / n as f64).cos())
                            .collect();
                        (format!("cosine{:02}", k), col)
                    })
                    .collect()
            }
            Self::Polynomial { .. } => {
                let mid = (n as f64 - 1.0) / 2.0;
                (1..=count)
                    .map(|p| {
                        let mut col: Vec<f64> =
                            (0..n).map(|i| (i as f64 - mid).powi(p as i32)).collect();
                        let mean = col.iter().sum::<f64>() / n as f64;
                        for v in &mut col {
                            *v -= mean;
                        }
                        let max = col.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
                        if max > 0.0 {
                            for v in &mut col {
                                *v /= max;
                            }
                        }
                        (format!("poly{p}"), col)
                    })
                    .collect()
            }
        }
    }
}
