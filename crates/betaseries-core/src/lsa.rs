//! Least-squares-all fit.
//!
//! The design is factorized once with an SVD and the solve is applied to all
//! spatial units together. Conditioning is checked before solving: a design
//! whose condition number exceeds the configured limit is rejected with the
//! columns implicated by the smallest singular vector, never pseudo-inverted.

use nalgebra::DMatrix;
use serde::Serialize;

use crate::design::DesignMatrix;
use crate::error::{Error, IllPosedModel, Result};
use crate::events::Trial;

/// Loadings on the smallest right singular vector at or above this magnitude
/// are reported as collinear.
const COLLINEAR_LOADING: f64 = 0.1;

const SVD_MAX_ITERATIONS: usize = 10_000;

/// Conditioning diagnostics of a successful fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitDiagnostics {
    pub condition_number: f64,
    pub rank: usize,
    pub n_rows: usize,
    pub n_columns: usize,
}

/// Coefficients for the trial columns only.
#[derive(Debug, Clone)]
pub struct BetaSeries {
    pub trials: Vec<Trial>,
    pub units: Vec<String>,
    /// `n_trials x n_units`, rows in input trial order.
    pub values: DMatrix<f64>,
    pub diagnostics: FitDiagnostics,
}

impl BetaSeries {
    pub fn n_trials(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_units(&self) -> usize {
        self.values.ncols()
    }

    /// Betas of trial `i` across all units.
    pub fn trial_betas(&self, i: usize) -> Vec<f64> {
        self.values.row(i).iter().copied().collect()
    }

    /// Beta series of unit `j`, one value per trial.
    pub fn unit_series(&self, j: usize) -> Vec<f64> {
        self.values.column(j).iter().copied().collect()
    }
}

/// Fit all units and return the full coefficient matrix
/// (`n_columns x n_units`) with diagnostics.
pub fn solve(
    design: &DesignMatrix,
    signal: &DMatrix<f64>,
    max_condition_number: f64,
) -> Result<(DMatrix<f64>, FitDiagnostics)> {
    let x = &design.matrix;
    let (n_rows, n_columns) = x.shape();

    if signal.nrows() != n_rows {
        return Err(Error::data(format!(
            "signal has {} time points, design has {n_rows}",
            signal.nrows()
        )));
    }
    if signal.ncols() == 0 {
        return Err(Error::data("signal has no spatial units"));
    }
    if signal.iter().any(|v| !v.is_finite()) {
        return Err(Error::data("signal contains non-finite values"));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::data("design matrix contains non-finite values"));
    }
    if n_columns > n_rows {
        return Err(IllPosedModel {
            condition_number: f64::INFINITY,
            rank: n_rows,
            n_rows,
            n_columns,
            collinear_columns: Vec::new(),
            detail: format!("{n_columns} regressors exceed {n_rows} time points"),
        }
        .into());
    }

    let svd = x
        .clone()
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| IllPosedModel {
            condition_number: f64::NAN,
            rank: 0,
            n_rows,
            n_columns,
            collinear_columns: Vec::new(),
            detail: "singular value decomposition did not converge".to_string(),
        })?;

    let sv = &svd.singular_values;
    let s_max = sv.iter().copied().fold(0.0_f64, f64::max);
    let (min_idx, s_min) = sv
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, s)| if s < acc.1 { (i, s) } else { acc });

    let condition_number = if s_min > 0.0 {
        s_max / s_min
    } else {
        f64::INFINITY
    };
    let rank_tol = s_max * n_rows.max(n_columns) as f64 * f64::EPSILON;
    let rank = sv.iter().filter(|&&s| s > rank_tol).count();

    if !(condition_number <= max_condition_number) || rank < n_columns {
        let collinear_columns = match &svd.v_t {
            Some(v_t) => v_t
                .row(min_idx)
                .iter()
                .enumerate()
                .filter(|(_, v)| v.abs() >= COLLINEAR_LOADING)
                .map(|(j, _)| design.columns[j].clone())
                .collect(),
            None => Vec::new(),
        };
        let detail = if rank < n_columns {
            "design matrix is rank deficient".to_string()
        } else {
            format!("condition number exceeds limit {max_condition_number:.3e}")
        };
        return Err(IllPosedModel {
            condition_number,
            rank,
            n_rows,
            n_columns,
            collinear_columns,
            detail,
        }
        .into());
    }

    let coefficients = svd
        .solve(signal, rank_tol)
        .map_err(|e| Error::data(format!("least-squares solve failed: {e}")))?;

    Ok((
        coefficients,
        FitDiagnostics {
            condition_number,
            rank,
            n_rows,
            n_columns,
        },
    ))
}

/// Fit the LSA model and keep one beta per trial per unit.
pub fn fit_beta_series(
    design: &DesignMatrix,
    trials: &[Trial],
    signal: &DMatrix<f64>,
    units: &[String],
    max_condition_number: f64,
) -> Result<BetaSeries> {
    if trials.len() != design.n_trials {
        return Err(Error::data(format!(
            "{} trials given for a design with {} trial columns",
            trials.len(),
            design.n_trials
        )));
    }
    if units.len() != signal.ncols() {
        return Err(Error::data(format!(
            "{} unit names for {} signal columns",
            units.len(),
            signal.ncols()
        )));
    }

    let (coefficients, diagnostics) = solve(design, signal, max_condition_number)?;
    let values = coefficients.rows(0, design.n_trials).into_owned();

    Ok(BetaSeries {
        trials: trials.to_vec(),
        units: units.to_vec(),
        values,
        diagnostics,
    })
}
