//! Least-squares-all design matrix: one column per trial, then nuisance columns.

use nalgebra::DMatrix;

use crate::drift::DriftModel;
use crate::error::{Error, Result};
use crate::events::{Trial, validate_trials};
use crate::hrf::{ResponseModel, TrialConvolver};

/// Nuisance block shared by every spatial unit of a subject.
#[derive(Debug, Clone)]
pub struct NuisanceRegressors {
    pub labels: Vec<String>,
    /// `n_timepoints x labels.len()`
    pub matrix: DMatrix<f64>,
}

impl NuisanceRegressors {
    /// A block with `n_timepoints` rows and no columns.
    pub fn empty(n_timepoints: usize) -> Self {
        Self {
            labels: Vec::new(),
            matrix: DMatrix::zeros(n_timepoints, 0),
        }
    }

    /// Wrap explicit columns. Every column must have `n_timepoints` entries.
    pub fn from_columns(n_timepoints: usize, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        for (label, col) in &columns {
            if col.len() != n_timepoints {
                return Err(Error::data(format!(
                    "nuisance regressor '{label}' has {} rows, expected {n_timepoints}",
                    col.len()
                )));
            }
            if col.iter().any(|v| !v.is_finite()) {
                return Err(Error::data(format!(
                    "nuisance regressor '{label}' contains non-finite values"
                )));
            }
        }
        let matrix = DMatrix::from_fn(n_timepoints, columns.len(), |i, j| columns[j].1[i]);
        Ok(Self {
            labels: columns.into_iter().map(|(l, _)| l).collect(),
            matrix,
        })
    }

    /// Confound columns, then an optional constant, then drift terms.
    pub fn assemble(
        n_timepoints: usize,
        confounds: Vec<(String, Vec<f64>)>,
        include_constant: bool,
        drift: &DriftModel,
        tr: f64,
    ) -> Result<Self> {
        let mut columns = confounds;
        if include_constant {
            columns.push(("constant".to_string(), vec![1.0; n_timepoints]));
        }
        columns.extend(drift.columns(n_timepoints, tr));
        Self::from_columns(n_timepoints, columns)
    }

    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.labels.len()
    }
}

/// Full design. Columns `0..n_trials` are trial regressors in input trial
/// order; the remaining columns are the nuisance block.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub columns: Vec<String>,
    pub n_trials: usize,
}

impl DesignMatrix {
    /// Convolve every trial separately and append the nuisance block.
    pub fn build(
        trials: &[Trial],
        nuisance: &NuisanceRegressors,
        response: &ResponseModel,
        tr: f64,
        n_timepoints: usize,
        oversampling: usize,
    ) -> Result<Self> {
        if trials.is_empty() {
            return Err(Error::data("no trials to model"));
        }
        if nuisance.n_rows() != n_timepoints {
            return Err(Error::data(format!(
                "nuisance block has {} rows, expected {n_timepoints} time points",
                nuisance.n_rows()
            )));
        }
        validate_trials(trials, n_timepoints as f64 * tr)?;

        let convolver = TrialConvolver::new(response, tr, n_timepoints, oversampling.max(1));
        let n_trials = trials.len();
        let n_cols = n_trials + nuisance.n_columns();

        let mut matrix = DMatrix::zeros(n_timepoints, n_cols);
        for (j, trial) in trials.iter().enumerate() {
            let reg = convolver.regressor(trial);
            for (i, v) in reg.into_iter().enumerate() {
                matrix[(i, j)] = v;
            }
        }
        matrix
            .columns_mut(n_trials, nuisance.n_columns())
            .copy_from(&nuisance.matrix);

        let mut columns: Vec<String> = trials.iter().map(Trial::label).collect();
        columns.extend(nuisance.labels.iter().cloned());

        log::debug!(
            "design matrix: {} rows, {} trial + {} nuisance columns",
            n_timepoints,
            n_trials,
            nuisance.n_columns()
        );

        Ok(Self {
            matrix,
            columns,
            n_trials,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_nuisance(&self) -> usize {
        self.n_columns() - self.n_trials
    }

    /// Trial regressor `j` as a column slice.
    pub fn trial_column(&self, j: usize) -> Vec<f64> {
        self.matrix.column(j).iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> ResponseModel {
        ResponseModel::DoubleGamma {
            peak_delay: 6.0,
            undershoot_delay: 16.0,
            peak_dispersion: 1.0,
            undershoot_dispersion: 1.0,
            ratio: 1.0 / 6.0,
            onset: 0.0,
            kernel_length: 32.0,
        }
    }

    fn trials(n: usize) -> Vec<Trial> {
        (0..n)
            .map(|i| Trial::new(i, 10.0 + 15.0 * i as f64, 2.0, "choice"))
            .collect()
    }

    #[test]
    fn column_count_is_trials_plus_nuisance() {
        let nuisance = NuisanceRegressors::assemble(
            100,
            vec![("trans_x".into(), vec![0.1; 100])],
            true,
            &DriftModel::Cosine { cutoff_hz: 0.01 },
            2.0,
        )
        .unwrap();
        // 1 confound + constant + floor(2 * 100 * 2 * 0.01) = 4 cosines
        assert_eq!(nuisance.n_columns(), 6);

        let d = DesignMatrix::build(&trials(8), &nuisance, &response(), 2.0, 100, 10).unwrap();
        assert_eq!(d.n_columns(), 8 + 6);
        assert_eq!(d.n_rows(), 100);
        assert_eq!(d.n_nuisance(), 6);
        assert_eq!(d.columns[0], "choice_1");
        assert_eq!(d.columns[8], "trans_x");
        assert_eq!(d.columns[9], "constant");
    }

    #[test]
    fn every_trial_gets_its_own_column() {
        let mut ts = trials(3);
        // Same onset, duration and condition as trial 0.
        ts.push(Trial::new(3, ts[0].onset, ts[0].duration, "choice"));
        let d =
            DesignMatrix::build(&ts, &NuisanceRegressors::empty(80), &response(), 2.0, 80, 10)
                .unwrap();
        assert_eq!(d.n_columns(), 4);
        assert_eq!(d.trial_column(0), d.trial_column(3));
        assert_ne!(d.columns[0], d.columns[3]);
    }

    #[test]
    fn trial_columns_follow_input_order() {
        let ts = vec![
            Trial::new(0, 60.0, 1.0, "late"),
            Trial::new(1, 10.0, 1.0, "early"),
        ];
        let d =
            DesignMatrix::build(&ts, &NuisanceRegressors::empty(60), &response(), 2.0, 60, 10)
                .unwrap();
        let first_nonzero = |j: usize| {
            d.trial_column(j)
                .iter()
                .position(|v| v.abs() > 1e-6)
                .unwrap()
        };
        assert!(first_nonzero(0) > first_nonzero(1));
    }

    #[test]
    fn mismatched_nuisance_rows_is_data_error() {
        let err = DesignMatrix::build(
            &trials(2),
            &NuisanceRegressors::empty(50),
            &response(),
            2.0,
            60,
            10,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn onset_beyond_scan_is_data_error() {
        let ts = vec![Trial::new(0, 120.0, 1.0, "a")];
        let err = DesignMatrix::build(
            &ts,
            &NuisanceRegressors::empty(60),
            &response(),
            2.0,
            60,
            10,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn non_finite_confound_rejected() {
        let mut col = vec![0.0; 10];
        col[3] = f64::NAN;
        assert!(NuisanceRegressors::from_columns(10, vec![("x".into(), col)]).is_err());
    }
}
