//! Error kinds shared by the filter, the estimator, and the pipeline.
//!
//! Configuration errors are run-scoped: they are detected before any subject
//! is touched and abort the whole run. Everything else is subject-scoped and
//! is caught at the subject boundary by [`crate::pipeline`].

use std::fmt;
use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic detail for a design matrix that cannot be fit.
#[derive(Debug, Clone, PartialEq)]
pub struct IllPosedModel {
    /// `sigma_max / sigma_min`; infinite when the smallest singular value is zero.
    pub condition_number: f64,
    /// Numerical rank at machine-precision tolerance.
    pub rank: usize,
    pub n_rows: usize,
    pub n_columns: usize,
    /// Column labels loading on the smallest singular vector.
    pub collinear_columns: Vec<String>,
    pub detail: String,
}

impl fmt::Display for IllPosedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (rows={}, columns={}, rank={}, condition number={:.3e})",
            self.detail, self.n_rows, self.n_columns, self.rank, self.condition_number
        )?;
        if !self.collinear_columns.is_empty() {
            write!(f, "; collinear columns: {}", self.collinear_columns.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for IllPosedModel {}

/// Everything that can go wrong between loading a config and writing a beta series.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid threshold/parameter. Fatal for the whole run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or out-of-range subject input.
    #[error("data error: {0}")]
    Data(String),

    /// Rank-deficient or badly conditioned design matrix.
    #[error("ill-posed model: {0}")]
    IllPosedModel(#[from] IllPosedModel),

    /// Filesystem failure while writing outputs.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error only invalidates the current subject.
    pub fn is_subject_scoped(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }

    /// Short machine-readable kind, used in logs and analysis records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Data(_) => "data_error",
            Self::IllPosedModel(_) => "ill_posed_model_error",
            Self::Io { .. } => "io_error",
        }
    }
}
