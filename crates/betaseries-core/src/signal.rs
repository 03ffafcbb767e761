//! Measured signal and confound loading.
//!
//! The signal table has one row per time point and one column per spatial
//! unit (voxel or ROI). Confounds come from a table of the same length; only
//! the configured columns are used, in configured order.

use std::path::Path;

use nalgebra::DMatrix;

use crate::error::{Error, Result};
use crate::table::Table;

/// Scaled global mean when grand-mean scaling is on.
pub const GRAND_MEAN_TARGET: f64 = 100.0;

/// Time-series data for every spatial unit of one subject.
#[derive(Debug, Clone)]
pub struct Signal {
    pub units: Vec<String>,
    /// `n_timepoints x units.len()`
    pub data: DMatrix<f64>,
}

impl Signal {
    pub fn read(path: &Path) -> Result<Self> {
        Self::from_table(&Table::read(path)?)
    }

    /// Every column is a spatial unit. Missing or non-finite cells are errors.
    pub fn from_table(table: &Table) -> Result<Self> {
        if table.headers.is_empty() {
            return Err(Error::data(format!(
                "{}: no spatial units",
                table.source.display()
            )));
        }
        if table.n_rows() == 0 {
            return Err(Error::data(format!(
                "{}: no time points",
                table.source.display()
            )));
        }

        let columns = table
            .headers
            .iter()
            .map(|h| table.numeric_column(h, None))
            .collect::<Result<Vec<_>>>()?;
        let data = DMatrix::from_fn(table.n_rows(), columns.len(), |i, j| columns[j][i]);

        Ok(Self {
            units: table.headers.clone(),
            data,
        })
    }

    pub fn n_timepoints(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_units(&self) -> usize {
        self.data.ncols()
    }

    /// Scale all values so the global mean equals [`GRAND_MEAN_TARGET`].
    pub fn grand_mean_scale(&mut self) -> Result<f64> {
        let mean = self.data.mean();
        if !mean.is_finite() || mean == 0.0 {
            return Err(Error::data(format!(
                "cannot grand-mean scale a signal with mean {mean}"
            )));
        }
        let factor = GRAND_MEAN_TARGET / mean;
        self.data *= factor;
        log::debug!("grand-mean scaled signal by {factor:.6}");
        Ok(factor)
    }
}

/// Read the configured confound columns.
///
/// With `zero_fill`, missing cells (e.g. the leading `n/a` of derivative
/// regressors) become 0; otherwise they are a data error.
pub fn load_confounds(
    path: &Path,
    columns: &[String],
    zero_fill: bool,
) -> Result<Vec<(String, Vec<f64>)>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let table = Table::read(path)?;
    confounds_from_table(&table, columns, zero_fill)
}

pub fn confounds_from_table(
    table: &Table,
    columns: &[String],
    zero_fill: bool,
) -> Result<Vec<(String, Vec<f64>)>> {
    let fill = if zero_fill { Some(0.0) } else { None };
    columns
        .iter()
        .map(|name| Ok((name.clone(), table.numeric_column(name, fill)?)))
        .collect()
}
