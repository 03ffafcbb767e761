//! Per-subject estimation pipeline and sequential batch runner.
//!
//! A subject moves through `Loaded -> DesignBuilt -> Fitted -> Extracted ->
//! Written`. Any subject-scoped error stops that subject at the stage it was
//! trying to reach; nothing is written for it. The batch runner records the
//! failure and moves on. Configuration errors stop the batch.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::artifact::{self, BetaSeriesArtifact, WriteOutcome};
use crate::config::{StudyConfig, validate_subject_id};
use crate::design::{DesignMatrix, NuisanceRegressors};
use crate::error::{Error, Result};
use crate::events::load_events;
use crate::lsa::fit_beta_series;
use crate::provenance::{Provenance, now_iso8601};
use crate::registry::{AnalysisRecord, RecordStatus};
use crate::signal::{Signal, load_confounds};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Loaded,
    DesignBuilt,
    Fitted,
    Extracted,
    Written,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loaded => "loaded",
            Self::DesignBuilt => "design_built",
            Self::Fitted => "fitted",
            Self::Extracted => "extracted",
            Self::Written => "written",
        })
    }
}

/// A subject that could not reach `stage`.
#[derive(Debug, thiserror::Error)]
#[error("subject {subject} failed before stage {stage}: {error}")]
pub struct SubjectFailure {
    pub subject: String,
    pub stage: Stage,
    #[source]
    pub error: Error,
}

/// Result of a subject that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOutcome {
    pub subject: String,
    pub write: WriteOutcome,
    /// `None` when an existing artifact was kept without refitting.
    pub n_trials: Option<usize>,
    pub n_units: Option<usize>,
    pub condition_number: Option<f64>,
}

// ---------------------------------------------------------------------------
// Single subject
// ---------------------------------------------------------------------------

/// Fit and write one subject's beta series.
///
/// Safe to repeat: an existing artifact is left alone unless `overwrite`.
pub fn run_subject(
    config: &StudyConfig,
    subject: &str,
    overwrite: bool,
) -> std::result::Result<SubjectOutcome, SubjectFailure> {
    let fail = |stage: Stage| {
        move |error: Error| SubjectFailure {
            subject: subject.to_string(),
            stage,
            error,
        }
    };
    let config_hash = config.config_hash();
    let model = &config.model;

    validate_subject_id(subject).map_err(fail(Stage::Loaded))?;
    let path = artifact::artifact_path(&config.paths.output_dir, subject);
    if !overwrite {
        if let Some(stale) = artifact::existing_artifact(&path, &config_hash) {
            log::info!("sub-{subject}: artifact exists, skipping ({})", path.display());
            return Ok(SubjectOutcome {
                subject: subject.to_string(),
                write: WriteOutcome::SkippedExisting { path, stale },
                n_trials: None,
                n_units: None,
                condition_number: None,
            });
        }
    }

    // Loaded
    let inputs = config.subject_inputs(subject).map_err(fail(Stage::Loaded))?;
    let trials =
        load_events(&inputs.events, &model.condition_column).map_err(fail(Stage::Loaded))?;
    let mut signal = Signal::read(&inputs.signal).map_err(fail(Stage::Loaded))?;
    if model.grand_mean_scale {
        signal.grand_mean_scale().map_err(fail(Stage::Loaded))?;
    }
    let confounds = load_confounds(
        &inputs.confounds,
        &model.confound_columns,
        model.zero_fill_confounds,
    )
    .map_err(fail(Stage::Loaded))?;
    log::info!(
        "sub-{subject}: {} ({} trials, {} time points, {} units)",
        Stage::Loaded,
        trials.len(),
        signal.n_timepoints(),
        signal.n_units()
    );

    // DesignBuilt
    let n_timepoints = signal.n_timepoints();
    let design = NuisanceRegressors::assemble(
        n_timepoints,
        confounds,
        model.include_constant,
        &model.drift,
        model.tr,
    )
    .and_then(|nuisance| {
        DesignMatrix::build(
            &trials,
            &nuisance,
            &model.response,
            model.tr,
            n_timepoints,
            model.oversampling,
        )
    })
    .map_err(fail(Stage::DesignBuilt))?;
    log::info!(
        "sub-{subject}: {} ({} x {})",
        Stage::DesignBuilt,
        design.n_rows(),
        design.n_columns()
    );

    // Fitted
    let betas = fit_beta_series(
        &design,
        &trials,
        &signal.data,
        &signal.units,
        model.max_condition_number,
    )
    .map_err(fail(Stage::Fitted))?;
    log::info!(
        "sub-{subject}: {} (condition number {:.3e})",
        Stage::Fitted,
        betas.diagnostics.condition_number
    );

    // Extracted
    let artifact =
        BetaSeriesArtifact::new(subject, &design, &betas, Provenance::capture(&config_hash));
    log::info!(
        "sub-{subject}: {} ({} x {} betas)",
        Stage::Extracted,
        betas.n_trials(),
        betas.n_units()
    );

    // Written
    let write = artifact::write_artifact(&config.paths.output_dir, &artifact, overwrite)
        .map_err(fail(Stage::Written))?;
    log::info!("sub-{subject}: {} {}", Stage::Written, write.path().display());

    Ok(SubjectOutcome {
        subject: subject.to_string(),
        write,
        n_trials: Some(betas.n_trials()),
        n_units: Some(betas.n_units()),
        condition_number: Some(betas.diagnostics.condition_number),
    })
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Outcome of a sequential run over many subjects.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub config_hash: String,
    pub output_dir: PathBuf,
    pub written: Vec<String>,
    /// Skipped subjects with their stale flag.
    pub skipped: Vec<(String, bool)>,
    pub failed: Vec<SubjectFailure>,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.written.len() + self.skipped.len() + self.failed.len()
    }

    pub fn status(&self) -> RecordStatus {
        if self.failed.is_empty() {
            RecordStatus::Completed
        } else if self.failed.len() < self.processed() {
            RecordStatus::CompletedWithFailures
        } else {
            RecordStatus::Failed
        }
    }

    /// Analysis record for this batch.
    pub fn to_record(&self, id: &str, name: &str, description: &str) -> AnalysisRecord {
        let stale = self.skipped.iter().filter(|(_, s)| *s).count();
        AnalysisRecord {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: self.status(),
            subjects_processed: self.processed(),
            subjects_written: self.written.len(),
            subjects_skipped: self.skipped.len(),
            subjects_failed: self.failed.len(),
            failures: self
                .failed
                .iter()
                .map(|f| (f.subject.clone(), f.error.kind().to_string()))
                .collect(),
            output_path: self.output_dir.clone(),
            completed_at: now_iso8601(),
            config_hash: self.config_hash.clone(),
            tool_version: crate::VERSION.to_string(),
            notes: (stale > 0).then(|| format!("{stale} skipped artifact(s) are stale")),
        }
    }
}

/// Run every subject in order. Subject-scoped failures are collected; a
/// configuration error aborts the batch.
pub fn run_batch(config: &StudyConfig, subjects: &[String], overwrite: bool) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        config_hash: config.config_hash(),
        output_dir: config.paths.output_dir.clone(),
        ..BatchSummary::default()
    };

    for subject in subjects {
        match run_subject(config, subject, overwrite) {
            Ok(outcome) => match outcome.write {
                WriteOutcome::Written(_) => summary.written.push(outcome.subject),
                WriteOutcome::SkippedExisting { stale, .. } => {
                    summary.skipped.push((outcome.subject, stale))
                }
            },
            Err(failure) if !failure.error.is_subject_scoped() => return Err(failure.error),
            Err(failure) => {
                log::warn!(
                    "sub-{}: failed before {} [{}]: {}",
                    failure.subject,
                    failure.stage,
                    failure.error.kind(),
                    failure.error
                );
                summary.failed.push(failure);
            }
        }
    }

    log::info!(
        "batch: {} written, {} skipped, {} failed",
        summary.written.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}

/// Subject ids from `sub-<id>` directories under `paths.subjects_dir`,
/// sorted and de-duplicated.
pub fn discover_subjects(config: &StudyConfig) -> Result<Vec<String>> {
    let dir = config
        .paths
        .subjects_dir
        .as_ref()
        .ok_or_else(|| Error::config("paths.subjects_dir is not set"))?;

    let mut ids = BTreeSet::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = name.strip_prefix("sub-") {
            if validate_subject_id(id).is_ok() {
                ids.insert(id.to_string());
            } else {
                log::warn!("ignoring subject directory with invalid id: {name}");
            }
        }
    }
    Ok(ids.into_iter().collect())
}
