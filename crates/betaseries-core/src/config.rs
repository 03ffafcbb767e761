//! Study configuration: input path templates, QC thresholds, model parameters.
//!
//! Loaded once per run from TOML, then validated eagerly. Nothing downstream
//! reads a default for a model parameter; the response model, drift model and
//! collinearity threshold must all be spelled out in the file.
//!
//! ```toml
//! [paths]
//! events = "bids/sub-{subject}/func/sub-{subject}_task-discountFix_events.tsv"
//! confounds = "fmriprep/sub-{subject}/func/sub-{subject}_desc-confounds_timeseries.tsv"
//! signal = "roi/sub-{subject}_timeseries.tsv"
//! output_dir = "derivatives/lsa"
//!
//! [qc.thresholds]
//! min_data_completeness = 1.0
//! max_exclusion_flags = 0
//! min_valid_trials = 40
//! max_outlier_fraction = 0.2
//! min_choice_count = 1
//! min_choice_consistency = 0.5
//!
//! [model]
//! tr = 0.68
//! max_condition_number = 1e6
//!
//! [model.response]
//! kind = "double_gamma"
//! # ...
//!
//! [model.drift]
//! kind = "cosine"
//! cutoff_hz = 0.00222
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::drift::DriftModel;
use crate::error::{Error, Result};
use crate::hrf::ResponseModel;
use crate::qc::QcThresholds;

/// Environment variable that replaces `paths.output_dir`.
pub const OUTPUT_DIR_ENV: &str = "BETASERIES_OUTPUT_DIR";

/// Placeholder substituted with the subject id in path templates.
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Complete, validated configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    pub paths: PathsConfig,
    pub qc: QcConfig,
    pub model: ModelConfig,
}

/// Where subject inputs live and where outputs go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Events TSV template (must contain `{subject}`).
    pub events: String,
    /// Confounds TSV template (must contain `{subject}`).
    pub confounds: String,
    /// Signal TSV template (must contain `{subject}`).
    pub signal: String,
    pub output_dir: PathBuf,
    /// Directory scanned for `sub-<id>` entries by subject discovery.
    #[serde(default)]
    pub subjects_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QcConfig {
    /// Named thresholds; see [`crate::qc::QcCheck`] for the required names.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Repetition time in seconds.
    pub tr: f64,
    /// Sub-TR bins per TR used for convolution.
    #[serde(default = "default_oversampling")]
    pub oversampling: usize,
    /// Events column holding the condition label.
    #[serde(default = "default_condition_column")]
    pub condition_column: String,
    /// Confound columns used as nuisance regressors, in this order.
    #[serde(default)]
    pub confound_columns: Vec<String>,
    #[serde(default = "default_true")]
    pub include_constant: bool,
    /// Scale the signal so its global mean is 100.
    #[serde(default)]
    pub grand_mean_scale: bool,
    /// Treat `n/a` confound cells as zero instead of failing.
    #[serde(default)]
    pub zero_fill_confounds: bool,
    /// Largest acceptable `sigma_max / sigma_min` of the design matrix.
    pub max_condition_number: f64,
    pub response: ResponseModel,
    pub drift: DriftModel,
}

fn default_oversampling() -> usize {
    10
}

fn default_condition_column() -> String {
    "trial_type".to_string()
}

fn default_true() -> bool {
    true
}

/// Resolved input files for a single subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInputs {
    pub events: PathBuf,
    pub confounds: PathBuf,
    pub signal: PathBuf,
}

impl StudyConfig {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|e| {
            Error::config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.apply_environment_overrides();
        config.validate()?;
        log::debug!(
            "loaded config {} (hash {})",
            path.display(),
            config.config_hash()
        );
        Ok(config)
    }

    /// Parse and validate TOML text without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BETASERIES_OUTPUT_DIR`.
    pub fn apply_environment_overrides(&mut self) {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.paths.output_dir = PathBuf::from(dir);
            }
        }
    }

    /// Check every field; all problems are reported together.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for (name, template) in [
            ("paths.events", &self.paths.events),
            ("paths.confounds", &self.paths.confounds),
            ("paths.signal", &self.paths.signal),
        ] {
            if !template.contains(SUBJECT_PLACEHOLDER) {
                errors.push(format!("{name} must contain {SUBJECT_PLACEHOLDER}"));
            }
        }
        if self.paths.output_dir.as_os_str().is_empty() {
            errors.push("paths.output_dir is empty".to_string());
        }

        if let Err(Error::Configuration(msg)) = QcThresholds::from_map(&self.qc.thresholds) {
            errors.push(msg);
        }

        let m = &self.model;
        if !(m.tr.is_finite() && m.tr > 0.0) {
            errors.push(format!("model.tr must be positive, got {}", m.tr));
        }
        if m.oversampling == 0 {
            errors.push("model.oversampling must be at least 1".to_string());
        }
        if m.condition_column.trim().is_empty() {
            errors.push("model.condition_column is empty".to_string());
        }
        if !(m.max_condition_number.is_finite() && m.max_condition_number > 1.0) {
            errors.push(format!(
                "model.max_condition_number must be a finite value above 1, got {}",
                m.max_condition_number
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for col in &m.confound_columns {
            if !seen.insert(col.as_str()) {
                errors.push(format!("model.confound_columns lists '{col}' twice"));
            }
        }
        if let Err(msg) = m.response.validate() {
            errors.push(format!("model.response: {msg}"));
        }
        if let Err(msg) = m.drift.validate() {
            errors.push(format!("model.drift: {msg}"));
        }
        if let DriftModel::Cosine { cutoff_hz } = m.drift {
            if m.tr.is_finite() && m.tr > 0.0 && cutoff_hz > DriftModel::max_cutoff_hz(m.tr) {
                errors.push(format!(
                    "model.drift: cutoff_hz {cutoff_hz} is above the Nyquist rate {} for tr = {}",
                    DriftModel::max_cutoff_hz(m.tr),
                    m.tr
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "validation failed:\n{}",
                errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )))
        }
    }

    /// Validated QC thresholds.
    pub fn qc_thresholds(&self) -> Result<QcThresholds> {
        QcThresholds::from_map(&self.qc.thresholds)
    }

    /// SHA-256 over the canonical JSON of everything that affects results.
    ///
    /// Paths are excluded so moving the output directory does not mark
    /// existing artifacts as stale.
    pub fn config_hash(&self) -> String {
        #[derive(Serialize)]
        struct Hashed<'a> {
            qc: &'a QcConfig,
            model: &'a ModelConfig,
        }
        let canonical = serde_json::to_vec(&Hashed {
            qc: &self.qc,
            model: &self.model,
        })
        .unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Resolve input paths for one subject.
    pub fn subject_inputs(&self, subject: &str) -> Result<SubjectInputs> {
        validate_subject_id(subject)?;
        Ok(SubjectInputs {
            events: resolve_template(&self.paths.events, subject),
            confounds: resolve_template(&self.paths.confounds, subject),
            signal: resolve_template(&self.paths.signal, subject),
        })
    }
}

/// Substitute the subject id into a path template.
pub fn resolve_template(template: &str, subject: &str) -> PathBuf {
    PathBuf::from(template.replace(SUBJECT_PLACEHOLDER, subject))
}

/// Subject ids end up in file names, so they must be a single path component.
pub fn validate_subject_id(subject: &str) -> Result<()> {
    let ok = !subject.is_empty()
        && subject != "."
        && subject != ".."
        && subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(Error::data(format!("invalid subject id '{subject}'")))
    }
}
