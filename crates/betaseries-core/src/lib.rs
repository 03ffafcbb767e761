//! # betaseries-core
//!
//! Subject eligibility filtering and least-squares-all (LSA) beta-series
//! estimation for task fMRI.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use betaseries_core::{StudyConfig, run_subject};
//!
//! let config = StudyConfig::load(Path::new("betaseries.toml")).unwrap();
//! let outcome = run_subject(&config, "s101", false).unwrap();
//! println!("{}", outcome.write.path().display());
//! ```
//!
//! ## Architecture
//!
//! QC metrics → Filter → eligible subjects → (per subject) events + confounds
//! + signal → Design matrix → SVD fit → Beta-series artifact
//!
//! The filter is a pure function over a metric table ([`qc`]). The estimator
//! builds one regressor per trial ([`design`], [`hrf`], [`drift`]), refuses
//! badly conditioned designs ([`lsa`]), and writes one JSON artifact per
//! subject atomically ([`artifact`]). [`pipeline`] ties the stages together
//! and keeps subject failures from spreading across a batch.

pub mod artifact;
pub mod config;
pub mod design;
pub mod drift;
pub mod error;
pub mod events;
pub mod hrf;
pub mod lsa;
pub mod pipeline;
pub mod provenance;
pub mod qc;
pub mod registry;
pub mod signal;
pub mod table;

pub use artifact::{BetaSeriesArtifact, WriteOutcome, artifact_path, write_atomic};
pub use config::{StudyConfig, SubjectInputs};
pub use design::{DesignMatrix, NuisanceRegressors};
pub use drift::DriftModel;
pub use error::{Error, IllPosedModel, Result};
pub use events::{Trial, load_events};
pub use hrf::ResponseModel;
pub use lsa::{BetaSeries, FitDiagnostics, fit_beta_series};
pub use pipeline::{
    BatchSummary, Stage, SubjectFailure, SubjectOutcome, discover_subjects, run_batch,
    run_subject,
};
pub use provenance::{MachineInfo, Provenance, detect_machine_info};
pub use qc::{
    Eligibility, EligibilityTable, QcCheck, QcReport, QcThresholds, Status, SubjectMetrics,
    evaluate_subject, filter_subjects, read_metrics,
};
pub use registry::{AnalysisRecord, RecordStatus, build_registry};
pub use signal::Signal;

/// Library version, stamped into artifacts and records.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
