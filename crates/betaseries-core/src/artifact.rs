//! Per-subject beta-series artifacts.
//!
//! One JSON file per subject at `{output_dir}/sub-{id}/sub-{id}_beta_series.json`.
//! Every write goes to a temporary file in the destination directory which is
//! then renamed over the target, so readers never see a partial artifact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::design::DesignMatrix;
use crate::error::{Error, Result};
use crate::lsa::BetaSeries;
use crate::provenance::Provenance;

/// Bumped whenever the artifact layout changes.
pub const ARTIFACT_VERSION: u32 = 1;

/// Write `bytes` to `path` atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage(path, bytes)?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Like [`write_atomic`], but never replaces an existing file.
///
/// Returns `false` when `path` already exists; the staged file is discarded.
pub fn write_atomic_new(path: &Path, bytes: &[u8]) -> Result<bool> {
    let tmp = stage(path, bytes)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::io(path, e.error)),
    }
}

/// Temporary file next to `path` holding `bytes`, synced to disk.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
    tmp.write_all(bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    Ok(tmp)
}

/// Artifact location for one subject.
pub fn artifact_path(output_dir: &Path, subject: &str) -> PathBuf {
    output_dir
        .join(format!("sub-{subject}"))
        .join(format!("sub-{subject}_beta_series.json"))
}

// ---------------------------------------------------------------------------
// Artifact layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSummary {
    pub n_timepoints: usize,
    pub n_trial_columns: usize,
    pub nuisance_columns: Vec<String>,
    pub condition_number: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBetas {
    pub position: usize,
    pub label: String,
    pub condition: String,
    pub onset: f64,
    pub duration: f64,
    /// One value per spatial unit, in `units` order.
    pub betas: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaSeriesArtifact {
    pub version: u32,
    pub subject: String,
    pub provenance: Provenance,
    pub design: DesignSummary,
    pub units: Vec<String>,
    pub trials: Vec<TrialBetas>,
}

impl BetaSeriesArtifact {
    pub fn new(
        subject: &str,
        design: &DesignMatrix,
        betas: &BetaSeries,
        provenance: Provenance,
    ) -> Self {
        let trials = betas
            .trials
            .iter()
            .enumerate()
            .map(|(i, t)| TrialBetas {
                position: t.position,
                label: t.label(),
                condition: t.condition.clone(),
                onset: t.onset,
                duration: t.duration,
                betas: betas.trial_betas(i),
            })
            .collect();

        Self {
            version: ARTIFACT_VERSION,
            subject: subject.to_string(),
            provenance,
            design: DesignSummary {
                n_timepoints: design.n_rows(),
                n_trial_columns: design.n_trials,
                nuisance_columns: design.columns[design.n_trials..].to_vec(),
                condition_number: betas.diagnostics.condition_number,
                rank: betas.diagnostics.rank,
            },
            units: betas.units.clone(),
            trials,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::data(format!("invalid artifact {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Idempotent writes
// ---------------------------------------------------------------------------

/// What happened when an artifact was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// Target already existed and overwrite was not requested. `stale` is
    /// true when its config hash differs from the current one.
    SkippedExisting { path: PathBuf, stale: bool },
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Written(p) => p,
            Self::SkippedExisting { path, .. } => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

/// Check for an existing artifact. Returns `Some(stale)` when one is present.
///
/// An artifact whose header cannot be read counts as stale.
pub fn existing_artifact(path: &Path, config_hash: &str) -> Option<bool> {
    #[derive(Deserialize)]
    struct Header {
        provenance: HeaderProvenance,
    }
    #[derive(Deserialize)]
    struct HeaderProvenance {
        config_hash: String,
    }

    if !path.exists() {
        return None;
    }
    let stale = match fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<Header>(&text).ok())
    {
        Some(h) => h.provenance.config_hash != config_hash,
        None => true,
    };
    if stale {
        log::warn!(
            "existing artifact {} was produced with a different configuration",
            path.display()
        );
    }
    Some(stale)
}

/// Serialize and write an artifact unless one already exists.
pub fn write_artifact(
    output_dir: &Path,
    artifact: &BetaSeriesArtifact,
    overwrite: bool,
) -> Result<WriteOutcome> {
    let path = artifact_path(output_dir, &artifact.subject);
    if !overwrite {
        if let Some(stale) = existing_artifact(&path, &artifact.provenance.config_hash) {
            return Ok(WriteOutcome::SkippedExisting { path, stale });
        }
    }
    let json = serde_json::to_vec_pretty(artifact)
        .map_err(|e| Error::data(format!("cannot serialize artifact: {e}")))?;
    if overwrite {
        write_atomic(&path, &json)?;
    } else if !write_atomic_new(&path, &json)? {
        // Another run wrote this subject after the existence check.
        let stale = existing_artifact(&path, &artifact.provenance.config_hash).unwrap_or(true);
        return Ok(WriteOutcome::SkippedExisting { path, stale });
    }
    Ok(WriteOutcome::Written(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Trial;
    use crate::lsa::FitDiagnostics;
    use crate::provenance::detect_machine_info;
    use nalgebra::DMatrix;

    fn provenance(hash: &str) -> Provenance {
        Provenance {
            run_id: "run".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            config_hash: hash.into(),
            tool_version: "0.0.0".into(),
            git_revision: None,
            machine: detect_machine_info(),
        }
    }

    fn artifact(hash: &str) -> BetaSeriesArtifact {
        let design = DesignMatrix {
            matrix: DMatrix::zeros(10, 3),
            columns: vec!["a_1".into(), "b_2".into(), "constant".into()],
            n_trials: 2,
        };
        let betas = BetaSeries {
            trials: vec![Trial::new(0, 0.0, 1.0, "a"), Trial::new(1, 5.0, 1.0, "b")],
            units: vec!["roi".into()],
            values: DMatrix::from_row_slice(2, 1, &[0.5, -1.5]),
            diagnostics: FitDiagnostics {
                condition_number: 3.0,
                rank: 3,
                n_rows: 10,
                n_columns: 3,
            },
        };
        BetaSeriesArtifact::new("s101", &design, &betas, provenance(hash))
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn artifact_path_layout() {
        assert_eq!(
            artifact_path(Path::new("out"), "s101"),
            PathBuf::from("out/sub-s101/sub-s101_beta_series.json")
        );
    }

    #[test]
    fn artifact_summarizes_design_and_trials() {
        let a = artifact("h");
        assert_eq!(a.design.nuisance_columns, vec!["constant"]);
        assert_eq!(a.trials.len(), 2);
        assert_eq!(a.trials[1].label, "b_2");
        assert_eq!(a.trials[1].betas, vec![-1.5]);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = write_artifact(dir.path(), &artifact("h"), false).unwrap();
        assert!(outcome.is_written());
        let subject_dir = dir.path().join("sub-s101");
        assert_eq!(dir_entries(&subject_dir), vec!["sub-s101_beta_series.json"]);

        let back = BetaSeriesArtifact::read(outcome.path()).unwrap();
        assert_eq!(back, artifact("h"));
    }

    #[test]
    fn existing_artifact_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_artifact(dir.path(), &artifact("h"), false).unwrap();
        let before = fs::read(first.path()).unwrap();

        let mut changed = artifact("h");
        changed.trials[0].betas = vec![99.0];
        let second = write_artifact(dir.path(), &changed, false).unwrap();
        assert_eq!(
            second,
            WriteOutcome::SkippedExisting {
                path: first.path().to_path_buf(),
                stale: false
            }
        );
        assert_eq!(fs::read(first.path()).unwrap(), before);
    }

    #[test]
    fn no_clobber_write_keeps_the_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub-s101").join("a.json");
        assert!(write_atomic_new(&path, b"first").unwrap());
        assert!(!write_atomic_new(&path, b"second").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"first");
        assert_eq!(dir_entries(path.parent().unwrap()), vec!["a.json"]);
    }

    #[test]
    fn stale_artifact_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), &artifact("old"), false).unwrap();
        let outcome = write_artifact(dir.path(), &artifact("new"), false).unwrap();
        assert!(matches!(outcome, WriteOutcome::SkippedExisting { stale: true, .. }));
    }

    #[test]
    fn overwrite_replaces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), &artifact("old"), false).unwrap();
        let outcome = write_artifact(dir.path(), &artifact("new"), true).unwrap();
        assert!(outcome.is_written());
        let back = BetaSeriesArtifact::read(outcome.path()).unwrap();
        assert_eq!(back.provenance.config_hash, "new");
    }
}
