//! `betaseries batch`: sequential per-subject fits with an analysis record.

use std::path::Path;

use betaseries_core::provenance::now_iso8601;
use betaseries_core::{EligibilityTable, Result, StudyConfig, discover_subjects, run_batch};

pub struct BatchCommandConfig<'a> {
    pub config_path: &'a Path,
    pub subjects: Option<&'a str>,
    pub eligibility: Option<&'a Path>,
    pub overwrite: bool,
    pub id: Option<&'a str>,
    pub name: &'a str,
    pub description: &'a str,
}

pub fn run(cmd: BatchCommandConfig<'_>) {
    let config = super::load_config(cmd.config_path);

    let subjects = match resolve_subjects(&config, cmd.subjects, cmd.eligibility) {
        Ok(s) => s,
        Err(e) => super::fail(&e),
    };
    if subjects.is_empty() {
        eprintln!("No subjects to process.");
        std::process::exit(super::EXIT_FAILURE);
    }
    println!("Processing {} subject(s)...", subjects.len());

    let summary = match run_batch(&config, &subjects, cmd.overwrite) {
        Ok(s) => s,
        Err(e) => super::fail(&e),
    };

    let id = cmd
        .id
        .map(str::to_string)
        .unwrap_or_else(|| default_record_id(&now_iso8601()));
    let record = summary.to_record(&id, cmd.name, cmd.description);
    let record_path = match record.write(&config.paths.output_dir) {
        Ok(p) => p,
        Err(e) => super::fail(&e),
    };

    println!();
    println!("  written: {}", summary.written.len());
    println!("  skipped: {}", summary.skipped.len());
    for (subject, stale) in &summary.skipped {
        if *stale {
            log::warn!("sub-{subject}: kept stale artifact (use --overwrite to refit)");
        }
    }
    println!("  failed:  {}", summary.failed.len());
    for f in &summary.failed {
        println!("    sub-{} at {}: {}", f.subject, f.stage, f.error);
    }
    println!("Record: {} ({})", record_path.display(), record.status);

    if !summary.failed.is_empty() {
        std::process::exit(super::EXIT_FAILURE);
    }
}

/// Explicit list first, then an eligibility table, then discovery.
fn resolve_subjects(
    config: &StudyConfig,
    explicit: Option<&str>,
    eligibility: Option<&Path>,
) -> Result<Vec<String>> {
    if let Some(list) = explicit {
        return Ok(super::parse_subject_list(list));
    }
    if let Some(path) = eligibility {
        return Ok(EligibilityTable::read(path)?.included_subjects());
    }
    discover_subjects(config)
}

/// `lsa_20260301T100000Z` from `2026-03-01T10:00:00Z`.
fn default_record_id(timestamp: &str) -> String {
    let compact: String = timestamp.chars().filter(|c| *c != '-' && *c != ':').collect();
    format!("lsa_{compact}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[paths]
events = "sub-{subject}/events.tsv"
confounds = "sub-{subject}/confounds.tsv"
signal = "sub-{subject}/signal.tsv"
output_dir = "out"

[qc.thresholds]
min_data_completeness = 1.0
max_exclusion_flags = 0
min_valid_trials = 10
max_outlier_fraction = 0.2
min_choice_count = 1
min_choice_consistency = 0.5

[model]
tr = 1.0
max_condition_number = 1e6

[model.response]
kind = "gamma"
delay = 6.0
dispersion = 1.0
onset = 0.0
kernel_length = 32.0

[model.drift]
kind = "none"
"#;

    #[test]
    fn record_id_is_compact_timestamp() {
        assert_eq!(default_record_id("2026-03-01T10:00:00Z"), "lsa_20260301T100000Z");
    }

    #[test]
    fn explicit_subjects_take_precedence() {
        let config = StudyConfig::from_toml_str(CONFIG).unwrap();
        let subjects = resolve_subjects(&config, Some("sub-b,a"), None).unwrap();
        assert_eq!(subjects, vec!["b", "a"]);
    }

    #[test]
    fn eligibility_table_selects_included_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eligibility.tsv");
        std::fs::write(
            &path,
            "subject\tstatus\treason\ns01\tincluded\tnone\ns02\texcluded\texcessive_motion\n",
        )
        .unwrap();

        let config = StudyConfig::from_toml_str(CONFIG).unwrap();
        let subjects = resolve_subjects(&config, None, Some(&path)).unwrap();
        assert_eq!(subjects, vec!["s01"]);
    }

    #[test]
    fn discovery_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub-s07")).unwrap();
        let mut config = StudyConfig::from_toml_str(CONFIG).unwrap();
        config.paths.subjects_dir = Some(dir.path().to_path_buf());
        assert_eq!(resolve_subjects(&config, None, None).unwrap(), vec!["s07"]);
    }
}
