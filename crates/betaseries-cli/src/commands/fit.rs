//! `betaseries fit`: one subject per invocation, safe to repeat.

use std::path::Path;

use betaseries_core::{WriteOutcome, run_subject};

pub fn run(config_path: &Path, subject: &str, overwrite: bool) {
    let config = super::load_config(config_path);
    let subject = super::normalize_subject(subject);

    match run_subject(&config, subject, overwrite) {
        Ok(outcome) => match &outcome.write {
            WriteOutcome::Written(path) => {
                println!(
                    "sub-{subject}: {} trials x {} units -> {}",
                    outcome.n_trials.unwrap_or(0),
                    outcome.n_units.unwrap_or(0),
                    path.display()
                );
                if let Some(k) = outcome.condition_number {
                    println!("  condition number: {k:.3e}");
                }
            }
            WriteOutcome::SkippedExisting { path, stale } => {
                println!("sub-{subject}: artifact exists, skipped ({})", path.display());
                if *stale {
                    println!("  existing artifact is stale; rerun with --overwrite to refit");
                }
            }
        },
        Err(failure) => {
            eprintln!(
                "sub-{}: failed before stage {} [{}]",
                failure.subject,
                failure.stage,
                failure.error.kind()
            );
            super::fail(&failure.error);
        }
    }
}
