//! `betaseries qc`: subject eligibility filter.

use std::path::{Path, PathBuf};

use betaseries_core::{filter_subjects, read_metrics};

pub fn run(config_path: &Path, metrics_path: &Path, output: Option<&Path>) {
    let config = super::load_config(config_path);
    let thresholds = match config.qc_thresholds() {
        Ok(t) => t,
        Err(e) => super::fail(&e),
    };

    let metrics = match read_metrics(metrics_path) {
        Ok(m) => m,
        Err(e) => super::fail(&e),
    };
    let report = filter_subjects(&metrics, &thresholds);
    let table = &report.table;

    let output: PathBuf = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.paths.output_dir.join("eligibility.tsv"));
    if let Err(e) = table.write(&output) {
        super::fail(&e);
    }

    println!("{:<16} {:<10} reason", "subject", "status");
    println!("{}", "-".repeat(44));
    for (subject, decision) in &table.decisions {
        println!(
            "{:<16} {:<10} {}",
            subject,
            decision.status.to_string(),
            decision.reason_code()
        );
    }
    println!();

    let included = table.included_subjects().len();
    println!("{included}/{} subjects included", table.len());
    for (reason, count) in table.exclusion_counts() {
        println!("  {reason}: {count}");
    }
    println!("Eligibility written to {}", output.display());

    if !report.is_complete() {
        eprintln!();
        eprintln!("{} subject(s) could not be evaluated:", report.failures.len());
        for (subject, e) in &report.failures {
            eprintln!("  sub-{subject}: {e}");
        }
        std::process::exit(super::EXIT_FAILURE);
    }
}
