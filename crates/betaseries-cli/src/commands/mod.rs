pub mod batch;
pub mod check;
pub mod fit;
pub mod qc;
pub mod registry;
pub mod subjects;

use std::path::Path;

use betaseries_core::{Error, StudyConfig};

/// Subject failures, I/O problems, bad inputs.
pub const EXIT_FAILURE: i32 = 1;
/// Invalid or missing configuration.
pub const EXIT_CONFIG: i32 = 2;

pub fn exit_code(err: &Error) -> i32 {
    if err.is_subject_scoped() {
        EXIT_FAILURE
    } else {
        EXIT_CONFIG
    }
}

/// Print the error and exit with the code matching its kind.
pub fn fail(err: &Error) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(exit_code(err));
}

/// Load and validate the configuration or exit.
pub fn load_config(path: &Path) -> StudyConfig {
    match StudyConfig::load(path) {
        Ok(config) => config,
        Err(e) => fail(&e),
    }
}

/// Accept both `s101` and `sub-s101`.
pub fn normalize_subject(id: &str) -> &str {
    let id = id.trim();
    id.strip_prefix("sub-").unwrap_or(id)
}

/// Split a comma-separated subject list, dropping empties and duplicates
/// while keeping the given order.
pub fn parse_subject_list(list: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in list.split(',').map(normalize_subject).filter(|s| !s.is_empty()) {
        if !out.iter().any(|s| s == id) {
            out.push(id.to_string());
        }
    }
    out
}
