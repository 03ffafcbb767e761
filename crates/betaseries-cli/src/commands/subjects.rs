//! `betaseries subjects`: list subject ids found by discovery.

use std::path::Path;

pub fn run(config_path: &Path) {
    let config = super::load_config(config_path);
    let subjects = match betaseries_core::discover_subjects(&config) {
        Ok(s) => s,
        Err(e) => super::fail(&e),
    };

    if subjects.is_empty() {
        eprintln!("No sub-<id> directories found.");
        return;
    }
    for s in &subjects {
        println!("{s}");
    }
    log::info!("{} subject(s)", subjects.len());
}
