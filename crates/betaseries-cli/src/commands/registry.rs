//! `betaseries registry`: combine analysis records.

use std::path::{Path, PathBuf};

use betaseries_core::build_registry;
use betaseries_core::registry::{MASTER_JSON, MASTER_MARKDOWN, RECORDS_DIR};

pub fn run(config_path: &Path, records: Option<&Path>, dest: Option<&Path>) {
    let config = super::load_config(config_path);
    let output_dir = &config.paths.output_dir;

    let records: PathBuf = records
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output_dir.join(RECORDS_DIR));
    let dest: PathBuf = dest.map(Path::to_path_buf).unwrap_or_else(|| output_dir.clone());

    if !records.is_dir() {
        println!("No records directory at {}", records.display());
        println!("Run a batch first: betaseries batch");
        return;
    }

    match build_registry(&records, &dest) {
        Ok(n) => {
            println!("{n} record(s) combined");
            println!("  {}", dest.join(MASTER_JSON).display());
            println!("  {}", dest.join(MASTER_MARKDOWN).display());
        }
        Err(e) => super::fail(&e),
    }
}
