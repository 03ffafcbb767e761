//! `betaseries check-config`: validate a configuration without touching subject data.

use std::path::Path;

use betaseries_core::QcCheck;

pub fn run(config_path: &Path, json: bool) {
    let config = super::load_config(config_path);

    if json {
        match serde_json::to_string_pretty(&config) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                std::process::exit(super::EXIT_FAILURE);
            }
        }
        return;
    }

    let m = &config.model;
    println!("Configuration OK: {}", config_path.display());
    println!("  hash:            {}", config.config_hash());
    println!("  output_dir:      {}", config.paths.output_dir.display());
    println!("  tr:              {} s (oversampling {})", m.tr, m.oversampling);
    println!("  response:        {:?}", m.response);
    println!("  drift:           {:?}", m.drift);
    println!("  confounds:       {}", list_or_none(&m.confound_columns));
    println!("  constant:        {}", m.include_constant);
    println!("  max condition:   {:.3e}", m.max_condition_number);
    println!();
    println!("  QC checks (in order):");
    for (i, check) in QcCheck::ALL.iter().enumerate() {
        println!(
            "    {}. {:<20} {} vs {} = {}",
            i + 1,
            check.reason_code(),
            check.metric(),
            check.threshold_key(),
            config.qc.thresholds[check.threshold_key()]
        );
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
