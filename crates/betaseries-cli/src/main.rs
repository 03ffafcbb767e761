//! CLI for betaseries: QC gating and least-squares-all beta series.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "betaseries")]
#[command(about = "betaseries: subject QC gating and trial-wise LSA beta series")]
#[command(version = betaseries_core::VERSION)]
struct Cli {
    /// Study configuration file (TOML)
    #[arg(long, short, global = true, default_value = "betaseries.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then print its summary and hash
    CheckConfig {
        /// Print the resolved configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// List subjects found under paths.subjects_dir
    Subjects,

    /// Apply the QC filter to a metrics table and write the eligibility TSV
    Qc {
        /// TSV with a `subject` column and one column per QC metric
        #[arg(long)]
        metrics: PathBuf,

        /// Eligibility output (default: <output_dir>/eligibility.tsv)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fit and write the beta series for exactly one subject
    Fit {
        /// Subject id, with or without the `sub-` prefix
        #[arg(long)]
        subject: String,

        /// Replace an existing artifact
        #[arg(long)]
        overwrite: bool,
    },

    /// Fit every subject in turn and write an analysis record.
    /// Subjects come from --subjects, else --eligibility, else discovery.
    Batch {
        /// Comma-separated subject ids
        #[arg(long)]
        subjects: Option<String>,

        /// Eligibility TSV written by `betaseries qc`; only included subjects run
        #[arg(long)]
        eligibility: Option<PathBuf>,

        /// Replace existing artifacts
        #[arg(long)]
        overwrite: bool,

        /// Analysis record id (default: lsa_<timestamp>)
        #[arg(long)]
        id: Option<String>,

        /// Analysis name stored in the record
        #[arg(long, default_value = "LSA beta series")]
        name: String,

        /// Free-text description stored in the record
        #[arg(long, default_value = "Trial-wise beta series from a least-squares-all GLM")]
        description: String,
    },

    /// Combine analysis records into master_registry.json and README.md
    Registry {
        /// Records directory (default: <output_dir>/records)
        #[arg(long)]
        records: Option<PathBuf>,

        /// Destination directory (default: <output_dir>)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { json } => commands::check::run(&cli.config, json),
        Commands::Subjects => commands::subjects::run(&cli.config),
        Commands::Qc { metrics, output } => {
            commands::qc::run(&cli.config, &metrics, output.as_deref())
        }
        Commands::Fit { subject, overwrite } => {
            commands::fit::run(&cli.config, &subject, overwrite)
        }
        Commands::Batch {
            subjects,
            eligibility,
            overwrite,
            id,
            name,
            description,
        } => commands::batch::run(commands::batch::BatchCommandConfig {
            config_path: &cli.config,
            subjects: subjects.as_deref(),
            eligibility: eligibility.as_deref(),
            overwrite,
            id: id.as_deref(),
            name: &name,
            description: &description,
        }),
        Commands::Registry { records, dest } => {
            commands::registry::run(&cli.config, records.as_deref(), dest.as_deref())
        }
    }
}
