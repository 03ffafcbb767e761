//! Integration tests for betaseries-core.
//!
//! These tests run the full path a study takes:
//! QC metrics → eligibility → per-subject inputs on disk → design → fit → artifact.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use betaseries_core::{
    BetaSeriesArtifact, DesignMatrix, Error, NuisanceRegressors, QcCheck, ResponseModel, Stage,
    StudyConfig, SubjectMetrics, Trial, WriteOutcome, artifact_path, fit_beta_series,
    filter_subjects, run_batch, run_subject,
};

const CONFIG: &str = r#"
[paths]
events = "sub-{subject}/events.tsv"
confounds = "sub-{subject}/confounds.tsv"
signal = "sub-{subject}/signal.tsv"
output_dir = "out"

[qc.thresholds]
min_data_completeness = 1.0
max_exclusion_flags = 0
min_valid_trials = 15
max_outlier_fraction = 0.2
min_choice_count = 1
min_choice_consistency = 0.5

[model]
tr = 2.0
max_condition_number = 1e8
confound_columns = ["trans_x", "trans_y"]

[model.response]
kind = "double_gamma"
peak_delay = 6.0
undershoot_delay = 16.0
peak_dispersion = 1.0
undershoot_dispersion = 1.0
ratio = 0.1667
onset = 0.0
kernel_length = 32.0

[model.drift]
kind = "cosine"
cutoff_hz = 0.01
"#;

const N_TIMEPOINTS: usize = 200;
const N_TRIALS: usize = 20;

fn spm_response() -> ResponseModel {
    ResponseModel::DoubleGamma {
        peak_delay: 6.0,
        undershoot_delay: 16.0,
        peak_dispersion: 1.0,
        undershoot_dispersion: 1.0,
        ratio: 0.1667,
        onset: 0.0,
        kernel_length: 32.0,
    }
}

fn trials() -> Vec<Trial> {
    (0..N_TRIALS)
        .map(|i| {
            let condition = if i % 3 == 0 { "smaller_sooner" } else { "larger_later" };
            Trial::new(i, 8.0 + 18.5 * i as f64, 2.0, condition)
        })
        .collect()
}

fn true_betas(unit: usize) -> Vec<f64> {
    (0..N_TRIALS)
        .map(|i| (i as f64 + 1.0) * if unit == 0 { 0.5 } else { -0.25 })
        .collect()
}

// ---------------------------------------------------------------------------
// On-disk study fixture
// ---------------------------------------------------------------------------

struct Study {
    dir: tempfile::TempDir,
    config: StudyConfig,
}

impl Study {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StudyConfig::from_toml_str(CONFIG).unwrap();
        let root = dir.path().display().to_string();
        config.paths.events = format!("{root}/{}", config.paths.events);
        config.paths.confounds = format!("{root}/{}", config.paths.confounds);
        config.paths.signal = format!("{root}/{}", config.paths.signal);
        config.paths.output_dir = dir.path().join("out");
        config.paths.subjects_dir = Some(dir.path().to_path_buf());
        Self { dir, config }
    }

    fn subject_dir(&self, subject: &str) -> std::path::PathBuf {
        let p = self.dir.path().join(format!("sub-{subject}"));
        fs::create_dir_all(&p).unwrap();
        p
    }

    /// Write events, confounds and a noiseless two-unit signal generated
    /// from the same design the pipeline will build.
    fn add_subject(&self, subject: &str, trials: &[Trial], seed: u64) {
        let dir = self.subject_dir(subject);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut events = String::from("onset\tduration\ttrial_type\n");
        for t in trials {
            writeln!(events, "{}\t{}\t{}", t.onset, t.duration, t.condition).unwrap();
        }
        fs::write(dir.join("events.tsv"), events).unwrap();

        let trans_x: Vec<f64> = (0..N_TIMEPOINTS).map(|_| rng.random_range(-0.2..0.2)).collect();
        let trans_y: Vec<f64> = (0..N_TIMEPOINTS).map(|_| rng.random_range(-0.2..0.2)).collect();
        let mut confounds = String::from("trans_x\ttrans_y\trot_z\n");
        for i in 0..N_TIMEPOINTS {
            writeln!(confounds, "{}\t{}\t0.0", trans_x[i], trans_y[i]).unwrap();
        }
        fs::write(dir.join("confounds.tsv"), confounds).unwrap();

        let model = &self.config.model;
        let nuisance = NuisanceRegressors::assemble(
            N_TIMEPOINTS,
            vec![("trans_x".into(), trans_x), ("trans_y".into(), trans_y)],
            model.include_constant,
            &model.drift,
            model.tr,
        )
        .unwrap();
        let design = DesignMatrix::build(
            trials,
            &nuisance,
            &model.response,
            model.tr,
            N_TIMEPOINTS,
            model.oversampling,
        );

        let signal = match design {
            Ok(design) => {
                let mut coef = DMatrix::<f64>::zeros(design.n_columns(), 2);
                for unit in 0..2 {
                    let b = true_betas(unit);
                    for j in 0..trials.len() {
                        coef[(j, unit)] = b[j % N_TRIALS];
                    }
                    for j in trials.len()..design.n_columns() {
                        coef[(j, unit)] = rng.random_range(-1.0..1.0);
                    }
                    // Baseline so the constant column carries real signal.
                    coef[(trials.len() + 2, unit)] = 100.0;
                }
                &design.matrix * coef
            }
            // Designs the pipeline will reject still need a readable signal.
            Err(_) => DMatrix::from_fn(N_TIMEPOINTS, 2, |_, _| rng.random_range(99.0..101.0)),
        };

        let mut text = String::from("roi_vmpfc\troi_vs\n");
        for i in 0..N_TIMEPOINTS {
            writeln!(text, "{}\t{}", signal[(i, 0)], signal[(i, 1)]).unwrap();
        }
        fs::write(dir.join("signal.tsv"), text).unwrap();
    }

    fn artifact(&self, subject: &str) -> std::path::PathBuf {
        artifact_path(&self.config.paths.output_dir, subject)
    }
}

fn no_temp_files(dir: &Path) -> bool {
    fs::read_dir(dir)
        .unwrap()
        .all(|e| e.unwrap().file_name().to_string_lossy().ends_with(".json"))
}

// ---------------------------------------------------------------------------
// Eligibility filter
// ---------------------------------------------------------------------------

#[test]
fn ten_subjects_one_incomplete() {
    let config = StudyConfig::from_toml_str(CONFIG).unwrap();
    let thresholds = config.qc_thresholds().unwrap();

    let mut subjects = BTreeMap::new();
    for i in 1..=10 {
        let mut m = SubjectMetrics::new();
        m.insert("data_completeness".into(), 1.0);
        m.insert("exclusion_flags".into(), 0.0);
        m.insert("valid_trials".into(), 100.0);
        m.insert("outlier_fraction".into(), 0.01);
        m.insert("min_choice_count".into(), 12.0);
        m.insert("choice_consistency".into(), 0.8);
        if i == 3 {
            m.clear();
            m.insert("data_completeness".into(), 0.75);
        }
        subjects.insert(format!("s{i:02}"), m);
    }

    let report = filter_subjects(&subjects, &thresholds);
    assert!(report.is_complete());
    let table = report.table;
    assert_eq!(table.len(), 10);
    let s03 = table.get("s03").unwrap();
    assert!(!s03.is_included());
    assert_eq!(s03.reason, Some(QcCheck::IncompleteData));
    assert_eq!(table.included_subjects().len(), 9);
    assert!(!table.included_subjects().contains(&"s03".to_string()));

    // Same input, same output.
    assert_eq!(filter_subjects(&subjects, &thresholds).table, table);
}

#[test]
fn eligibility_feeds_the_batch() {
    let study = Study::new();
    let metrics = "subject\tdata_completeness\texclusion_flags\tvalid_trials\toutlier_fraction\tmin_choice_count\tchoice_consistency\n\
                   sub-s01\t1\tfalse\t20\t0.0\t6\t0.9\n\
                   sub-s02\t1\ttrue\t20\t0.0\t6\t0.9\n";
    let metrics_path = study.dir.path().join("qc.tsv");
    fs::write(&metrics_path, metrics).unwrap();

    let subjects = betaseries_core::read_metrics(&metrics_path).unwrap();
    let table = filter_subjects(&subjects, &study.config.qc_thresholds().unwrap()).table;
    assert_eq!(
        table.get("s02").unwrap().reason,
        Some(QcCheck::FlaggedExclusion)
    );

    let eligibility_path = study.dir.path().join("eligibility.tsv");
    table.write(&eligibility_path).unwrap();
    let back = betaseries_core::EligibilityTable::read(&eligibility_path).unwrap();
    assert_eq!(back.included_subjects(), vec!["s01".to_string()]);

    study.add_subject("s01", &trials(), 1);
    let summary = run_batch(&study.config, &back.included_subjects(), false).unwrap();
    assert_eq!(summary.written, vec!["s01".to_string()]);
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[test]
fn twenty_trials_six_nuisance_gives_twenty_ordered_betas() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut columns = vec![("constant".to_string(), vec![1.0; N_TIMEPOINTS])];
    for k in 0..5 {
        let col = (0..N_TIMEPOINTS).map(|_| rng.random_range(-1.0..1.0)).collect();
        columns.push((format!("nuisance_{k}"), col));
    }
    let nuisance = NuisanceRegressors::from_columns(N_TIMEPOINTS, columns).unwrap();
    assert_eq!(nuisance.n_columns(), 6);

    let trials = trials();
    let design =
        DesignMatrix::build(&trials, &nuisance, &spm_response(), 2.0, N_TIMEPOINTS, 10).unwrap();
    assert_eq!(design.n_columns(), N_TRIALS + 6);
    assert_eq!(design.n_rows(), N_TIMEPOINTS);

    let mut coef = DMatrix::<f64>::zeros(design.n_columns(), 1);
    for (j, b) in true_betas(0).into_iter().enumerate() {
        coef[(j, 0)] = b;
    }
    for j in N_TRIALS..design.n_columns() {
        coef[(j, 0)] = rng.random_range(-2.0..2.0);
    }
    let mut signal = &design.matrix * coef;
    for v in signal.iter_mut() {
        *v += rng.random_range(-1e-6..1e-6);
    }

    let betas =
        fit_beta_series(&design, &trials, &signal, &["roi".to_string()], 1e8).unwrap();
    assert_eq!(betas.n_trials(), N_TRIALS);
    assert_eq!(betas.n_units(), 1);
    for (i, (got, want)) in betas.unit_series(0).iter().zip(true_betas(0)).enumerate() {
        assert!(
            (got - want).abs() < 1e-3,
            "trial {i}: estimated {got}, expected {want}"
        );
    }
}

#[test]
fn end_to_end_recovers_betas_for_every_unit() {
    let study = Study::new();
    study.add_subject("s101", &trials(), 7);

    let outcome = run_subject(&study.config, "s101", false).unwrap();
    assert!(outcome.write.is_written());
    assert_eq!(outcome.n_trials, Some(N_TRIALS));
    assert_eq!(outcome.n_units, Some(2));

    let artifact = BetaSeriesArtifact::read(&study.artifact("s101")).unwrap();
    assert_eq!(artifact.subject, "s101");
    assert_eq!(artifact.units, vec!["roi_vmpfc", "roi_vs"]);
    assert_eq!(artifact.provenance.config_hash, study.config.config_hash());
    assert_eq!(artifact.design.n_timepoints, N_TIMEPOINTS);
    assert_eq!(artifact.design.n_trial_columns, N_TRIALS);
    // 2 confounds + constant + floor(2 * 200 * 2.0 * 0.01) cosines
    assert_eq!(artifact.design.nuisance_columns.len(), 2 + 1 + 8);
    assert_eq!(artifact.trials.len(), N_TRIALS);

    for (i, t) in artifact.trials.iter().enumerate() {
        assert_eq!(t.position, i);
        assert_eq!(t.betas.len(), 2);
        for unit in 0..2 {
            let want = true_betas(unit)[i];
            assert!(
                (t.betas[unit] - want).abs() < 1e-6,
                "{} unit {unit}: {} vs {want}",
                t.label,
                t.betas[unit]
            );
        }
    }
    assert_eq!(artifact.trials[0].label, "smaller_sooner_1");
    assert_eq!(artifact.trials[1].label, "larger_later_2");
    assert!(no_temp_files(study.artifact("s101").parent().unwrap()));
}

#[test]
fn duplicated_trial_is_ill_posed_and_writes_nothing() {
    let study = Study::new();
    let mut ts = trials();
    ts.push(Trial::new(N_TRIALS, ts[4].onset, ts[4].duration, "larger_later"));
    study.add_subject("s102", &ts, 3);

    let failure = run_subject(&study.config, "s102", false).unwrap_err();
    assert_eq!(failure.stage, Stage::Fitted);
    match &failure.error {
        Error::IllPosedModel(ip) => {
            assert!(ip.rank < ip.n_columns);
            assert!(ip.collinear_columns.contains(&"larger_later_5".to_string()));
            assert!(ip.collinear_columns.contains(&"larger_later_21".to_string()));
        }
        other => panic!("expected ill-posed model, got {other}"),
    }
    assert!(!study.artifact("s102").exists());
    assert!(!study.artifact("s102").parent().unwrap().exists());
}

#[test]
fn onset_after_scan_end_is_data_error() {
    let study = Study::new();
    let mut ts = trials();
    ts[7].onset = N_TIMEPOINTS as f64 * 2.0 + 5.0;
    study.add_subject("s103", &ts, 5);

    let failure = run_subject(&study.config, "s103", false).unwrap_err();
    assert_eq!(failure.stage, Stage::DesignBuilt);
    assert!(matches!(failure.error, Error::Data(_)));
}

// ---------------------------------------------------------------------------
// Idempotence and batch behavior
// ---------------------------------------------------------------------------

#[test]
fn rerun_without_overwrite_leaves_artifact_unchanged() {
    let study = Study::new();
    study.add_subject("s104", &trials(), 11);

    run_subject(&study.config, "s104", false).unwrap();
    let before = fs::read(study.artifact("s104")).unwrap();

    let again = run_subject(&study.config, "s104", false).unwrap();
    assert_eq!(
        again.write,
        WriteOutcome::SkippedExisting {
            path: study.artifact("s104"),
            stale: false
        }
    );
    assert_eq!(fs::read(study.artifact("s104")).unwrap(), before);

    let mut changed = study.config.clone();
    changed.model.max_condition_number = 1e9;
    let stale = run_subject(&changed, "s104", false).unwrap();
    assert!(matches!(stale.write, WriteOutcome::SkippedExisting { stale: true, .. }));
    assert_eq!(fs::read(study.artifact("s104")).unwrap(), before);

    let rewritten = run_subject(&changed, "s104", true).unwrap();
    assert!(rewritten.write.is_written());
    let artifact = BetaSeriesArtifact::read(&study.artifact("s104")).unwrap();
    assert_eq!(artifact.provenance.config_hash, changed.config_hash());
}

#[test]
fn batch_continues_past_subject_failures() {
    let study = Study::new();
    study.add_subject("s01", &trials(), 1);
    let mut dup = trials();
    dup.push(dup[0].clone());
    dup.last_mut().unwrap().position = N_TRIALS;
    study.add_subject("s02", &dup, 2);
    // s03 has a directory but no inputs.
    study.subject_dir("s03");

    let subjects = betaseries_core::discover_subjects(&study.config).unwrap();
    assert_eq!(subjects, vec!["s01", "s02", "s03"]);

    let summary = run_batch(&study.config, &subjects, false).unwrap();
    assert_eq!(summary.written, vec!["s01".to_string()]);
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(summary.failed[0].subject, "s02");
    assert_eq!(summary.failed[0].error.kind(), "ill_posed_model_error");
    assert_eq!(summary.failed[1].stage, Stage::Loaded);

    let record = summary.to_record("lsa_test", "LSA", "integration batch");
    let path = record.write(&study.config.paths.output_dir).unwrap();
    assert!(path.ends_with("records/lsa_test.json"));
    assert_eq!(record.subjects_written, 1);
    assert_eq!(record.subjects_failed, 2);
}
