//! Subject eligibility filter.
//!
//! Each subject is run through a fixed sequence of [`QcCheck`]s. The first
//! failing check becomes the exclusion reason and later checks are not
//! evaluated. The filter is a pure function of its inputs: no clock, no
//! counters, no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::{Table, parse_cell};

/// Name of the subject column in QC metric tables.
pub const SUBJECT_COLUMN: &str = "subject";

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Which side of the threshold passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    /// Metric must be >= threshold.
    AtLeast,
    /// Metric must be <= threshold.
    AtMost,
}

/// One QC criterion. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcCheck {
    /// Fraction of expected inputs present.
    IncompleteData,
    /// Number of externally suggested exclusion criteria met.
    FlaggedExclusion,
    /// Usable trials after response filtering.
    InsufficientTrials,
    /// Fraction of high-motion volumes.
    ExcessiveMotion,
    /// Fewest choices of either option; zero means the subject always chose the same.
    SingularResponse,
    /// Behavioral consistency with the subject's own discounting curve.
    BelowChance,
}

impl QcCheck {
    /// Every check, in evaluation order.
    pub const ALL: [QcCheck; 6] = [
        QcCheck::IncompleteData,
        QcCheck::FlaggedExclusion,
        QcCheck::InsufficientTrials,
        QcCheck::ExcessiveMotion,
        QcCheck::SingularResponse,
        QcCheck::BelowChance,
    ];

    /// Reason code reported when this check fails.
    pub fn reason_code(self) -> &'static str {
        match self {
            Self::IncompleteData => "incomplete_data",
            Self::FlaggedExclusion => "flagged_exclusion",
            Self::InsufficientTrials => "insufficient_trials",
            Self::ExcessiveMotion => "excessive_motion",
            Self::SingularResponse => "singular_response",
            Self::BelowChance => "below_chance",
        }
    }

    /// Metric column this check reads.
    pub fn metric(self) -> &'static str {
        match self {
            Self::IncompleteData => "data_completeness",
            Self::FlaggedExclusion => "exclusion_flags",
            Self::InsufficientTrials => "valid_trials",
            Self::ExcessiveMotion => "outlier_fraction",
            Self::SingularResponse => "min_choice_count",
            Self::BelowChance => "choice_consistency",
        }
    }

    /// Threshold key under `[qc.thresholds]`.
    pub fn threshold_key(self) -> &'static str {
        match self {
            Self::IncompleteData => "min_data_completeness",
            Self::FlaggedExclusion => "max_exclusion_flags",
            Self::InsufficientTrials => "min_valid_trials",
            Self::ExcessiveMotion => "max_outlier_fraction",
            Self::SingularResponse => "min_choice_count",
            Self::BelowChance => "min_choice_consistency",
        }
    }

    fn bound(self) -> Bound {
        match self {
            Self::FlaggedExclusion | Self::ExcessiveMotion => Bound::AtMost,
            _ => Bound::AtLeast,
        }
    }

    fn passes(self, value: f64, threshold: f64) -> bool {
        match self.bound() {
            Bound::AtLeast => value >= threshold,
            Bound::AtMost => value <= threshold,
        }
    }

    /// Parse a reason code back into a check.
    pub fn from_reason_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.reason_code() == code)
    }
}

impl fmt::Display for QcCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason_code())
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// One validated threshold per check.
#[derive(Debug, Clone, PartialEq)]
pub struct QcThresholds {
    values: BTreeMap<QcCheck, f64>,
}

impl QcThresholds {
    /// Validate a name → value map. Missing, unknown, or non-finite entries are
    /// configuration errors.
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self> {
        let mut problems = Vec::new();
        let mut values = BTreeMap::new();

        for check in QcCheck::ALL {
            match map.get(check.threshold_key()) {
                Some(v) if v.is_finite() => {
                    values.insert(check, *v);
                }
                Some(v) => problems.push(format!(
                    "qc threshold '{}' must be finite, got {v}",
                    check.threshold_key()
                )),
                None => problems.push(format!(
                    "missing qc threshold '{}'",
                    check.threshold_key()
                )),
            }
        }
        for key in map.keys() {
            if !QcCheck::ALL.iter().any(|c| c.threshold_key() == key) {
                problems.push(format!("unknown qc threshold '{key}'"));
            }
        }

        if problems.is_empty() {
            Ok(Self { values })
        } else {
            Err(Error::config(problems.join("; ")))
        }
    }

    pub fn get(&self, check: QcCheck) -> f64 {
        // Every check is present after from_map.
        self.values.get(&check).copied().unwrap_or(f64::NAN)
    }
}

// ---------------------------------------------------------------------------
// Subjects and decisions
// ---------------------------------------------------------------------------

/// Inclusion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Included,
    Excluded,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Included => f.write_str("included"),
            Self::Excluded => f.write_str("excluded"),
        }
    }
}

/// Filter decision for one subject. `reason` is `None` iff included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub status: Status,
    pub reason: Option<QcCheck>,
}

impl Eligibility {
    pub fn included() -> Self {
        Self {
            status: Status::Included,
            reason: None,
        }
    }

    pub fn excluded(reason: QcCheck) -> Self {
        Self {
            status: Status::Excluded,
            reason: Some(reason),
        }
    }

    pub fn is_included(&self) -> bool {
        self.status == Status::Included
    }

    /// Reason code, or `none`.
    pub fn reason_code(&self) -> &'static str {
        self.reason.map_or("none", QcCheck::reason_code)
    }
}

/// QC metrics recorded for one subject. Absent keys are missing metrics.
pub type SubjectMetrics = BTreeMap<String, f64>;

/// Evaluate one subject against every check, stopping at the first failure.
pub fn evaluate_subject(
    subject: &str,
    metrics: &SubjectMetrics,
    thresholds: &QcThresholds,
) -> Result<Eligibility> {
    for check in QcCheck::ALL {
        let value = metrics.get(check.metric()).copied().ok_or_else(|| {
            Error::data(format!(
                "subject {subject}: missing QC metric '{}' required by check {check}",
                check.metric()
            ))
        })?;
        if !value.is_finite() {
            return Err(Error::data(format!(
                "subject {subject}: QC metric '{}' is not finite",
                check.metric()
            )));
        }
        if !check.passes(value, thresholds.get(check)) {
            return Ok(Eligibility::excluded(check));
        }
    }
    Ok(Eligibility::included())
}

/// Result of filtering a cohort.
///
/// Every input subject lands in exactly one of `table` or `failures`. A
/// subject whose metrics cannot be evaluated is reported here and does not
/// stop the others from being decided.
#[derive(Debug)]
pub struct QcReport {
    pub table: EligibilityTable,
    pub failures: Vec<(String, Error)>,
}

impl QcReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Evaluate every subject.
pub fn filter_subjects(
    subjects: &BTreeMap<String, SubjectMetrics>,
    thresholds: &QcThresholds,
) -> QcReport {
    let mut decisions = BTreeMap::new();
    let mut failures = Vec::new();
    for (subject, metrics) in subjects {
        match evaluate_subject(subject, metrics, thresholds) {
            Ok(decision) => {
                decisions.insert(subject.clone(), decision);
            }
            Err(e) => failures.push((subject.clone(), e)),
        }
    }
    QcReport {
        table: EligibilityTable { decisions },
        failures,
    }
}

// ---------------------------------------------------------------------------
// Metric input
// ---------------------------------------------------------------------------

/// Read a QC metric table: a `subject` column plus one column per metric.
///
/// Missing cells are left out of the subject's map so the filter can report
/// them if (and only if) a check needs them.
pub fn read_metrics(path: &Path) -> Result<BTreeMap<String, SubjectMetrics>> {
    let table = Table::read(path)?;
    metrics_from_table(&table)
}

pub fn metrics_from_table(table: &Table) -> Result<BTreeMap<String, SubjectMetrics>> {
    let subject_idx = table.require_column(SUBJECT_COLUMN)?;
    let mut out = BTreeMap::new();

    for (i, row) in table.rows.iter().enumerate() {
        let subject = strip_sub_prefix(&row[subject_idx]).to_string();
        if subject.is_empty() {
            return Err(Error::data(format!(
                "{} row {}: empty subject id",
                table.source.display(),
                i + 1
            )));
        }
        let mut metrics = SubjectMetrics::new();
        for (j, header) in table.headers.iter().enumerate() {
            if j == subject_idx {
                continue;
            }
            match parse_cell(&row[j]) {
                Ok(Some(v)) => {
                    metrics.insert(header.clone(), v);
                }
                Ok(None) => {}
                Err(msg) => {
                    return Err(Error::data(format!(
                        "subject {subject}, metric '{header}': {msg}"
                    )));
                }
            }
        }
        if out.insert(subject.clone(), metrics).is_some() {
            return Err(Error::data(format!(
                "{}: subject {subject} appears more than once",
                table.source.display()
            )));
        }
    }
    Ok(out)
}

fn strip_sub_prefix(id: &str) -> &str {
    id.trim().strip_prefix("sub-").unwrap_or(id.trim())
}

// ---------------------------------------------------------------------------
// Eligibility table output
// ---------------------------------------------------------------------------

/// Filter output, keyed and sorted by subject id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityTable {
    pub decisions: BTreeMap<String, Eligibility>,
}

impl EligibilityTable {
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn get(&self, subject: &str) -> Option<&Eligibility> {
        self.decisions.get(subject)
    }

    /// Included subjects in id order.
    pub fn included_subjects(&self) -> Vec<String> {
        self.decisions
            .iter()
            .filter(|(_, d)| d.is_included())
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Exclusion counts per reason code.
    pub fn exclusion_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for d in self.decisions.values() {
            if let Some(reason) = d.reason {
                *counts.entry(reason.reason_code()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Render as TSV: `subject\tstatus\treason`.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("subject\tstatus\treason\n");
        for (subject, d) in &self.decisions {
            out.push_str(&format!("{subject}\t{}\t{}\n", d.status, d.reason_code()));
        }
        out
    }

    /// Write the TSV atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        crate::artifact::write_atomic(path, self.to_tsv().as_bytes())
    }

    /// Read a table previously written by [`EligibilityTable::write`].
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::data(format!("cannot read {}: {e}", path.display())))?;
        let table = Table::parse(&text, path)?;
        let s = table.require_column("subject")?;
        let st = table.require_column("status")?;
        let r = table.require_column("reason")?;

        let mut decisions = BTreeMap::new();
        for row in &table.rows {
            let subject = strip_sub_prefix(&row[s]).to_string();
            if subject.is_empty() {
                return Err(Error::data(format!("{}: empty subject id", path.display())));
            }
            if decisions.contains_key(&subject) {
                return Err(Error::data(format!(
                    "{}: duplicate subject '{subject}'",
                    path.display()
                )));
            }
            let decision = match (row[st].as_str(), row[r].as_str()) {
                ("included", "none") => Eligibility::included(),
                ("excluded", code) => match QcCheck::from_reason_code(code) {
                    Some(check) => Eligibility::excluded(check),
                    None => {
                        return Err(Error::data(format!(
                            "{}: unknown reason '{code}' for {}",
                            path.display(),
                            row[s]
                        )));
                    }
                },
                (status, reason) => {
                    return Err(Error::data(format!(
                        "{}: invalid status/reason '{status}'/'{reason}' for {}",
                        path.display(),
                        row[s]
                    )));
                }
            };
            decisions.insert(subject, decision);
        }
        Ok(Self { decisions })
    }
}
