//! Run provenance stamped into every artifact and analysis record.

use std::path::Path;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Machine info
// ---------------------------------------------------------------------------

/// Host the analysis ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cores: usize,
}

/// Best-effort host detection. Never fails.
pub fn detect_machine_info() -> MachineInfo {
    MachineInfo {
        hostname: hostname().unwrap_or_else(|| "unknown".to_string()),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cores: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

fn hostname() -> Option<String> {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(h) = std::env::var(var) {
            if !h.trim().is_empty() {
                return Some(h.trim().to_string());
            }
        }
    }
    #[cfg(unix)]
    {
        if let Ok(h) = std::fs::read_to_string("/etc/hostname") {
            if !h.trim().is_empty() {
                return Some(h.trim().to_string());
            }
        }
        let output = Command::new("hostname").output().ok()?;
        let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if s.is_empty() { None } else { Some(s) }
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Commit of the git checkout containing `dir`, if any.
pub fn git_revision(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if rev.is_empty() { None } else { Some(rev) }
}

// ---------------------------------------------------------------------------
// Provenance block
// ---------------------------------------------------------------------------

/// Who produced an output, when, and under which configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub run_id: String,
    pub created_at: String,
    pub config_hash: String,
    pub tool_version: String,
    #[serde(default)]
    pub git_revision: Option<String>,
    pub machine: MachineInfo,
}

impl Provenance {
    /// Capture provenance for a fresh run.
    pub fn capture(config_hash: &str) -> Self {
        let git = std::env::current_dir()
            .ok()
            .and_then(|d| git_revision(&d));
        Self {
            run_id: Uuid::new_v4().to_string(),
            created_at: now_iso8601(),
            config_hash: config_hash.to_string(),
            tool_version: crate::VERSION.to_string(),
            git_revision: git,
            machine: detect_machine_info(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    format_iso8601(since_epoch)
}

pub fn format_iso8601(since_epoch: Duration) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(since_epoch.as_secs());
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}Z")
}

/// Seconds since the Unix epoch to (year, month, day, hour, minute, second).
/// No leap seconds.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let time = secs % 86_400;
    let mut days = secs / 86_400;

    let mut year = 1970;
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
    }

    let mut month = 1;
    while days >= days_in_month(year, month) {
        days -= days_in_month(year, month);
        month += 1;
    }

    (year, month, days + 1, time / 3600, (time / 60) % 60, time % 60)
}

fn days_in_year(year: u64) -> u64 {
    if is_leap(year) { 366 } else { 365 }
}

fn days_in_month(year: u64, month: u64) -> u64 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
