//! Schedule validation: time-interval consistency checks per record.
//!
//! Pure functions over schedule data. Every pass produces fresh issues; nothing
//! here is cached or mutated afterwards.

use crate::model::{secs_between, Arrangement, Schedule, TimeOfRecord};
use crate::time::format_clock;
use crate::time::seconds_of_day;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Arrangements shorter than this draw a warning (seconds).
pub const MIN_ARRANGEMENT_SECS: f64 = 1.0;

/// Arrangements longer than this draw a warning (seconds).
pub const MAX_ARRANGEMENT_SECS: f64 = 300.0;

/// Overlaps longer than this block the export (seconds).
pub const CRITICAL_OVERLAP_SECS: f64 = 5.0;

/// Overlaps longer than this are medium-severity warnings (seconds).
pub const MEDIUM_OVERLAP_SECS: f64 = 1.0;

/// Records longer than this draw a warning (seconds).
pub const MAX_RECORD_SECS: f64 = 24.0 * 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: String,
    pub affected_ids: Vec<String>,
}

impl ValidationIssue {
    fn new(issue_type: IssueType, severity: Severity, message: String, affected_ids: Vec<String>) -> Self {
        ValidationIssue {
            issue_type,
            severity,
            message,
            affected_ids,
        }
    }

    pub fn is_error(&self) -> bool {
        self.issue_type == IssueType::Error
    }
}

/// One overlapping pair of arrangements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlap {
    pub first_id: String,
    pub second_id: String,
    /// Length of the intersection in seconds.
    pub overlap_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub overlaps: Vec<Overlap>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.issue_type == IssueType::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.issue_type == IssueType::Warning)
    }
}

/// Aggregate over every validated record of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectValidationSummary {
    pub has_errors: bool,
    pub has_warnings: bool,
    pub total_issues: usize,
    pub critical_issues: usize,
}

/// Length of the intersection of `[start1,end1)` and `[start2,end2)` in
/// seconds, or `None` when they do not overlap.
pub fn overlap_secs(a: &Arrangement, b: &Arrangement) -> Option<f64> {
    let start = a.playing_time.start.max(b.playing_time.start);
    let end = a.playing_time.end.min(b.playing_time.end);
    if start < end {
        Some(secs_between(start, end))
    } else {
        None
    }
}

fn overlap_severity(secs: f64) -> (IssueType, Severity) {
    if secs > CRITICAL_OVERLAP_SECS {
        (IssueType::Error, Severity::Critical)
    } else if secs > MEDIUM_OVERLAP_SECS {
        (IssueType::Warning, Severity::Medium)
    } else {
        (IssueType::Warning, Severity::Low)
    }
}

fn window_label(record: &TimeOfRecord) -> String {
    format!(
        "{} - {}",
        format_clock(seconds_of_day(&record.start) as f64, true),
        format_clock(seconds_of_day(&record.end) as f64, true)
    )
}

/// Validate every arrangement of one record against the record window and
/// against each other.
pub fn validate_record(
    arrangements: &[Arrangement],
    record: &TimeOfRecord,
    record_name: &str,
) -> ValidationResult {
    let mut issues = Vec::new();
    let mut overlaps = Vec::new();

    for arr in arrangements {
        let ids = vec![arr.id.clone()];

        if arr.playing_time.start >= arr.playing_time.end {
            issues.push(ValidationIssue::new(
                IssueType::Error,
                Severity::Critical,
                "Arrangement start time must be earlier than its end time".to_string(),
                ids.clone(),
            ));
        }

        if !arr.is_within(record) {
            issues.push(ValidationIssue::new(
                IssueType::Error,
                Severity::Critical,
                format!(
                    "Arrangement is out of bounds of record \"{}\" ({})",
                    record_name,
                    window_label(record)
                ),
                ids.clone(),
            ));
        }

        let duration = arr.duration_secs();
        if duration < MIN_ARRANGEMENT_SECS {
            issues.push(ValidationIssue::new(
                IssueType::Warning,
                Severity::Low,
                format!("Very short arrangement ({:.1}s)", duration),
                ids.clone(),
            ));
        }
        if duration > MAX_ARRANGEMENT_SECS {
            issues.push(ValidationIssue::new(
                IssueType::Warning,
                Severity::Medium,
                format!("Very long arrangement ({}min)", (duration / 60.0).round()),
                ids,
            ));
        }
    }

    for (i, first) in arrangements.iter().enumerate() {
        for second in &arrangements[i + 1..] {
            let Some(secs) = overlap_secs(first, second) else {
                continue;
            };
            let (issue_type, severity) = overlap_severity(secs);
            issues.push(ValidationIssue::new(
                issue_type,
                severity,
                format!("Arrangements overlap by {:.1}s", secs),
                vec![first.id.clone(), second.id.clone()],
            ));
            overlaps.push(Overlap {
                first_id: first.id.clone(),
                second_id: second.id.clone(),
                overlap_duration: secs,
            });
        }
    }

    if record.start >= record.end {
        issues.push(ValidationIssue::new(
            IssueType::Error,
            Severity::Critical,
            format!(
                "Start of record \"{}\" must be earlier than its end",
                record_name
            ),
            Vec::new(),
        ));
    }

    let record_secs = record.duration_secs();
    if record_secs > MAX_RECORD_SECS {
        issues.push(ValidationIssue::new(
            IssueType::Warning,
            Severity::Medium,
            format!(
                "Very long record \"{}\" ({}h)",
                record_name,
                (record_secs / 3600.0).round()
            ),
            Vec::new(),
        ));
    }

    ValidationResult {
        is_valid: !issues.iter().any(ValidationIssue::is_error),
        issues,
        overlaps,
    }
}

/// Validate every record that has both an arrangement list and a window.
pub fn validate_all(schedule: &Schedule<'_>) -> BTreeMap<String, ValidationResult> {
    schedule
        .arrangements
        .iter()
        .filter_map(|(name, list)| {
            let window = schedule.records.get(name)?;
            Some((name.clone(), validate_record(list, window, name)))
        })
        .collect()
}

pub fn summarize(results: &BTreeMap<String, ValidationResult>) -> ProjectValidationSummary {
    let mut summary = ProjectValidationSummary::default();
    for result in results.values() {
        summary.total_issues += result.issues.len();
        for issue in &result.issues {
            match issue.issue_type {
                IssueType::Error => {
                    summary.has_errors = true;
                    if issue.severity == Severity::Critical {
                        summary.critical_issues += 1;
                    }
                }
                IssueType::Warning => summary.has_warnings = true,
                IssueType::Info => {}
            }
        }
    }
    summary
}

/// Error lines prefixed with their record name, e.g. `[Monday] ...`.
pub fn detailed_errors(results: &BTreeMap<String, ValidationResult>) -> Vec<String> {
    detailed(results, IssueType::Error)
}

/// Warning lines prefixed with their record name.
pub fn detailed_warnings(results: &BTreeMap<String, ValidationResult>) -> Vec<String> {
    detailed(results, IssueType::Warning)
}

fn detailed(results: &BTreeMap<String, ValidationResult>, kind: IssueType) -> Vec<String> {
    results
        .iter()
        .flat_map(|(name, result)| {
            result
                .issues
                .iter()
                .filter(move |issue| issue.issue_type == kind)
                .map(move |issue| format!("[{}] {}", name, issue.message))
        })
        .collect()
}
