//! Pre-export checks and output size estimate.
//!
//! These run before any audio is touched so the operator can fix the project
//! first. They are advisory: the pipeline enforces its own preconditions.

use crate::model::{AudioFormat, RecordMap, Schedule, Source};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sources above this size are flagged as slow to export.
pub const LARGE_SOURCE_BYTES: usize = 50 * 1024 * 1024;

/// Arrangements above this length are flagged.
pub const LONG_ARRANGEMENT_SECS: f64 = 300.0;

/// Errors and warnings gathered by a check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Type ids used by more than one source, with the ids of those sources in
/// list order. The first one is what composition picks.
pub fn duplicate_type_ids(sources: &[Source]) -> BTreeMap<&str, Vec<&str>> {
    let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for source in sources {
        if let Some(type_id) = source.type_id.as_deref() {
            by_type.entry(type_id).or_default().push(source.id.as_str());
        }
    }
    by_type.retain(|_, ids| ids.len() > 1);
    by_type
}

pub fn check_export(
    sources: &[Source],
    schedule: &Schedule<'_>,
    source_files: &HashMap<String, Vec<u8>>,
) -> CheckReport {
    let mut report = CheckReport::default();

    if sources.is_empty() {
        report.errors.push("Add at least one audio source".to_string());
    }
    if !schedule.has_arrangements() {
        report
            .errors
            .push("Add at least one announcement to a record".to_string());
    }
    if schedule.records.is_empty() {
        report
            .errors
            .push("Create at least one time record".to_string());
    }

    let source_types: BTreeSet<&str> = sources.iter().filter_map(|s| s.type_id.as_deref()).collect();
    let missing: BTreeSet<&str> = schedule
        .arrangements
        .values()
        .flatten()
        .filter_map(|a| a.type_id.as_deref())
        .filter(|t| !source_types.contains(t))
        .collect();
    if !missing.is_empty() {
        report.errors.push(format!(
            "Some announcements have no matching audio source (types: {})",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    let without_files = sources
        .iter()
        .filter(|s| source_files.get(&s.id).is_none_or(|b| b.is_empty()))
        .count();
    if without_files > 0 {
        report
            .errors
            .push(format!("Audio files missing for {} sources", without_files));
    }

    let large = source_files
        .values()
        .filter(|b| b.len() > LARGE_SOURCE_BYTES)
        .count();
    if large > 0 {
        report.warnings.push(format!(
            "{} sources are large (>50MB); export may take longer",
            large
        ));
    }

    let long = schedule
        .arrangements
        .values()
        .flatten()
        .filter(|a| a.duration_secs() > LONG_ARRANGEMENT_SECS)
        .count();
    if long > 0 {
        report
            .warnings
            .push(format!("{} announcements are longer than 5 minutes", long));
    }

    for (type_id, ids) in duplicate_type_ids(sources) {
        report.warnings.push(format!(
            "Type '{}' is used by {} sources; '{}' will be played",
            type_id,
            ids.len(),
            ids[0]
        ));
    }

    for (name, window) in schedule.records {
        let empty = schedule
            .arrangements
            .get(name)
            .is_none_or(|list| list.is_empty());
        if empty {
            report
                .warnings
                .push(format!("Record \"{}\" has no announcements", name));
        }
        if window.start >= window.end {
            report.errors.push(format!(
                "Record \"{}\" must start before it ends",
                name
            ));
        }
    }

    report
}

/// Rough output size for exporting every record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEstimate {
    pub size_mb: f64,
    pub duration_minutes: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn estimate_export_size(records: &RecordMap, format: AudioFormat, bitrate: u32) -> ExportEstimate {
    let total_secs: f64 = records.values().map(|r| r.duration_secs()).sum();

    let mut size_kb = bitrate as f64 * total_secs / 8.0;
    match format {
        AudioFormat::Flac => size_kb *= 3.0,
        AudioFormat::Wav => size_kb *= 5.0,
        AudioFormat::Mp3 | AudioFormat::Ogg => {}
    }

    ExportEstimate {
        size_mb: round2(size_kb / 1024.0),
        duration_minutes: round2(total_secs / 60.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::ArrangementMap;

    fn files(ids: &[&str]) -> HashMap<String, Vec<u8>> {
        ids.iter().map(|id| (id.to_string(), vec![1, 2, 3])).collect()
    }

    #[test]
    fn empty_project_reports_all_three_errors() {
        let arrangements = ArrangementMap::new();
        let records = RecordMap::new();
        let report = check_export(&[], &Schedule::new(&arrangements, &records), &HashMap::new());
        assert_eq!(report.errors.len(), 3);
        assert!(!report.is_valid());
    }

    #[test]
    fn healthy_project_passes() {
        let mut arrangements = ArrangementMap::new();
        arrangements.insert(
            "Mon".into(),
            vec![arrangement("a", "bell", "08:05:00", "08:05:10")],
        );
        let mut records = RecordMap::new();
        records.insert("Mon".into(), record("08:00:00", "09:00:00"));
        let sources = vec![source("s1", "bell", 0.0, 10.0)];

        let report = check_export(&sources, &Schedule::new(&arrangements, &records), &files(&["s1"]));
        assert_eq!(report, CheckReport::default());
    }

    #[test]
    fn flags_missing_types_files_and_inverted_windows() {
        let mut arrangements = ArrangementMap::new();
        arrangements.insert(
            "Mon".into(),
            vec![
                arrangement("a", "bell", "08:05:00", "08:05:10"),
                arrangement("b", "jingle", "08:06:00", "08:16:00"),
            ],
        );
        let mut records = RecordMap::new();
        records.insert("Mon".into(), record("09:00:00", "08:00:00"));
        records.insert("Tue".into(), record("08:00:00", "09:00:00"));
        let sources = vec![
            source("s1", "bell", 0.0, 10.0),
            source("s2", "bell", 0.0, 10.0),
        ];

        let report = check_export(&sources, &Schedule::new(&arrangements, &records), &files(&["s1"]));
        assert!(report.errors.iter().any(|e| e.contains("jingle")));
        assert!(report.errors.iter().any(|e| e.contains("missing for 1 sources")));
        assert!(report.errors.iter().any(|e| e.contains("\"Mon\" must start before")));
        assert!(report.warnings.iter().any(|w| w.contains("longer than 5 minutes")));
        assert!(report.warnings.iter().any(|w| w.contains("'s1' will be played")));
        assert!(report.warnings.iter().any(|w| w.contains("\"Tue\" has no announcements")));
    }

    #[test]
    fn duplicate_types_keep_list_order() {
        let sources = vec![
            source("b", "bell", 0.0, 1.0),
            source("a", "bell", 0.0, 1.0),
            source("c", "jingle", 0.0, 1.0),
        ];
        let dups = duplicate_type_ids(&sources);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups["bell"], vec!["b", "a"]);
    }

    #[test]
    fn estimate_scales_by_format() {
        let mut records = RecordMap::new();
        records.insert("Mon".into(), record("08:00:00", "09:00:00"));

        let mp3 = estimate_export_size(&records, AudioFormat::Mp3, 128);
        // 128 kbps * 3600 s / 8 = 57600 KB
        assert_eq!(mp3.size_mb, 56.25);
        assert_eq!(mp3.duration_minutes, 60.0);

        let flac = estimate_export_size(&records, AudioFormat::Flac, 128);
        assert_eq!(flac.size_mb, 168.75);
        let wav = estimate_export_size(&records, AudioFormat::Wav, 128);
        assert_eq!(wav.size_mb, 281.25);
    }
}
