//! Keeps an arrangement's scheduled length in step with its source.

use crate::composition::resolve_source;
use crate::model::{secs_between, Arrangement, ArrangementMap, FixedTime, PlayingTime, Source};
use chrono::Duration;
use std::fmt;

/// Scheduled and source durations may differ by this much (seconds).
pub const TIMING_TOLERANCE_SECS: f64 = 1.0;

/// Shortest placement considered sane.
pub const MIN_PLACEMENT_SECS: f64 = 0.5;

/// Longest placement considered sane.
pub const MAX_PLACEMENT_SECS: f64 = 3600.0;

/// A soft timing problem. None of these block an export.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingIssue {
    Inverted,
    DurationMismatch { scheduled: f64, source: f64 },
    TooShort(f64),
    TooLong(f64),
}

impl fmt::Display for TimingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingIssue::Inverted => write!(f, "Start time must be before end time"),
            TimingIssue::DurationMismatch { scheduled, source } => write!(
                f,
                "Scheduled duration ({:.1}s) does not match source duration ({:.1}s)",
                scheduled, source
            ),
            TimingIssue::TooShort(_) => write!(
                f,
                "Announcement too short (minimum {} seconds)",
                MIN_PLACEMENT_SECS
            ),
            TimingIssue::TooLong(_) => write!(f, "Announcement too long (maximum 1 hour)"),
        }
    }
}

fn millis(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

/// Move the non-fixed edge so the placement lasts `source_duration` seconds.
///
/// Returns `None` when nothing has to change: no fixed edge, an unknown
/// (zero) source duration, or a difference within the tolerance.
pub fn reconcile_timing(arrangement: &Arrangement, source_duration: f64) -> Option<PlayingTime> {
    let fixed = arrangement.fixed_time?;
    if source_duration <= 0.0 {
        return None;
    }
    let current = arrangement.duration_secs();
    if (current - source_duration).abs() <= TIMING_TOLERANCE_SECS {
        return None;
    }

    let PlayingTime { start, end } = arrangement.playing_time;
    let adjusted = match fixed {
        FixedTime::Start => PlayingTime {
            start,
            end: start + millis(source_duration),
        },
        FixedTime::End => PlayingTime {
            start: end - millis(source_duration),
            end,
        },
    };
    Some(adjusted)
}

/// One placement moved by [`reconcile_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub record_name: String,
    pub arrangement_id: String,
    pub before: PlayingTime,
    pub after: PlayingTime,
}

/// Reconcile every anchored placement against its resolved source's cut, in
/// place. Placements without a source or a fixed edge are left alone.
pub fn reconcile_all(arrangements: &mut ArrangementMap, sources: &[Source]) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();
    for (record_name, list) in arrangements.iter_mut() {
        for arrangement in list.iter_mut() {
            let Some(source) = resolve_source(arrangement, sources) else {
                continue;
            };
            if let Some(after) = reconcile_timing(arrangement, source.cut.duration_secs()) {
                adjustments.push(Adjustment {
                    record_name: record_name.clone(),
                    arrangement_id: arrangement.id.clone(),
                    before: arrangement.playing_time,
                    after,
                });
                arrangement.playing_time = after;
            }
        }
    }
    adjustments
}

/// Soft checks on one placement. `source_duration` is the playable length of
/// the resolved source (its cut), when known.
pub fn check_timing(arrangement: &Arrangement, source_duration: Option<f64>) -> Vec<TimingIssue> {
    let mut issues = Vec::new();
    let start = arrangement.playing_time.start;
    let end = arrangement.playing_time.end;
    if start >= end {
        issues.push(TimingIssue::Inverted);
    }

    let scheduled = secs_between(start, end);
    if let Some(source) = source_duration.filter(|d| *d > 0.0) {
        if (scheduled - source).abs() > TIMING_TOLERANCE_SECS {
            issues.push(TimingIssue::DurationMismatch { scheduled, source });
        }
    }
    if scheduled < MIN_PLACEMENT_SECS {
        issues.push(TimingIssue::TooShort(scheduled));
    }
    if scheduled > MAX_PLACEMENT_SECS {
        issues.push(TimingIssue::TooLong(scheduled));
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn fixed_start_moves_end() {
        let mut arr = arrangement("a", "t", "08:00:00", "08:00:30");
        arr.fixed_time = Some(FixedTime::Start);
        let adjusted = reconcile_timing(&arr, 12.5).unwrap();
        assert_eq!(adjusted.start, at("08:00:00"));
        assert_eq!(secs_between(adjusted.start, adjusted.end), 12.5);
    }

    #[test]
    fn fixed_end_moves_start() {
        let mut arr = arrangement("a", "t", "08:00:00", "08:00:30");
        arr.fixed_time = Some(FixedTime::End);
        let adjusted = reconcile_timing(&arr, 10.0).unwrap();
        assert_eq!(adjusted.end, at("08:00:30"));
        assert_eq!(adjusted.start, at("08:00:20"));
    }

    #[test]
    fn no_change_within_tolerance_or_without_anchor() {
        let mut arr = arrangement("a", "t", "08:00:00", "08:00:10");
        assert!(reconcile_timing(&arr, 20.0).is_none());
        arr.fixed_time = Some(FixedTime::Start);
        assert!(reconcile_timing(&arr, 10.8).is_none());
        assert!(reconcile_timing(&arr, 0.0).is_none());
    }

    #[test]
    fn check_timing_flags_mismatch_and_extremes() {
        let arr = arrangement("a", "t", "08:00:00", "08:00:10");
        assert!(check_timing(&arr, Some(10.5)).is_empty());
        assert_eq!(
            check_timing(&arr, Some(4.0)),
            vec![TimingIssue::DurationMismatch {
                scheduled: 10.0,
                source: 4.0
            }]
        );

        let inverted = arrangement("b", "t", "08:00:10", "08:00:10");
        let issues = check_timing(&inverted, None);
        assert!(issues.contains(&TimingIssue::Inverted));
        assert!(issues.iter().any(|i| matches!(i, TimingIssue::TooShort(_))));

        let long = arrangement("c", "t", "08:00:00", "09:30:00");
        assert_eq!(check_timing(&long, None), vec![TimingIssue::TooLong(5400.0)]);
    }

    #[test]
    fn mismatch_message_shows_both_durations() {
        let issue = TimingIssue::DurationMismatch {
            scheduled: 10.0,
            source: 4.34,
        };
        assert_eq!(
            issue.to_string(),
            "Scheduled duration (10.0s) does not match source duration (4.3s)"
        );
    }

    #[test]
    fn reconcile_all_moves_only_anchored_placements() {
        let sources = vec![source("s1", "bell", 0.0, 10.0)];
        let mut anchored = arrangement("a", "bell", "08:00:00", "08:00:30");
        anchored.fixed_time = Some(FixedTime::End);
        let loose = arrangement("b", "bell", "08:01:00", "08:01:30");
        let mut orphan = arrangement("c", "jingle", "08:02:00", "08:02:30");
        orphan.fixed_time = Some(FixedTime::Start);

        let mut map = ArrangementMap::new();
        map.insert("Mon".to_string(), vec![anchored, loose.clone(), orphan.clone()]);

        let adjustments = reconcile_all(&mut map, &sources);
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].record_name, "Mon");
        assert_eq!(adjustments[0].arrangement_id, "a");
        assert_eq!(adjustments[0].after.start, at("08:00:20"));

        let list = &map["Mon"];
        assert_eq!(list[0].playing_time.start, at("08:00:20"));
        assert_eq!(list[0].playing_time.end, at("08:00:30"));
        assert_eq!(list[1], loose);
        assert_eq!(list[2], orphan);
    }
}
