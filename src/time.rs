use crate::model::{Arrangement, Instant};
use chrono::Timelike;

/// Wall-clock position of an instant as seconds since midnight
/// (`hour*3600 + minute*60 + second`, sub-second part dropped).
pub fn seconds_of_day(instant: &Instant) -> u32 {
    instant.hour() * 3600 + instant.minute() * 60 + instant.second()
}

/// Format seconds as HH:MM:SS, or MM:SS when `with_hours` is false.
pub fn format_clock(seconds: f64, with_hours: bool) -> String {
    let total = seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if with_hours {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins + hours * 60, secs)
    }
}

/// The first arrangement (by start time) that begins strictly after `now`
/// seconds of day, with its start position.
pub fn next_arrangement(now: u32, arrangements: &[Arrangement]) -> Option<(u32, &Arrangement)> {
    sorted_by_start(arrangements)
        .into_iter()
        .map(|a| (seconds_of_day(&a.playing_time.start), a))
        .find(|(start, _)| *start > now)
}

/// The last arrangement (by start time) that began strictly before `now`.
pub fn previous_arrangement(now: u32, arrangements: &[Arrangement]) -> Option<(u32, &Arrangement)> {
    sorted_by_start(arrangements)
        .into_iter()
        .map(|a| (seconds_of_day(&a.playing_time.start), a))
        .filter(|(start, _)| *start < now)
        .last()
}

fn sorted_by_start(arrangements: &[Arrangement]) -> Vec<&Arrangement> {
    let mut sorted: Vec<&Arrangement> = arrangements.iter().collect();
    sorted.sort_by_key(|a| a.playing_time.start);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn seconds_of_day_uses_wall_clock() {
        assert_eq!(seconds_of_day(&at("08:05:10")), 8 * 3600 + 5 * 60 + 10);
        assert_eq!(seconds_of_day(&at("00:00:00")), 0);
    }

    #[test]
    fn seconds_of_day_reads_in_own_offset() {
        let t = crate::model::parse_instant("2024-05-06T10:00:00+03:00").unwrap();
        assert_eq!(seconds_of_day(&t), 10 * 3600);
    }

    #[test]
    fn format_clock_with_and_without_hours() {
        assert_eq!(format_clock(3725.0, true), "01:02:05");
        assert_eq!(format_clock(65.0, false), "01:05");
        assert_eq!(format_clock(-3.0, true), "00:00:00");
    }

    #[test]
    fn next_and_previous_arrangement() {
        let list = vec![
            arrangement("late", "t", "09:00:00", "09:00:10"),
            arrangement("early", "t", "08:00:00", "08:00:10"),
            arrangement("mid", "t", "08:30:00", "08:30:10"),
        ];
        let now = 8 * 3600 + 10 * 60;
        let (secs, next) = next_arrangement(now, &list).unwrap();
        assert_eq!(next.id, "mid");
        assert_eq!(secs, 8 * 3600 + 30 * 60);
        let (_, prev) = previous_arrangement(now, &list).unwrap();
        assert_eq!(prev.id, "early");
    }

    #[test]
    fn next_arrangement_none_after_last() {
        let list = vec![arrangement("only", "t", "08:00:00", "08:00:10")];
        assert!(next_arrangement(9 * 3600, &list).is_none());
        assert!(previous_arrangement(7 * 3600, &list).is_none());
    }
}
