//! Composition: turns one record's arrangements into an ordered list of
//! time-addressed playback segments.

use crate::model::{Arrangement, Source, TimeOfRecord};
use crate::time::seconds_of_day;

/// A resolved (source, arrangement) pair ready for mixing or playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposedSegment<'a> {
    /// Wall-clock start in seconds of day.
    pub start_time: u32,
    /// Wall-clock end in seconds of day.
    pub end_time: u32,
    pub source: &'a Source,
    pub arrangement: &'a Arrangement,
}

/// Resolve the source an arrangement plays. The first source in list order
/// with a matching type id wins; an arrangement without a type id never
/// resolves.
pub fn resolve_source<'a>(arrangement: &Arrangement, sources: &'a [Source]) -> Option<&'a Source> {
    let type_id = arrangement.type_id.as_deref()?;
    sources
        .iter()
        .find(|s| s.type_id.as_deref() == Some(type_id))
}

/// Build the composition for one record.
///
/// The result is sorted by absolute start time; equal starts keep their input
/// order. Arrangements with no resolvable source or lying (even partly)
/// outside the record window are dropped without a trace; validation is
/// expected to have reported them already.
pub fn build<'a>(
    arrangements: &'a [Arrangement],
    sources: &'a [Source],
    record: &TimeOfRecord,
) -> Vec<ComposedSegment<'a>> {
    let mut sorted: Vec<&'a Arrangement> = arrangements.iter().collect();
    sorted.sort_by_key(|a| a.playing_time.start);

    sorted
        .into_iter()
        .filter(|a| a.is_within(record))
        .filter_map(|arrangement| {
            let source = resolve_source(arrangement, sources)?;
            Some(ComposedSegment {
                start_time: seconds_of_day(&arrangement.playing_time.start),
                end_time: seconds_of_day(&arrangement.playing_time.end),
                source,
                arrangement,
            })
        })
        .collect()
}

/// The segment playing at `now` (seconds of day), bounds inclusive.
pub fn find_active_segment<'s, 'a>(
    composition: &'s [ComposedSegment<'a>],
    now: u32,
) -> Option<&'s ComposedSegment<'a>> {
    composition
        .iter()
        .find(|s| now >= s.start_time && now <= s.end_time)
}

/// The first segment starting after `now`.
pub fn find_next_segment<'s, 'a>(
    composition: &'s [ComposedSegment<'a>],
    now: u32,
) -> Option<&'s ComposedSegment<'a>> {
    composition.iter().find(|s| s.start_time > now)
}

/// The last segment that started before `now`.
pub fn find_previous_segment<'s, 'a>(
    composition: &'s [ComposedSegment<'a>],
    now: u32,
) -> Option<&'s ComposedSegment<'a>> {
    composition.iter().rev().find(|s| s.start_time < now)
}
