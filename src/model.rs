//! Schedule data: sources, arrangements, record windows and export settings.
//!
//! These are plain values owned by the editing layer. The core borrows them for
//! the duration of one call and never keeps them around.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Absolute wall-clock instant as stored in project files (RFC 3339).
pub type Instant = DateTime<FixedOffset>;

/// Arrangements keyed by record name.
pub type ArrangementMap = BTreeMap<String, Vec<Arrangement>>;

/// Record windows keyed by record name.
pub type RecordMap = BTreeMap<String, TimeOfRecord>;

/// Trim window applied to a source before every use, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cut {
    pub start: f64,
    pub end: f64,
}

impl Cut {
    pub fn duration_secs(&self) -> f64 {
        self.end - self.start
    }

    /// True when the window is non-empty and starts at or after zero.
    pub fn is_well_formed(&self) -> bool {
        self.start >= 0.0 && self.start < self.end
    }
}

/// An audio clip that arrangements reference through its type id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub type_id: Option<String>,
    pub cut: Cut,
    /// Location of the audio file. Project files written by the browser editor
    /// carry no path; those sources have to be supplied as bytes by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// Start/end instants of one scheduled placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayingTime {
    pub start: Instant,
    pub end: Instant,
}

impl PlayingTime {
    pub fn duration_secs(&self) -> f64 {
        secs_between(self.start, self.end)
    }
}

/// Which edge of an arrangement stays put when its duration is reconciled
/// against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixedTime {
    Start,
    End,
}

/// One scheduled placement of an announcement inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrangement {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub type_id: Option<String>,
    pub playing_time: PlayingTime,
    #[serde(default)]
    pub fade_in: bool,
    #[serde(default)]
    pub fade_out: bool,
    #[serde(default)]
    pub fixed_time: Option<FixedTime>,
    /// Linear gain in percent (0–100).
    #[serde(default = "default_loudness", deserialize_with = "loudness_or_default")]
    pub loudness: f32,
}

fn default_loudness() -> f32 {
    100.0
}

/// Editor exports write `null` for untouched loudness.
fn loudness_or_default<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or_else(default_loudness))
}

impl Arrangement {
    pub fn duration_secs(&self) -> f64 {
        self.playing_time.duration_secs()
    }

    /// Whether the placement lies entirely inside the record window.
    pub fn is_within(&self, record: &TimeOfRecord) -> bool {
        self.playing_time.start >= record.start && self.playing_time.end <= record.end
    }
}

/// A named scheduling window: the day's recording boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeOfRecord {
    pub start: Instant,
    pub end: Instant,
}

impl TimeOfRecord {
    pub fn duration_secs(&self) -> f64 {
        secs_between(self.start, self.end)
    }
}

/// Target container/codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Ogg,
    Flac,
    Wav,
}

impl AudioFormat {
    /// Parse a format from an extension (case-insensitive, leading dot allowed).
    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" | "oga" => Ok(AudioFormat::Ogg),
            "flac" => Ok(AudioFormat::Flac),
            "wav" | "wave" => Ok(AudioFormat::Wav),
            _ => Err(format!(
                "Unknown format '{}'. Expected: mp3, ogg, flac, wav",
                s
            )),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
        }
    }

    /// Lossless formats ignore the bitrate setting.
    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioFormat::Flac | AudioFormat::Wav)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Encoder settings chosen by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Bitrate in kbps (ignored by lossless formats).
    pub bitrate: u32,
    pub extension: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            bitrate: 128,
            extension: "mp3".to_string(),
        }
    }
}

impl ExportSettings {
    pub fn format(&self) -> Result<AudioFormat, String> {
        AudioFormat::from_str_loose(&self.extension)
    }
}

/// Borrowed view over the whole schedule of a project.
#[derive(Debug, Clone, Copy)]
pub struct Schedule<'a> {
    pub arrangements: &'a ArrangementMap,
    pub records: &'a RecordMap,
}

/// Everything the core needs to know about one record.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchedule<'a> {
    pub name: &'a str,
    pub window: &'a TimeOfRecord,
    pub arrangements: &'a [Arrangement],
}

impl<'a> Schedule<'a> {
    pub fn new(arrangements: &'a ArrangementMap, records: &'a RecordMap) -> Self {
        Schedule {
            arrangements,
            records,
        }
    }

    /// Look up a record with its window. Records that have a window but no
    /// arrangement list yield an empty slice.
    pub fn record(&self, name: &str) -> Option<RecordSchedule<'a>> {
        let (name, window) = self.records.get_key_value(name)?;
        let arrangements = self
            .arrangements
            .get(name.as_str())
            .map(|list| list.as_slice())
            .unwrap_or(&[]);
        Some(RecordSchedule {
            name: name.as_str(),
            window,
            arrangements,
        })
    }

    /// Names of every record mentioned by either map, in sorted order.
    pub fn record_names(&self) -> Vec<&'a str> {
        let mut names: Vec<&'a str> = self
            .arrangements
            .keys()
            .chain(self.records.keys())
            .map(|s| s.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn has_arrangements(&self) -> bool {
        self.arrangements.values().any(|list| !list.is_empty())
    }
}

/// Seconds from `a` to `b`, millisecond precision.
pub fn secs_between(a: Instant, b: Instant) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

/// Parse an RFC 3339 instant (e.g. `2024-05-06T08:00:00+03:00`).
pub fn parse_instant(s: &str) -> Result<Instant, String> {
    DateTime::parse_from_rfc3339(s.trim()).map_err(|e| format!("Invalid instant '{}': {}", s, e))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders shared by the unit tests of the core modules.

    use super::*;

    pub fn at(hms: &str) -> Instant {
        parse_instant(&format!("2024-05-06T{}+00:00", hms)).unwrap()
    }

    pub fn record(start: &str, end: &str) -> TimeOfRecord {
        TimeOfRecord {
            start: at(start),
            end: at(end),
        }
    }

    pub fn arrangement(id: &str, type_id: &str, start: &str, end: &str) -> Arrangement {
        Arrangement {
            id: id.to_string(),
            type_id: Some(type_id.to_string()),
            playing_time: PlayingTime {
                start: at(start),
                end: at(end),
            },
            fade_in: false,
            fade_out: false,
            fixed_time: None,
            loudness: 100.0,
        }
    }

    pub fn source(id: &str, type_id: &str, cut_start: f64, cut_end: f64) -> Source {
        Source {
            id: id.to_string(),
            title: format!("{} title", id),
            type_id: Some(type_id.to_string()),
            cut: Cut {
                start: cut_start,
                end: cut_end,
            },
            file_path: None,
        }
    }
}
