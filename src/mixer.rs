//! Mixing engine: renders a composition into one mono buffer per record.
//!
//! Segments are accumulated additively into a silence-initialised buffer, so
//! overlapping placements sum instead of overwriting each other. A single
//! peak normalisation pass runs after every segment has been applied.

use crate::composition::ComposedSegment;
use crate::error::MixError;
use crate::model::{secs_between, TimeOfRecord};
use crate::validation::MAX_RECORD_SECS;
use log::{debug, info, warn};
use std::borrow::Cow;
use std::collections::HashMap;

/// Fades never last longer than this (seconds).
pub const MAX_FADE_SECS: f64 = 0.3;

/// Peaks above this trigger normalisation.
pub const NORMALIZE_THRESHOLD: f32 = 0.95;

/// Peak level after normalisation.
pub const NORMALIZE_TARGET: f32 = 0.9;

/// Longest window rendered into a single buffer (seconds).
pub const MAX_RENDER_SECS: f64 = MAX_RECORD_SECS;

/// Interleaved float PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        PcmBuffer {
            sample_rate,
            channels: 1,
            samples,
        }
    }

    /// A mono buffer of `len` zero samples.
    pub fn silence(sample_rate: u32, len: usize) -> Self {
        Self::mono(sample_rate, vec![0.0; len])
    }

    /// Number of frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono view of the samples; multi-channel frames are averaged.
    pub fn to_mono(&self) -> Cow<'_, [f32]> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return Cow::Borrowed(&self.samples);
        }
        Cow::Owned(
            self.samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect(),
        )
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }
}

/// A segment that could not be mixed because its source has no decoded audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MixingGap {
    pub arrangement_id: String,
    pub source_id: String,
    pub source_title: String,
}

/// Result of rendering one record.
#[derive(Debug)]
pub struct RenderedRecord {
    pub buffer: PcmBuffer,
    pub gaps: Vec<MixingGap>,
    /// Factor applied by normalisation, if it ran.
    pub normalized_by: Option<f32>,
}

/// Fade ramp length in samples for a segment of `duration_samples`.
pub fn fade_len(duration_samples: usize, sample_rate: u32) -> usize {
    let duration_secs = duration_samples as f64 / sample_rate as f64;
    (MAX_FADE_SECS.min(duration_secs / 3.0) * sample_rate as f64).round() as usize
}

/// Render `segments` into a fresh mono buffer covering the record window.
pub fn render(
    segments: &[ComposedSegment<'_>],
    decoded: &HashMap<String, PcmBuffer>,
    record: &TimeOfRecord,
    sample_rate: u32,
) -> Result<RenderedRecord, MixError> {
    if sample_rate == 0 {
        return Err(MixError::InvalidSampleRate);
    }
    let window_secs = record.duration_secs();
    if window_secs <= 0.0 {
        return Err(MixError::InvalidWindow(window_secs));
    }

    let total = (window_secs * sample_rate as f64).ceil();
    let limit = (MAX_RENDER_SECS * sample_rate as f64).ceil();
    if total > limit || total > usize::MAX as f64 {
        return Err(MixError::BufferTooLarge {
            samples: total as u64,
        });
    }
    let total = total as usize;
    let mut target: Vec<f32> = Vec::new();
    if target.try_reserve_exact(total).is_err() {
        return Err(MixError::BufferTooLarge {
            samples: total as u64,
        });
    }
    target.resize(total, 0.0);
    let mut gaps = Vec::new();

    for segment in segments {
        let Some(source_buffer) = decoded.get(&segment.source.id) else {
            warn!(
                "No decoded audio for source '{}', skipping arrangement {}",
                segment.source.title, segment.arrangement.id
            );
            gaps.push(MixingGap {
                arrangement_id: segment.arrangement.id.clone(),
                source_id: segment.source.id.clone(),
                source_title: segment.source.title.clone(),
            });
            continue;
        };
        let mono = source_buffer.to_mono();
        mix_segment(&mut target, &mono, segment, record, sample_rate);
    }

    let mut buffer = PcmBuffer::mono(sample_rate, target);
    let normalized_by = normalize(&mut buffer.samples);
    if let Some(factor) = normalized_by {
        info!("Normalized mix (peak over {}), factor {:.3}", NORMALIZE_THRESHOLD, factor);
    }

    Ok(RenderedRecord {
        buffer,
        gaps,
        normalized_by,
    })
}

/// Accumulate one segment into `target`.
fn mix_segment(
    target: &mut [f32],
    source: &[f32],
    segment: &ComposedSegment<'_>,
    record: &TimeOfRecord,
    sample_rate: u32,
) {
    let rate = sample_rate as f64;
    let arrangement = segment.arrangement;
    let cut = &segment.source.cut;

    let offset_secs = secs_between(record.start, arrangement.playing_time.start);
    let offset = (offset_secs * rate).round() as i64;
    let play_secs = arrangement.duration_secs().min(cut.duration_secs());
    if play_secs <= 0.0 {
        warn!("Arrangement {} has nothing to play, skipping", arrangement.id);
        return;
    }
    let duration = (play_secs * rate).round() as usize;
    let cut_start = (cut.start.max(0.0) * rate).round() as usize;
    let fade = fade_len(duration, sample_rate);
    let gain = arrangement.loudness.clamp(0.0, 100.0) / 100.0;

    debug!(
        "Mixing {} at sample {} for {} samples (cut from {}, fade {}, gain {:.2})",
        arrangement.id, offset, duration, cut_start, fade, gain
    );

    for i in 0..duration {
        let Some(&sample) = source.get(cut_start + i) else {
            break;
        };
        let index = offset + i as i64;
        if index < 0 {
            continue;
        }
        let Some(slot) = target.get_mut(index as usize) else {
            break;
        };

        let mut value = sample * gain;
        if fade > 0 {
            if arrangement.fade_in && i < fade {
                value *= i as f32 / fade as f32;
            }
            if arrangement.fade_out && i >= duration - fade {
                value *= (duration - 1 - i) as f32 / fade as f32;
            }
        }
        *slot += value;
    }
}

/// Scale the buffer so its peak sits at `NORMALIZE_TARGET` when it exceeds
/// `NORMALIZE_THRESHOLD`. Returns the applied factor.
pub fn normalize(samples: &mut [f32]) -> Option<f32> {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
    if peak <= NORMALIZE_THRESHOLD {
        return None;
    }
    let factor = NORMALIZE_TARGET / peak;
    for s in samples.iter_mut() {
        *s *= factor;
    }
    Some(factor)
}
