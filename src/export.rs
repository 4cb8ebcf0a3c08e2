//! Export pipeline: validate, decode, compose, mix and encode every record.
//!
//! The pipeline owns no project state. Each call borrows the schedule, decodes
//! every referenced source once into a read-only cache and then renders the
//! records either one after another or on scoped worker threads. Only missing
//! inputs, an unavailable encoder and cancellation abort the call; anything
//! that goes wrong inside one record is collected in the report.

use crate::composition::{self, resolve_source};
use crate::decode::Decoder;
use crate::encode::{canonical_wav_bytes, EncodedBlob, Encoder};
use crate::error::{DecodeError, ExportError, RecordError};
use crate::mixer::{self, PcmBuffer};
use crate::model::{ArrangementMap, ExportSettings, RecordMap, RecordSchedule, Schedule, Source};
use crate::preflight::duplicate_type_ids;
use crate::timing::check_timing;
use crate::validation::{validate_record, ValidationResult};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// A cut may run this far past the decoded audio before it is reported.
const CUT_TOLERANCE_SECS: f64 = 0.05;

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStage {
    Loading,
    Processing,
    Encoding,
    Completed,
    Error,
}

/// One progress event. `progress` is a percentage (0–100).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub stage: ExportStage,
    pub progress: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_name: Option<String>,
}

/// Sending half of the progress channel. Events are dropped once the
/// receiver goes away; progress never affects the export itself.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ExportProgress>>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<ExportProgress>) -> Self {
        ProgressSender { tx: Some(tx) }
    }

    /// A sender that discards every event.
    pub fn disabled() -> Self {
        ProgressSender::default()
    }

    pub fn send(
        &self,
        stage: ExportStage,
        progress: f32,
        message: impl Into<String>,
        record_name: Option<&str>,
    ) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ExportProgress {
                stage,
                progress: progress.clamp(0.0, 100.0),
                message: message.into(),
                record_name: record_name.map(str::to_string),
            });
        }
    }
}

pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ExportProgress>) {
    let (tx, rx) = mpsc::channel();
    (ProgressSender::new(tx), rx)
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Shared flag checked between sources and between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

// ── Request / report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Mix rate. Decoded sources must come back at this rate.
    pub sample_rate: u32,
    /// Render records on scoped threads instead of one after another.
    pub parallel_records: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            sample_rate: 44_100,
            parallel_records: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExportTarget {
    #[default]
    All,
    Record(String),
}

/// Everything one export call borrows from the caller.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub sources: &'a [Source],
    /// Encoded audio keyed by source id.
    pub source_files: &'a HashMap<String, Vec<u8>>,
    pub arrangements: &'a ArrangementMap,
    pub records: &'a RecordMap,
    pub settings: &'a ExportSettings,
    pub target: &'a ExportTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    Decode,
    CutBeyondSource,
    MixingGap,
    UnresolvedSource,
    DuplicateType,
    Timing,
    Validation,
    SkippedRecord,
}

/// A problem that did not stop any record from being exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportWarning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_name: Option<String>,
    pub message: String,
}

impl ExportWarning {
    fn new(kind: WarningKind, record_name: Option<&str>, message: impl Into<String>) -> Self {
        ExportWarning {
            kind,
            record_name: record_name.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_name {
            Some(name) => write!(f, "[{}] {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    /// Encoded output per record name.
    pub outputs: BTreeMap<String, EncodedBlob>,
    pub warnings: Vec<ExportWarning>,
    /// Records that produced no output, with the reason.
    pub failures: BTreeMap<String, RecordError>,
    /// Validation result of every record that was considered.
    pub validation: BTreeMap<String, ValidationResult>,
}

impl ExportReport {
    /// True when every requested record produced output.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn warn(&mut self, warning: ExportWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    fn fail(&mut self, record_name: &str, err: RecordError) {
        error!("Record '{}' failed: {}", record_name, err);
        self.failures.insert(record_name.to_string(), err);
    }
}

struct RecordOutcome {
    result: Result<EncodedBlob, RecordError>,
    warnings: Vec<ExportWarning>,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct ExportPipeline<D, E> {
    decoder: D,
    encoder: E,
    options: ExportOptions,
}

impl<D: Decoder, E: Encoder> ExportPipeline<D, E> {
    pub fn new(decoder: D, encoder: E, options: ExportOptions) -> Self {
        ExportPipeline {
            decoder,
            encoder,
            options,
        }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export the records selected by `request.target`.
    ///
    /// Returns `Err` only for missing inputs, an unavailable encoder or
    /// cancellation. Per-record problems end up in `ExportReport::failures`.
    pub fn export_all(
        &self,
        request: &ExportRequest<'_>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<ExportReport, ExportError> {
        let result = self.run(request, progress, cancel);
        if let Err(e) = &result {
            error!("Export aborted: {}", e);
            progress.send(ExportStage::Error, 0.0, e.to_string(), None);
        }
        result
    }

    fn run(
        &self,
        request: &ExportRequest<'_>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<ExportReport, ExportError> {
        progress.send(ExportStage::Loading, 0.0, "Checking project", None);
        let schedule = Schedule::new(request.arrangements, request.records);
        self.check_preconditions(request, &schedule)?;

        let mut report = ExportReport::default();
        let plan = plan_records(request, &schedule, &mut report);
        progress.send(
            ExportStage::Loading,
            10.0,
            format!("{} records ready to render", plan.len()),
            None,
        );
        schedule_warnings(request, &plan, &mut report);

        let cache = self.decode_sources(request, &plan, progress, cancel, &mut report)?;

        let outcomes = if self.options.parallel_records && plan.len() > 1 {
            self.render_parallel(request, &plan, &cache, progress, cancel)
        } else {
            self.render_sequential(request, &plan, &cache, progress, cancel)?
        };
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        for (name, outcome) in outcomes {
            for warning in outcome.warnings {
                report.warn(warning);
            }
            match outcome.result {
                Ok(blob) => {
                    info!("Record '{}' exported ({} bytes)", name, blob.bytes.len());
                    report.outputs.insert(name.to_string(), blob);
                }
                Err(e) => report.fail(name, e),
            }
        }

        let total = report.outputs.len() + report.failures.len();
        let message = format!("Exported {} of {} records", report.outputs.len(), total);
        info!("{}", message);
        progress.send(ExportStage::Completed, 100.0, message, None);
        Ok(report)
    }

    fn check_preconditions(
        &self,
        request: &ExportRequest<'_>,
        schedule: &Schedule<'_>,
    ) -> Result<(), ExportError> {
        if request.sources.is_empty() {
            return Err(ExportError::NoSources);
        }
        if !schedule.has_arrangements() {
            return Err(ExportError::NoArrangements);
        }
        if request.records.is_empty() {
            return Err(ExportError::NoRecords);
        }
        if let ExportTarget::Record(name) = request.target {
            if !request.records.contains_key(name) {
                return Err(ExportError::UnknownRecord(name.clone()));
            }
        }
        self.encoder
            .check_available()
            .map_err(ExportError::EncoderUnavailable)
    }

    /// Decode every source the plan references, once each, in order of first use.
    fn decode_sources(
        &self,
        request: &ExportRequest<'_>,
        plan: &[RecordSchedule<'_>],
        progress: &ProgressSender,
        cancel: &CancellationToken,
        report: &mut ExportReport,
    ) -> Result<HashMap<String, PcmBuffer>, ExportError> {
        let mut needed: Vec<&Source> = Vec::new();
        for arrangement in plan.iter().flat_map(|r| r.arrangements) {
            if let Some(source) = resolve_source(arrangement, request.sources) {
                if !needed.iter().any(|s| s.id == source.id) {
                    needed.push(source);
                }
            }
        }

        let mut cache = HashMap::with_capacity(needed.len());
        let total = needed.len().max(1) as f32;
        for (i, source) in needed.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            progress.send(
                ExportStage::Loading,
                20.0 + 30.0 * i as f32 / total,
                format!("Decoding '{}'", source.title),
                None,
            );

            match self.decode_source(request, source) {
                Ok(buffer) => {
                    let available = buffer.duration_secs();
                    if source.cut.end > available + CUT_TOLERANCE_SECS {
                        report.warn(ExportWarning::new(
                            WarningKind::CutBeyondSource,
                            None,
                            format!(
                                "Cut of '{}' ends at {:.1}s but the audio lasts {:.1}s",
                                source.title, source.cut.end, available
                            ),
                        ));
                    }
                    debug!(
                        "Decoded '{}': {:.2}s, {} ch",
                        source.title, available, buffer.channels
                    );
                    cache.insert(source.id.clone(), buffer);
                }
                Err(e) => report.warn(ExportWarning::new(
                    WarningKind::Decode,
                    None,
                    format!("Source '{}' skipped: {}", source.title, e),
                )),
            }
        }

        progress.send(
            ExportStage::Loading,
            50.0,
            format!("Decoded {} of {} sources", cache.len(), needed.len()),
            None,
        );
        Ok(cache)
    }

    fn decode_source(
        &self,
        request: &ExportRequest<'_>,
        source: &Source,
    ) -> Result<PcmBuffer, DecodeError> {
        let bytes = request
            .source_files
            .get(&source.id)
            .ok_or(DecodeError::Missing)?;
        let buffer = self.decoder.decode(bytes)?;
        if buffer.sample_rate != self.options.sample_rate {
            return Err(DecodeError::SampleRateMismatch {
                expected: self.options.sample_rate,
                actual: buffer.sample_rate,
            });
        }
        Ok(buffer)
    }

    fn render_sequential<'p>(
        &self,
        request: &ExportRequest<'_>,
        plan: &[RecordSchedule<'p>],
        cache: &HashMap<String, PcmBuffer>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Vec<(&'p str, RecordOutcome)>, ExportError> {
        let mut outcomes = Vec::with_capacity(plan.len());
        for (i, record) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let outcome = self.render_record(request, record, (i, plan.len()), cache, progress);
            outcomes.push((record.name, outcome));
        }
        Ok(outcomes)
    }

    /// One scoped thread per record. Workers share the decode cache read-only.
    fn render_parallel<'p>(
        &self,
        request: &ExportRequest<'_>,
        plan: &[RecordSchedule<'p>],
        cache: &HashMap<String, PcmBuffer>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Vec<(&'p str, RecordOutcome)> {
        let total = plan.len();
        std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .iter()
                .enumerate()
                .map(|(i, record)| {
                    scope.spawn(move || {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(self.render_record(request, record, (i, total), cache, progress))
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(plan)
                .filter_map(|(handle, record)| match handle.join() {
                    Ok(Some(outcome)) => Some((record.name, outcome)),
                    Ok(None) => None,
                    Err(_) => Some((
                        record.name,
                        RecordOutcome {
                            result: Err(RecordError::Panicked),
                            warnings: Vec::new(),
                        },
                    )),
                })
                .collect()
        })
    }

    fn render_record(
        &self,
        request: &ExportRequest<'_>,
        record: &RecordSchedule<'_>,
        (index, total): (usize, usize),
        cache: &HashMap<String, PcmBuffer>,
        progress: &ProgressSender,
    ) -> RecordOutcome {
        let span = 40.0 / total.max(1) as f32;
        let base = 50.0 + span * index as f32;
        let mut warnings = Vec::new();
        let result = self.mix_and_encode(request, record, cache, progress, (base, span), &mut warnings);
        RecordOutcome { result, warnings }
    }

    fn mix_and_encode(
        &self,
        request: &ExportRequest<'_>,
        record: &RecordSchedule<'_>,
        cache: &HashMap<String, PcmBuffer>,
        progress: &ProgressSender,
        (base, span): (f32, f32),
        warnings: &mut Vec<ExportWarning>,
    ) -> Result<EncodedBlob, RecordError> {
        let name = record.name;
        progress.send(
            ExportStage::Processing,
            base,
            format!("Mixing {}", name),
            Some(name),
        );

        let segments = composition::build(record.arrangements, request.sources, record.window);
        debug!(
            "Record '{}': {} of {} announcements composed",
            name,
            segments.len(),
            record.arrangements.len()
        );

        let rendered = mixer::render(&segments, cache, record.window, self.options.sample_rate)?;
        for gap in &rendered.gaps {
            warnings.push(ExportWarning::new(
                WarningKind::MixingGap,
                Some(name),
                format!(
                    "Announcement {} left silent: no audio for source '{}'",
                    gap.arrangement_id, gap.source_title
                ),
            ));
        }

        progress.send(
            ExportStage::Encoding,
            base + span / 2.0,
            format!("Encoding {} to {}", name, request.settings.extension),
            Some(name),
        );
        let wav = canonical_wav_bytes(&rendered.buffer)?;
        drop(rendered);
        Ok(self.encoder.encode(&wav, request.settings)?)
    }
}

/// Pick the records to render, validating each. Blocked and empty records
/// are recorded in the report and left out of the plan.
fn plan_records<'a>(
    request: &ExportRequest<'_>,
    schedule: &Schedule<'a>,
    report: &mut ExportReport,
) -> Vec<RecordSchedule<'a>> {
    let names: Vec<&str> = match request.target {
        ExportTarget::All => schedule.record_names(),
        ExportTarget::Record(name) => vec![name.as_str()],
    };
    let explicit = matches!(request.target, ExportTarget::Record(_));

    let mut plan = Vec::new();
    for name in names {
        let Some(record) = schedule.record(name) else {
            report.warn(ExportWarning::new(
                WarningKind::SkippedRecord,
                Some(name),
                "No time window defined, record skipped",
            ));
            continue;
        };
        if record.arrangements.is_empty() {
            if explicit {
                report.fail(name, RecordError::Empty);
            } else {
                report.warn(ExportWarning::new(
                    WarningKind::SkippedRecord,
                    Some(name),
                    "No announcements, record skipped",
                ));
            }
            continue;
        }

        let result = validate_record(record.arrangements, record.window, record.name);
        for issue in result.warnings() {
            report.warn(ExportWarning::new(
                WarningKind::Validation,
                Some(name),
                issue.message.clone(),
            ));
        }
        if result.is_valid {
            plan.push(record);
        } else {
            let errors = result.errors().map(|i| i.message.clone()).collect();
            report.fail(name, RecordError::Blocked(errors));
        }
        report.validation.insert(name.to_string(), result);
    }
    plan
}

/// Soft problems worth telling the operator about before rendering.
fn schedule_warnings(
    request: &ExportRequest<'_>,
    plan: &[RecordSchedule<'_>],
    report: &mut ExportReport,
) {
    for (type_id, ids) in duplicate_type_ids(request.sources) {
        report.warn(ExportWarning::new(
            WarningKind::DuplicateType,
            None,
            format!(
                "Type '{}' is used by {} sources; source '{}' will be played",
                type_id,
                ids.len(),
                ids[0]
            ),
        ));
    }

    for record in plan {
        for arrangement in record.arrangements {
            match resolve_source(arrangement, request.sources) {
                None => report.warn(ExportWarning::new(
                    WarningKind::UnresolvedSource,
                    Some(record.name),
                    format!(
                        "Announcement {} has no matching source (type {}), skipped",
                        arrangement.id,
                        arrangement.type_id.as_deref().unwrap_or("none")
                    ),
                )),
                Some(source) => {
                    for issue in check_timing(arrangement, Some(source.cut.duration_secs())) {
                        report.warn(ExportWarning::new(
                            WarningKind::Timing,
                            Some(record.name),
                            format!("Announcement {}: {}", arrangement.id, issue),
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::read_wav_samples;
    use crate::error::{EncodeError, MixError};
    use crate::model::fixtures::*;
    use crate::model::{AudioFormat, Arrangement, TimeOfRecord};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const RATE: u32 = 100;

    /// Every byte becomes one mono sample of `byte / 255`.
    struct StubDecoder {
        rate: u32,
    }

    impl Decoder for StubDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<PcmBuffer, DecodeError> {
            if bytes == b"corrupt" {
                return Err(DecodeError::Unsupported("stub".into()));
            }
            if bytes.is_empty() {
                return Err(DecodeError::Empty);
            }
            Ok(PcmBuffer::mono(
                self.rate,
                bytes.iter().map(|&b| b as f32 / 255.0).collect(),
            ))
        }
    }

    /// Counts decode calls on top of `StubDecoder`.
    struct CountingDecoder {
        inner: StubDecoder,
        calls: AtomicUsize,
    }

    impl Decoder for CountingDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<PcmBuffer, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.decode(bytes)
        }
    }

    /// Hands the canonical WAV back unchanged.
    struct PassThrough;

    impl Encoder for PassThrough {
        fn encode(&self, wav: &[u8], settings: &ExportSettings) -> Result<EncodedBlob, EncodeError> {
            let format = settings
                .format()
                .map_err(|_| EncodeError::UnsupportedFormat(settings.extension.clone()))?;
            Ok(EncodedBlob {
                format,
                bytes: wav.to_vec(),
            })
        }
    }

    /// Fails the first encode call, passes the rest through.
    struct FailFirst {
        calls: Mutex<usize>,
    }

    impl Encoder for FailFirst {
        fn encode(&self, wav: &[u8], settings: &ExportSettings) -> Result<EncodedBlob, EncodeError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Err(EncodeError::Failed {
                    status: 1,
                    stderr: "boom".into(),
                });
            }
            PassThrough.encode(wav, settings)
        }
    }

    struct Unavailable;

    impl Encoder for Unavailable {
        fn encode(&self, _: &[u8], _: &ExportSettings) -> Result<EncodedBlob, EncodeError> {
            Err(EncodeError::EmptyOutput)
        }

        fn check_available(&self) -> Result<(), EncodeError> {
            Err(EncodeError::Launch {
                program: "ffmpeg".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        }
    }

    struct Project {
        sources: Vec<Source>,
        files: HashMap<String, Vec<u8>>,
        arrangements: ArrangementMap,
        records: RecordMap,
        settings: ExportSettings,
    }

    impl Project {
        fn new() -> Self {
            Project {
                sources: Vec::new(),
                files: HashMap::new(),
                arrangements: ArrangementMap::new(),
                records: RecordMap::new(),
                settings: ExportSettings {
                    bitrate: 128,
                    extension: "wav".into(),
                },
            }
        }

        fn source(mut self, id: &str, type_id: &str, level: u8, secs: usize) -> Self {
            self.sources.push(source(id, type_id, 0.0, secs as f64));
            self.files
                .insert(id.to_string(), vec![level; secs * RATE as usize]);
            self
        }

        fn record(mut self, name: &str, window: TimeOfRecord, list: Vec<Arrangement>) -> Self {
            self.records.insert(name.to_string(), window);
            self.arrangements.insert(name.to_string(), list);
            self
        }

        fn request<'a>(&'a self, target: &'a ExportTarget) -> ExportRequest<'a> {
            ExportRequest {
                sources: &self.sources,
                source_files: &self.files,
                arrangements: &self.arrangements,
                records: &self.records,
                settings: &self.settings,
                target,
            }
        }
    }

    fn two_records() -> Project {
        Project::new()
            .source("s1", "bell", 51, 10)
            .source("s2", "jingle", 102, 5)
            .record(
                "A",
                record("08:00:00", "08:01:00"),
                vec![arrangement("a1", "bell", "08:00:10", "08:00:20")],
            )
            .record(
                "B",
                record("09:00:00", "09:00:30"),
                vec![
                    arrangement("b1", "jingle", "09:00:00", "09:00:05"),
                    arrangement("b2", "bell", "09:00:15", "09:00:25"),
                ],
            )
    }

    fn pipeline<E: Encoder>(encoder: E, parallel: bool) -> ExportPipeline<StubDecoder, E> {
        ExportPipeline::new(
            StubDecoder { rate: RATE },
            encoder,
            ExportOptions {
                sample_rate: RATE,
                parallel_records: parallel,
            },
        )
    }

    fn run<D: Decoder, E: Encoder>(
        pipeline: &ExportPipeline<D, E>,
        project: &Project,
        target: ExportTarget,
    ) -> (Result<ExportReport, ExportError>, Vec<ExportProgress>) {
        let (progress, rx) = progress_channel();
        let result = pipeline.export_all(&project.request(&target), &progress, &CancellationToken::new());
        drop(progress);
        (result, rx.iter().collect())
    }

    #[test]
    fn exports_every_record() {
        let project = two_records();
        let (result, events) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let report = result.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(report.outputs["A"].format, AudioFormat::Wav);

        let a = read_wav_samples(&report.outputs["A"].bytes).unwrap();
        assert_eq!(a.sample_rate, RATE);
        assert_eq!(a.samples.len(), 60 * RATE as usize);
        assert!((a.samples[15 * RATE as usize] - 0.2).abs() < 1e-6);
        assert_eq!(a.samples[5 * RATE as usize], 0.0);

        let b = read_wav_samples(&report.outputs["B"].bytes).unwrap();
        assert!((b.samples[2 * RATE as usize] - 0.4).abs() < 1e-6);
        assert!((b.samples[20 * RATE as usize] - 0.2).abs() < 1e-6);

        assert_eq!(events.first().unwrap().stage, ExportStage::Loading);
        let last = events.last().unwrap();
        assert_eq!(last.stage, ExportStage::Completed);
        assert_eq!(last.progress, 100.0);
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(events
            .iter()
            .any(|e| e.stage == ExportStage::Encoding && e.record_name.as_deref() == Some("B")));
    }

    #[test]
    fn preconditions_abort_with_error_event() {
        let pipe = pipeline(PassThrough, false);

        let (result, events) = run(&pipe, &Project::new(), ExportTarget::All);
        assert!(matches!(result, Err(ExportError::NoSources)));
        assert_eq!(events.last().unwrap().stage, ExportStage::Error);

        let no_arrangements = Project::new()
            .source("s1", "bell", 1, 1)
            .record("A", record("08:00:00", "09:00:00"), vec![]);
        let (result, _) = run(&pipe, &no_arrangements, ExportTarget::All);
        assert!(matches!(result, Err(ExportError::NoArrangements)));

        let mut no_records = two_records();
        no_records.records.clear();
        let (result, _) = run(&pipe, &no_records, ExportTarget::All);
        assert!(matches!(result, Err(ExportError::NoRecords)));

        let (result, _) = run(&pipe, &two_records(), ExportTarget::Record("Z".into()));
        assert!(matches!(result, Err(ExportError::UnknownRecord(name)) if name == "Z"));
    }

    #[test]
    fn missing_encoder_fails_before_decoding() {
        let (result, events) = run(&pipeline(Unavailable, false), &two_records(), ExportTarget::All);
        assert!(matches!(result, Err(ExportError::EncoderUnavailable(_))));
        assert!(!events.iter().any(|e| e.message.starts_with("Decoding")));
    }

    #[test]
    fn validation_errors_block_only_their_record() {
        let mut project = two_records();
        project
            .arrangements
            .get_mut("A")
            .unwrap()
            .push(arrangement("a2", "bell", "08:00:55", "08:01:05"));

        let (result, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let report = result.unwrap();
        assert!(matches!(report.failures.get("A"), Some(RecordError::Blocked(errors)) if errors.iter().any(|e| e.contains("out of bounds"))));
        assert!(report.outputs.contains_key("B"));
        assert!(!report.outputs.contains_key("A"));
        assert!(!report.validation["A"].is_valid);
        assert!(report.validation["B"].is_valid);
    }

    #[test]
    fn corrupt_source_becomes_warning_and_gap() {
        let mut project = two_records();
        project.files.insert("s2".into(), b"corrupt".to_vec());

        let (result, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let report = result.unwrap();
        assert!(report.is_complete());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::Decode && w.message.contains("s2 title")));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::MixingGap && w.record_name.as_deref() == Some("B")));

        let b = read_wav_samples(&report.outputs["B"].bytes).unwrap();
        assert_eq!(b.samples[2 * RATE as usize], 0.0);
        assert!((b.samples[20 * RATE as usize] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn encoder_failure_is_isolated() {
        let encoder = FailFirst {
            calls: Mutex::new(0),
        };
        let (result, _) = run(&pipeline(encoder, false), &two_records(), ExportTarget::All);
        let report = result.unwrap();
        assert!(matches!(report.failures.get("A"), Some(RecordError::Encode(_))));
        assert!(report.outputs.contains_key("B"));
        assert!(!report.is_complete());
    }

    #[test]
    fn cancellation_discards_everything() {
        let project = two_records();
        let target = ExportTarget::All;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (progress, rx) = progress_channel();

        let result = pipeline(PassThrough, false).export_all(&project.request(&target), &progress, &cancel);
        drop(progress);
        assert!(matches!(result, Err(ExportError::Cancelled)));
        assert!(!rx.iter().any(|e| e.stage == ExportStage::Completed));
    }

    #[test]
    fn parallel_matches_sequential() {
        let project = two_records();
        let (seq, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let (par, _) = run(&pipeline(PassThrough, true), &project, ExportTarget::All);
        assert_eq!(seq.unwrap().outputs, par.unwrap().outputs);
    }

    #[test]
    fn single_record_target() {
        let (result, _) = run(
            &pipeline(PassThrough, false),
            &two_records(),
            ExportTarget::Record("B".into()),
        );
        let report = result.unwrap();
        assert_eq!(report.outputs.keys().collect::<Vec<_>>(), vec!["B"]);
        assert!(!report.validation.contains_key("A"));
    }

    #[test]
    fn empty_record_is_skipped_or_failed() {
        let project = two_records().record("C", record("10:00:00", "11:00:00"), vec![]);

        let (all, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let report = all.unwrap();
        assert!(report.is_complete());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SkippedRecord && w.record_name.as_deref() == Some("C")));

        let (one, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::Record("C".into()));
        assert!(matches!(one.unwrap().failures.get("C"), Some(RecordError::Empty)));
    }

    #[test]
    fn soft_problems_are_reported() {
        let mut project = two_records().source("s3", "bell", 10, 3);
        project.files.insert("s1".into(), vec![51; 4 * RATE as usize]);
        project
            .arrangements
            .get_mut("B")
            .unwrap()
            .push(arrangement("b3", "ghost", "09:00:27", "09:00:29"));

        let (result, _) = run(&pipeline(PassThrough, false), &project, ExportTarget::All);
        let report = result.unwrap();
        let has = |kind: WarningKind| report.warnings.iter().any(|w| w.kind == kind);
        assert!(has(WarningKind::DuplicateType));
        assert!(has(WarningKind::CutBeyondSource));
        assert!(has(WarningKind::UnresolvedSource));
        assert!(report.is_complete());
    }

    #[test]
    fn sample_rate_mismatch_excludes_source() {
        let pipe = ExportPipeline::new(
            StubDecoder { rate: RATE * 2 },
            PassThrough,
            ExportOptions {
                sample_rate: RATE,
                parallel_records: false,
            },
        );
        let (result, _) = run(&pipe, &two_records(), ExportTarget::All);
        let report = result.unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::Decode && w.message.contains("expected 100 Hz")));
        let a = read_wav_samples(&report.outputs["A"].bytes).unwrap();
        assert!(a.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn shared_sources_are_decoded_once() {
        for parallel in [false, true] {
            let pipe = ExportPipeline::new(
                CountingDecoder {
                    inner: StubDecoder { rate: RATE },
                    calls: AtomicUsize::new(0),
                },
                PassThrough,
                ExportOptions {
                    sample_rate: RATE,
                    parallel_records: parallel,
                },
            );
            let (result, _) = run(&pipe, &two_records(), ExportTarget::All);
            assert_eq!(result.unwrap().outputs.len(), 2);
            // s1 plays in both records, s2 only in B
            assert_eq!(pipe.decoder.calls.load(Ordering::SeqCst), 2, "parallel={}", parallel);
        }
    }

    #[test]
    fn oversized_record_fails_alone() {
        let start = at("00:00:00");
        let year = TimeOfRecord {
            start,
            end: start + chrono::Duration::days(366),
        };
        let project = two_records().record(
            "Year",
            year,
            vec![arrangement("y1", "bell", "00:00:10", "00:00:20")],
        );

        for parallel in [false, true] {
            let (result, _) = run(&pipeline(PassThrough, parallel), &project, ExportTarget::All);
            let report = result.unwrap();
            assert!(matches!(
                report.failures.get("Year"),
                Some(RecordError::Mix(MixError::BufferTooLarge { .. }))
            ));
            assert!(report.outputs.contains_key("A"));
            assert!(report.outputs.contains_key("B"));
        }
    }
}
