//! Encoding: canonical PCM serialisation and the pluggable encoder seam.
//!
//! Every rendered record is first written as a canonical mono float WAV and
//! then handed to an `Encoder`. The shipped `FfmpegEncoder` shells out to
//! ffmpeg through a scratch directory that is removed whatever the outcome.

use crate::error::EncodeError;
use crate::mixer::PcmBuffer;
use crate::model::{AudioFormat, ExportSettings};
use log::{debug, warn};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Encoded output of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBlob {
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

impl EncodedBlob {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// `<record>.<ext>`, with path separators in the record name replaced.
    pub fn file_name(&self, record_name: &str) -> String {
        let safe: String = record_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        format!("{}.{}", safe, self.extension())
    }
}

/// Turns a canonical WAV into the target container.
pub trait Encoder: Send + Sync {
    fn encode(&self, canonical_wav: &[u8], settings: &ExportSettings) -> Result<EncodedBlob, EncodeError>;

    /// Called once before any decoding so a missing encoder fails the export early.
    fn check_available(&self) -> Result<(), EncodeError> {
        Ok(())
    }
}

fn parse_format(settings: &ExportSettings) -> Result<AudioFormat, EncodeError> {
    settings
        .format()
        .map_err(|_| EncodeError::UnsupportedFormat(settings.extension.clone()))
}

// ── Canonical PCM ────────────────────────────────────────────────────────────

/// Serialise a buffer as a 32-bit float WAV with the buffer's rate and layout.
pub fn canonical_wav_bytes(buffer: &PcmBuffer) -> Result<Vec<u8>, EncodeError> {
    let spec = hound::WavSpec {
        channels: buffer.channels.max(1),
        sample_rate: buffer.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut bytes = Vec::with_capacity(44 + buffer.samples.len() * 4);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for &s in &buffer.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

/// Read a canonical (or any PCM) WAV back into float samples.
pub fn read_wav_samples(bytes: &[u8]) -> Result<PcmBuffer, EncodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(PcmBuffer {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

// ── ffmpeg ───────────────────────────────────────────────────────────────────

/// Build the ffmpeg argument list that converts `input_path` into `format`.
/// Returns a `Vec<String>` ready for `Command::new(program).args(...)`.
pub fn build_encoder_args(
    input_path: &str,
    output_path: &str,
    format: AudioFormat,
    bitrate: u32,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input_path.into(),
    ];

    let rate = format!("{}k", bitrate);
    match format {
        AudioFormat::Mp3 => args.extend(
            ["-codec:a", "libmp3lame", "-b:a", rate.as_str(), "-cbr", "1"].map(String::from),
        ),
        AudioFormat::Ogg => args.extend(
            [
                "-codec:a",
                "libvorbis",
                "-b:a",
                rate.as_str(),
                "-minrate",
                rate.as_str(),
                "-maxrate",
                rate.as_str(),
            ]
            .map(String::from),
        ),
        AudioFormat::Flac => {
            args.extend(["-codec:a", "flac", "-compression_level", "5"].map(String::from))
        }
        AudioFormat::Wav => args.extend(["-codec:a", "pcm_s16le"].map(String::from)),
    }

    args.push("-y".into());
    args.push(output_path.into());
    args
}

/// Encoder that shells out to an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub program: PathBuf,
    /// Where scratch directories are created (system temp dir when `None`).
    pub temp_root: Option<PathBuf>,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        FfmpegEncoder::new("ffmpeg")
    }
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        FfmpegEncoder {
            program: program.into(),
            temp_root: None,
        }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, EncodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ring_generator-");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn run(&self, args: &[String]) -> Result<(), EncodeError> {
        debug!("{} {}", self.program_name(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EncodeError::Launch {
                program: self.program_name(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EncodeError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn encode_in(
        &self,
        dir: &Path,
        canonical_wav: &[u8],
        format: AudioFormat,
        bitrate: u32,
    ) -> Result<Vec<u8>, EncodeError> {
        let input = dir.join("input.wav");
        let output = dir.join(format!("output.{}", format.extension()));
        fs::write(&input, canonical_wav)?;

        let args = build_encoder_args(
            &input.to_string_lossy(),
            &output.to_string_lossy(),
            format,
            bitrate,
        );
        self.run(&args)?;

        let bytes = fs::read(&output)?;
        if bytes.is_empty() {
            return Err(EncodeError::EmptyOutput);
        }
        Ok(bytes)
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&self, canonical_wav: &[u8], settings: &ExportSettings) -> Result<EncodedBlob, EncodeError> {
        let format = parse_format(settings)?;
        let dir = self.scratch_dir()?;
        let scratch = dir.path().to_path_buf();

        let result = self.encode_in(&scratch, canonical_wav, format, settings.bitrate);

        if let Err(e) = dir.close() {
            warn!("Could not remove scratch dir '{}': {}", scratch.display(), e);
        }

        result.map(|bytes| EncodedBlob { format, bytes })
    }

    fn check_available(&self) -> Result<(), EncodeError> {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| EncodeError::Launch {
                program: self.program_name(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(EncodeError::Failed {
                status: status.code().unwrap_or(-1),
                stderr: format!("'{} -version' failed", self.program_name()),
            })
        }
    }
}

// ── In-process WAV ───────────────────────────────────────────────────────────

/// In-process encoder producing 16-bit PCM WAV. Any other format is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl Encoder for WavEncoder {
    fn encode(&self, canonical_wav: &[u8], settings: &ExportSettings) -> Result<EncodedBlob, EncodeError> {
        let format = parse_format(settings)?;
        if format != AudioFormat::Wav {
            return Err(EncodeError::UnsupportedFormat(format.to_string()));
        }

        let pcm = read_wav_samples(canonical_wav)?;
        let spec = hound::WavSpec {
            channels: pcm.channels.max(1),
            sample_rate: pcm.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::with_capacity(44 + pcm.samples.len() * 2);
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
            for &s in &pcm.samples {
                writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0).round() as i16)?;
            }
            writer.finalize()?;
        }
        Ok(EncodedBlob { format, bytes })
    }
}
