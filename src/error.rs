//! Error types for the render/export core.

use thiserror::Error;

/// Fatal export failures. Anything returned here aborts the whole export call;
/// per-record problems are reported through `ExportReport` instead.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No sources: add at least one audio source")]
    NoSources,

    #[error("No arrangements: schedule at least one announcement")]
    NoArrangements,

    #[error("No time records: create at least one record window")]
    NoRecords,

    #[error("Record '{0}' not found")]
    UnknownRecord(String),

    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(#[source] EncodeError),

    #[error("Export cancelled")]
    Cancelled,
}

/// One record could not be exported. Its siblings are unaffected.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("blocked by validation: {}", .0.join("; "))]
    Blocked(Vec<String>),

    #[error("record has no announcements")]
    Empty,

    #[error("mixing failed: {0}")]
    Mix(#[from] MixError),

    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("record worker panicked")]
    Panicked,
}

/// A source could not be turned into PCM.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("no audio data supplied")]
    Missing,

    #[error("source file is empty")]
    Empty,

    #[error("unsupported or corrupt audio: {0}")]
    Unsupported(String),

    #[error("decoded audio has no samples")]
    NoSamples,

    #[error("decoder returned {actual} Hz, expected {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },
}

/// The encoder could not produce the target container.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("encoder produced no output")]
    EmptyOutput,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// Rendering a record failed before any segment was mixed.
#[derive(Error, Debug, PartialEq)]
pub enum MixError {
    #[error("record window is empty or inverted ({0:.3}s)")]
    InvalidWindow(f64),

    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("record needs {samples} samples, more than the mixer can hold")]
    BufferTooLarge { samples: u64 },
}

/// Loading or saving a project file failed.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("cannot access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("project file is corrupt or not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid project structure: {0}")]
    InvalidStructure(String),
}

/// Saving the configuration file failed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration directory available on this system")]
    NoConfigDir,

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
}
