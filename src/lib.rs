//! ring_generator: renders scheduled announcement projects into one audio
//! file per time record.
//!
//! Schedules are validated, composed into ordered segments, mixed into a mono
//! float buffer and handed to a pluggable encoder. The CLI and any editor
//! front end consume this crate.

pub mod composition;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod export;
pub mod logging;
pub mod mixer;
pub mod model;
pub mod preflight;
pub mod project;
pub mod time;
pub mod timing;
pub mod validation;
