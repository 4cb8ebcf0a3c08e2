//! Source decoding into float PCM at the mix rate.

use crate::error::DecodeError;
use crate::mixer::PcmBuffer;
use rodio::source::UniformSourceIterator;
use rodio::Source;
use std::io::Cursor;

/// Turns encoded source bytes into float PCM at a fixed sample rate.
///
/// Implementations must be safe to share between record workers.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PcmBuffer, DecodeError>;
}

/// Decoder backed by rodio (wav, mp3, ogg/vorbis, flac).
///
/// Output keeps the source's channel layout and is resampled to
/// `target_rate` when the file uses another rate.
#[derive(Debug, Clone, Copy)]
pub struct RodioDecoder {
    pub target_rate: u32,
}

impl RodioDecoder {
    pub fn new(target_rate: u32) -> Self {
        RodioDecoder { target_rate }
    }
}

impl Decoder for RodioDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PcmBuffer, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let channels = source.channels().max(1);
        let rate = source.sample_rate();

        let samples: Vec<f32> = if rate == self.target_rate {
            source.convert_samples::<f32>().collect()
        } else {
            log::debug!("Resampling source from {} Hz to {} Hz", rate, self.target_rate);
            UniformSourceIterator::<_, f32>::new(source, channels, self.target_rate).collect()
        };

        if samples.is_empty() {
            return Err(DecodeError::NoSamples);
        }

        Ok(PcmBuffer {
            sample_rate: self.target_rate,
            channels,
            samples,
        })
    }
}
