//! Canonical audio representation shared by every pipeline stage.

use crate::error::{AsrError, InvalidInputKind, Result};
use std::ops::Range;

/// Decoded mono 16-bit PCM at a fixed sample rate.
///
/// Constructed only through [`AudioBuffer::new`], which rejects empty sample
/// sets and a zero rate, so `duration_secs() > 0` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(AsrError::invalid_input(
                InvalidInputKind::Empty,
                "decoded audio contains no samples",
            ));
        }
        if sample_rate == 0 {
            return Err(AsrError::invalid_input(
                InvalidInputKind::UnsupportedSampleRate,
                "sample rate must be positive",
            ));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always 1: buffers are downmixed before construction.
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Never true for a constructed buffer; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Borrow a sample range, clamped to the buffer end.
    pub fn slice(&self, range: Range<usize>) -> &[i16] {
        let end = range.end.min(self.samples.len());
        let start = range.start.min(end);
        &self.samples[start..end]
    }

    /// Convert a sample offset to seconds at this buffer's rate.
    pub fn secs_at(&self, offset: usize) -> f64 {
        offset as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Raw interleaved PCM from a live capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    /// Interleaved samples, `channels` values per frame.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl CaptureBuffer {
    pub fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Everything the codec knows how to normalise.
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Encoded file bytes (WAV, MP3, FLAC, OGG, M4A, ...).
    Encoded {
        bytes: Vec<u8>,
        /// File extension or MIME type, e.g. `"mp3"` or `"audio/wav"`.
        format_hint: Option<String>,
    },
    /// Raw PCM captured from a device.
    Capture(CaptureBuffer),
}

impl AudioInput {
    pub fn encoded(bytes: Vec<u8>) -> Self {
        AudioInput::Encoded {
            bytes,
            format_hint: None,
        }
    }

    pub fn encoded_with_hint(bytes: Vec<u8>, hint: impl Into<String>) -> Self {
        AudioInput::Encoded {
            bytes,
            format_hint: Some(hint.into()),
        }
    }

    /// Size of the raw input, in bytes for encoded data and samples for captures.
    pub fn raw_len(&self) -> usize {
        match self {
            AudioInput::Encoded { bytes, .. } => bytes.len(),
            AudioInput::Capture(capture) => capture.samples.len(),
        }
    }
}

impl From<CaptureBuffer> for AudioInput {
    fn from(capture: CaptureBuffer) -> Self {
        AudioInput::Capture(capture)
    }
}
