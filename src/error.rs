//! Error types for modular-asr.

use std::fmt;
use thiserror::Error;

/// Why an audio input was rejected by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidInputKind {
    /// Zero-length input, or a container that decoded to no samples.
    Empty,
    /// Bytes that could not be parsed as audio at all.
    Malformed,
    /// Recognised container whose codec we cannot decode.
    UnsupportedCodec,
    /// Sample rate outside the supported range.
    UnsupportedSampleRate,
}

impl fmt::Display for InvalidInputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvalidInputKind::Empty => "empty input",
            InvalidInputKind::Malformed => "malformed audio",
            InvalidInputKind::UnsupportedCodec => "unsupported codec",
            InvalidInputKind::UnsupportedSampleRate => "unsupported sample rate",
        };
        f.write_str(s)
    }
}

/// Fieldless classification of [`AsrError`], for callers that map errors
/// onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InvalidParameter,
    UnknownModel,
    BackendUnavailable,
    UnsupportedLanguage,
    PartialTranscription,
    Cancelled,
    Config,
    AudioCapture,
    Io,
}

#[derive(Error, Debug)]
pub enum AsrError {
    // Request errors
    #[error("Invalid audio input ({kind}): {message}")]
    InvalidInput {
        kind: InvalidInputKind,
        message: String,
    },

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Unknown model '{id}'. Available models: {}", available.join(", "))]
    UnknownModel { id: String, available: Vec<String> },

    #[error("Language '{language}' is not supported by model {model}")]
    UnsupportedLanguage { language: String, model: String },

    // Backend errors
    #[error("{}", backend_unavailable_message(*chunk, message))]
    BackendUnavailable {
        chunk: Option<usize>,
        message: String,
    },

    #[error("Partial transcription: {} of {total} chunks failed (missing: {missing:?})", missing.len())]
    PartialTranscription { missing: Vec<usize>, total: usize },

    #[error("Transcription request cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn backend_unavailable_message(chunk: Option<usize>, message: &str) -> String {
    match chunk {
        Some(index) => format!("Backend unavailable (chunk {index}): {message}"),
        None => format!("Backend unavailable: {message}"),
    }
}

impl AsrError {
    pub fn invalid_input(kind: InvalidInputKind, message: impl Into<String>) -> Self {
        AsrError::InvalidInput {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        AsrError::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        AsrError::BackendUnavailable {
            chunk: None,
            message: message.into(),
        }
    }

    /// Attach the originating chunk index to a dispatch failure.
    ///
    /// Only backend failures carry an index; other kinds describe the whole
    /// request and pass through unchanged.
    pub fn at_chunk(self, index: usize) -> Self {
        match self {
            AsrError::BackendUnavailable { message, .. } => AsrError::BackendUnavailable {
                chunk: Some(index),
                message,
            },
            other => other,
        }
    }

    /// Chunk index that caused this error, if any.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            AsrError::BackendUnavailable { chunk, .. } => *chunk,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AsrError::InvalidInput { .. } => ErrorKind::InvalidInput,
            AsrError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            AsrError::UnknownModel { .. } => ErrorKind::UnknownModel,
            AsrError::UnsupportedLanguage { .. } => ErrorKind::UnsupportedLanguage,
            AsrError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            AsrError::PartialTranscription { .. } => ErrorKind::PartialTranscription,
            AsrError::Cancelled => ErrorKind::Cancelled,
            AsrError::Config { .. } | AsrError::ConfigParse(_) => ErrorKind::Config,
            AsrError::AudioDeviceNotFound { .. } | AsrError::AudioCapture { .. } => {
                ErrorKind::AudioCapture
            }
            AsrError::Io(_) => ErrorKind::Io,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AsrError>;
