//! The capability contract every transcription backend implements.
//!
//! A backend is anything that can turn one canonical PCM chunk into text:
//! a remote HTTP service, an in-process whisper.cpp context, or a test mock.
//! Adding a backend means implementing [`AsrModel`]'s four methods and
//! registering a constructor with the
//! [`ModelRegistry`](crate::stt::registry::ModelRegistry).

use crate::defaults;
use crate::error::{AsrError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What the backend should produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Text in the spoken language.
    #[default]
    Transcribe,
    /// English text regardless of the spoken language.
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(AsrError::invalid_parameter(
                "task",
                format!("expected 'transcribe' or 'translate', got '{other}'"),
            )),
        }
    }
}

/// Decoder knobs forwarded to the backend on every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingParams {
    /// Beam count; 1 means greedy decoding.
    pub num_beams: u32,
    pub temperature: f32,
    /// Initial prompt to bias vocabulary.
    pub prompt: Option<String>,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            num_beams: defaults::NUM_BEAMS,
            temperature: defaults::TEMPERATURE,
            prompt: None,
        }
    }
}

impl DecodingParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_beams < 1 {
            return Err(AsrError::invalid_parameter(
                "num_beams",
                "must be at least 1",
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(AsrError::invalid_parameter(
                "temperature",
                format!("must be a finite value >= 0, got {}", self.temperature),
            ));
        }
        Ok(())
    }
}

/// Feature flags a backend advertises through its descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports [`Task::Translate`].
    pub translate: bool,
    /// Rejects language hints outside [`ModelDescriptor::languages`].
    pub strict_languages: bool,
    /// May return per-word timings.
    pub word_timestamps: bool,
    /// Safe to call from several tasks at once.
    pub concurrent: bool,
}

/// Identity and capabilities of a backend. Read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub languages: BTreeSet<String>,
    pub capabilities: Capabilities,
    /// Where inference happens, e.g. an HTTP endpoint or a model file path.
    pub location: Option<String>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            version: "1".to_string(),
            languages: BTreeSet::new(),
            capabilities: Capabilities::default(),
            location: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Check task and language against this backend before any work is done.
    ///
    /// `None` and `"auto"` are never rejected.
    pub fn check_request(&self, task: Task, language: Option<&str>) -> Result<()> {
        if task == Task::Translate && !self.capabilities.translate {
            return Err(AsrError::invalid_parameter(
                "task",
                format!("{} only supports transcription", self.id),
            ));
        }
        if let Some(lang) = language_hint(language)
            && self.capabilities.strict_languages
            && !self.languages.contains(lang)
        {
            return Err(AsrError::UnsupportedLanguage {
                language: lang.to_string(),
                model: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Normalise a language hint: blank and `"auto"` mean "detect".
pub fn language_hint(language: Option<&str>) -> Option<&str> {
    language
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case(defaults::AUTO_LANGUAGE))
}

/// One word with timings relative to the start of its chunk, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A single chunk handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    /// Position of the chunk in the request, for logging and diagnostics.
    pub index: usize,
    /// Mono 16-bit PCM at `sample_rate`.
    pub audio: &'a [i16],
    pub sample_rate: u32,
    pub task: Task,
    pub language: Option<&'a str>,
    pub params: &'a DecodingParams,
}

impl ChunkRequest<'_> {
    pub fn duration_secs(&self) -> f64 {
        self.audio.len() as f64 / self.sample_rate as f64
    }
}

/// What a backend returns for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTranscription {
    pub text: String,
    pub words: Option<Vec<WordTiming>>,
    pub confidence: Option<f32>,
}

impl ChunkTranscription {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            words: None,
            confidence: None,
        }
    }

    pub fn with_words(mut self, words: Vec<WordTiming>) -> Self {
        self.words = Some(words);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Speech-to-text backend.
///
/// Implementations must be `Send + Sync`; backends that cannot serve
/// concurrent calls report `capabilities.concurrent = false` and the
/// pipeline dispatches their chunks one at a time.
#[async_trait]
pub trait AsrModel: Send + Sync {
    /// Transcribe one canonical PCM chunk.
    ///
    /// # Errors
    /// `UnsupportedLanguage` for a hint outside a strict model's set,
    /// `InvalidParameter` for out-of-range decoding parameters or an
    /// unsupported task, `BackendUnavailable` when the engine cannot be
    /// reached or fails.
    async fn transcribe(&self, request: ChunkRequest<'_>) -> Result<ChunkTranscription>;

    /// Language codes this backend understands.
    fn list_languages(&self) -> BTreeSet<String> {
        self.describe().languages
    }

    fn describe(&self) -> ModelDescriptor;

    /// Side-effect-free liveness probe.
    async fn health_check(&self) -> bool;
}

/// Implement AsrModel for Arc<T> to allow sharing across requests.
#[async_trait]
impl<T: AsrModel + ?Sized> AsrModel for Arc<T> {
    async fn transcribe(&self, request: ChunkRequest<'_>) -> Result<ChunkTranscription> {
        (**self).transcribe(request).await
    }

    fn list_languages(&self) -> BTreeSet<String> {
        (**self).list_languages()
    }

    fn describe(&self) -> ModelDescriptor {
        (**self).describe()
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }
}
