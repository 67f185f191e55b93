//! Data types for one transcription request.

use crate::error::{AsrError, Result};
use crate::stt::model::{DecodingParams, Task, WordTiming};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Everything a caller controls about one transcription.
///
/// `None` fields fall back to the pipeline's configured defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionRequest {
    /// Registry identifier; `None` resolves the default model.
    pub model: Option<String>,
    pub task: Task,
    /// Language hint; `None` or `"auto"` lets the backend detect it.
    pub language: Option<String>,
    pub params: DecodingParams,
    pub chunk_secs: Option<f64>,
    pub overlap_secs: Option<f64>,
    /// Tolerate failed chunks and report them as missing instead of failing.
    pub partial_results: bool,
    /// Lower the configured concurrency bound for this request.
    pub max_concurrency: Option<usize>,
    pub chunk_timeout: Option<Duration>,
}

impl TranscriptionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_params(mut self, params: DecodingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_chunking(mut self, chunk_secs: f64, overlap_secs: f64) -> Self {
        self.chunk_secs = Some(chunk_secs);
        self.overlap_secs = Some(overlap_secs);
        self
    }

    pub fn with_partial_results(mut self, enabled: bool) -> Self {
        self.partial_results = enabled;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    /// Checks that only need the request itself.
    pub(crate) fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.max_concurrency == Some(0) {
            return Err(AsrError::invalid_parameter(
                "max_concurrency",
                "must be at least 1",
            ));
        }
        if self.chunk_timeout == Some(Duration::ZERO) {
            return Err(AsrError::invalid_parameter(
                "chunk_timeout",
                "must be longer than zero",
            ));
        }
        Ok(())
    }
}

/// Request lifecycle. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Decoding,
    Chunking,
    Dispatching,
    Merging,
    Complete,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Decoding => "decoding",
            PipelineState::Chunking => "chunking",
            PipelineState::Dispatching => "dispatching",
            PipelineState::Merging => "merging",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Text produced for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResult {
    pub index: usize,
    pub text: String,
    /// Word timings relative to the chunk start, when the backend reports them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub start_secs: f64,
    pub end_secs: f64,
    /// Leading seconds shared with the previous chunk.
    pub overlap_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Transcribed,
    Failed { error: String },
}

/// Per-chunk timing, kept for successful and failed chunks alike.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkDiagnostics {
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(flatten)]
    pub status: ChunkStatus,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// How duplicated speech in chunk overlaps was handled during merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapTrimming {
    /// No chunk shares audio with a transcribed predecessor.
    NotNeeded,
    /// Every overlap was trimmed using word timings.
    Timestamps,
    /// At least one overlap had no word timings; words near that chunk
    /// boundary may appear twice.
    Untrimmed,
}

/// Final result of a request. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub text: String,
    /// Identifier of the model that produced the text.
    pub model: String,
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub duration_secs: f64,
    /// Chunk results in index order.
    pub chunks: Vec<ChunkResult>,
    pub diagnostics: Vec<ChunkDiagnostics>,
    /// Indices that failed in partial-result mode; always empty otherwise.
    pub missing_chunks: Vec<usize>,
    pub overlap_trimming: OverlapTrimming,
}

impl Transcript {
    pub fn is_complete(&self) -> bool {
        self.missing_chunks.is_empty()
    }
}

/// Outcome of [`TranscriptionPipeline::execute`](crate::pipeline::TranscriptionPipeline::execute)
/// together with every state the request passed through.
#[derive(Debug)]
pub struct Execution {
    pub transitions: Vec<PipelineState>,
    pub outcome: Result<Transcript>,
}

impl Execution {
    /// Last state reached; always terminal.
    pub fn final_state(&self) -> Option<PipelineState> {
        self.transitions.last().copied()
    }

    pub fn into_result(self) -> Result<Transcript> {
        self.outcome
    }
}
