//! Per-request transcription state machine.
//!
//! ```text
//! Decoding ──▶ Chunking ──▶ Dispatching ──▶ Merging ──▶ Complete
//!     └───────────┴─────────────┴──────────────┴──────▶ Failed
//! ```
//!
//! Chunks are dispatched in index order onto a `JoinSet`, bounded by a
//! semaphore, each under its own timeout. Results are merged by index no
//! matter which chunk finished first.

use crate::audio::{AudioBuffer, AudioCodec, AudioInput};
use crate::config::PipelineSettings;
use crate::error::{AsrError, InvalidInputKind, Result};
use crate::pipeline::chunker::{ChunkPlan, Chunker};
use crate::pipeline::merge::merge;
use crate::pipeline::types::{
    ChunkDiagnostics, ChunkResult, ChunkStatus, Execution, PipelineState, Transcript,
    TranscriptionRequest,
};
use crate::stt::model::{AsrModel, ChunkRequest, ChunkTranscription};
use crate::stt::registry::ModelRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Runs requests against a shared, read-only [`ModelRegistry`].
///
/// Cheap to share: clone the `Arc` around it, or hold it in server state.
#[derive(Debug)]
pub struct TranscriptionPipeline {
    registry: Arc<ModelRegistry>,
    codec: AudioCodec,
    settings: PipelineSettings,
}

/// Records every state a request enters.
struct Tracker {
    transitions: Vec<PipelineState>,
}

impl Tracker {
    fn enter(&mut self, state: PipelineState) {
        tracing::debug!(state = %state, "Pipeline state");
        self.transitions.push(state);
    }

    fn fail(mut self, error: AsrError) -> Execution {
        let from = self.transitions.last().copied();
        tracing::warn!(error = %error, from = ?from, "Transcription failed");
        self.transitions.push(PipelineState::Failed);
        Execution {
            transitions: self.transitions,
            outcome: Err(error),
        }
    }

    fn complete(mut self, transcript: Transcript) -> Execution {
        self.transitions.push(PipelineState::Complete);
        Execution {
            transitions: self.transitions,
            outcome: Ok(transcript),
        }
    }
}

/// What a finished chunk task hands back.
struct ChunkOutcome {
    index: usize,
    elapsed: Duration,
    result: Result<ChunkTranscription>,
}

impl TranscriptionPipeline {
    pub fn new(registry: Arc<ModelRegistry>, settings: PipelineSettings) -> Self {
        Self {
            registry,
            codec: AudioCodec::new(),
            settings,
        }
    }

    pub fn with_codec(mut self, codec: AudioCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run a request to completion and return its transcript.
    pub async fn transcribe(
        &self,
        input: AudioInput,
        request: &TranscriptionRequest,
    ) -> Result<Transcript> {
        self.execute(input, request, CancellationToken::new())
            .await
            .into_result()
    }

    /// Run a request, recording its state transitions.
    ///
    /// Cancelling `cancel` stops the request at the next suspension point,
    /// aborts outstanding chunk calls and yields [`AsrError::Cancelled`].
    pub async fn execute(
        &self,
        input: AudioInput,
        request: &TranscriptionRequest,
        cancel: CancellationToken,
    ) -> Execution {
        let model_id = request
            .model
            .clone()
            .unwrap_or_else(|| self.registry.default_id().to_string());
        let span = tracing::info_span!("transcription", model = %model_id, task = %request.task);
        self.run(input, request, cancel).instrument(span).await
    }

    async fn run(
        &self,
        input: AudioInput,
        request: &TranscriptionRequest,
        cancel: CancellationToken,
    ) -> Execution {
        let started = Instant::now();
        let mut tracker = Tracker {
            transitions: Vec::new(),
        };

        tracker.enter(PipelineState::Decoding);
        let audio = match self.decode(input, &cancel).await {
            Ok(audio) => Arc::new(audio),
            Err(e) => return tracker.fail(e),
        };
        tracing::debug!(
            samples = audio.len(),
            duration_secs = audio.duration_secs(),
            "Decoded audio"
        );

        tracker.enter(PipelineState::Chunking);
        if cancel.is_cancelled() {
            return tracker.fail(AsrError::Cancelled);
        }
        let plan = match self.plan(&audio, request) {
            Ok(plan) => plan,
            Err(e) => return tracker.fail(e),
        };

        tracker.enter(PipelineState::Dispatching);
        if cancel.is_cancelled() {
            return tracker.fail(AsrError::Cancelled);
        }
        let model = match self.registry.resolve(request.model.as_deref()) {
            Ok(model) => model,
            Err(e) => return tracker.fail(e),
        };
        let descriptor = model.describe();
        if let Err(e) = descriptor.check_request(request.task, request.language.as_deref()) {
            return tracker.fail(e);
        }

        let mut concurrency = self
            .settings
            .max_concurrent_chunks
            .min(request.max_concurrency.unwrap_or(usize::MAX))
            .max(1);
        if !descriptor.capabilities.concurrent {
            concurrency = 1;
        }
        let timeout = request
            .chunk_timeout
            .unwrap_or_else(|| self.settings.chunk_timeout());

        let (results, diagnostics, missing) = match self
            .dispatch(model, &audio, &plan, request, concurrency, timeout, &cancel)
            .await
        {
            Ok(collected) => collected,
            Err(e) => return tracker.fail(e),
        };

        if !missing.is_empty() && results.is_empty() {
            return tracker.fail(AsrError::PartialTranscription {
                missing,
                total: plan.len(),
            });
        }

        tracker.enter(PipelineState::Merging);
        let merged = merge(&results);

        tracing::info!(
            chunks = plan.len(),
            missing = missing.len(),
            duration_secs = audio.duration_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription complete"
        );

        tracker.complete(Transcript {
            text: merged.text,
            model: descriptor.id,
            task: request.task,
            language: request.language.clone(),
            duration_secs: audio.duration_secs(),
            chunks: results,
            diagnostics,
            missing_chunks: missing,
            overlap_trimming: merged.trimming,
        })
    }

    async fn decode(&self, input: AudioInput, cancel: &CancellationToken) -> Result<AudioBuffer> {
        let codec = self.codec;
        let decoding = tokio::task::spawn_blocking(move || codec.decode(&input));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AsrError::Cancelled),
            joined = decoding => joined.map_err(|e| {
                AsrError::invalid_input(
                    InvalidInputKind::Malformed,
                    format!("decoder task failed: {e}"),
                )
            })?,
        }
    }

    fn plan(&self, audio: &AudioBuffer, request: &TranscriptionRequest) -> Result<ChunkPlan> {
        request.validate()?;
        let chunk_secs = request.chunk_secs.unwrap_or(self.settings.chunk_secs);
        let overlap_secs = request.overlap_secs.unwrap_or(self.settings.overlap_secs);
        let plan = Chunker::new(chunk_secs, overlap_secs)?.split(audio)?;
        tracing::debug!(
            chunks = plan.len(),
            chunk_secs,
            overlap_secs,
            "Planned chunks"
        );
        Ok(plan)
    }

    /// Transcribe every chunk of `plan`.
    ///
    /// Returns results and diagnostics in index order, plus the indices that
    /// failed when partial results are enabled.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        model: Arc<dyn AsrModel>,
        audio: &Arc<AudioBuffer>,
        plan: &ChunkPlan,
        request: &TranscriptionRequest,
        concurrency: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ChunkResult>, Vec<ChunkDiagnostics>, Vec<usize>)> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        tracing::debug!(chunks = plan.len(), concurrency, "Dispatching chunks");
        for chunk in plan {
            let model = Arc::clone(&model);
            let audio = Arc::clone(audio);
            let semaphore = Arc::clone(&semaphore);
            let task = request.task;
            let language = request.language.clone();
            let params = request.params.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return ChunkOutcome {
                            index: chunk.index,
                            elapsed: Duration::ZERO,
                            result: Err(AsrError::backend(format!("dispatch closed: {e}"))),
                        };
                    }
                };
                let started = Instant::now();
                let chunk_request = ChunkRequest {
                    index: chunk.index,
                    audio: audio.slice(chunk.range()),
                    sample_rate: audio.sample_rate(),
                    task,
                    language: language.as_deref(),
                    params: &params,
                };
                tracing::debug!(
                    chunk = chunk.index,
                    samples = chunk.len(),
                    "Transcribing chunk"
                );
                let result = match tokio::time::timeout(timeout, model.transcribe(chunk_request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AsrError::backend(format!(
                        "timed out after {:.1}s",
                        timeout.as_secs_f64()
                    ))),
                };
                ChunkOutcome {
                    index: chunk.index,
                    elapsed: started.elapsed(),
                    result: result.map_err(|e| e.at_chunk(chunk.index)),
                }
            });
        }

        let mut results = Vec::with_capacity(plan.len());
        let mut diagnostics = Vec::with_capacity(plan.len());
        let mut missing = Vec::new();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(AsrError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tasks.abort_all();
                    return Err(AsrError::backend(format!("chunk task failed: {e}")));
                }
            };

            let chunk = plan
                .iter()
                .nth(outcome.index)
                .ok_or_else(|| AsrError::backend(format!("unknown chunk {}", outcome.index)))?;
            let start_secs = plan.secs(chunk.start);
            let end_secs = plan.secs(chunk.end);

            match outcome.result {
                Ok(transcription) => {
                    diagnostics.push(ChunkDiagnostics {
                        index: chunk.index,
                        start_secs,
                        end_secs,
                        elapsed: outcome.elapsed,
                        status: ChunkStatus::Transcribed,
                    });
                    results.push(ChunkResult {
                        index: chunk.index,
                        text: transcription.text,
                        words: transcription.words,
                        confidence: transcription.confidence,
                        start_secs,
                        end_secs,
                        overlap_secs: plan.secs(chunk.overlap),
                    });
                }
                Err(error) if request.partial_results => {
                    tracing::warn!(chunk = chunk.index, error = %error, "Chunk failed, continuing");
                    diagnostics.push(ChunkDiagnostics {
                        index: chunk.index,
                        start_secs,
                        end_secs,
                        elapsed: outcome.elapsed,
                        status: ChunkStatus::Failed {
                            error: error.to_string(),
                        },
                    });
                    missing.push(chunk.index);
                }
                Err(error) => {
                    tasks.abort_all();
                    return Err(error);
                }
            }
        }

        results.sort_by_key(|r| r.index);
        diagnostics.sort_by_key(|d| d.index);
        missing.sort_unstable();
        Ok((results, diagnostics, missing))
    }
}
