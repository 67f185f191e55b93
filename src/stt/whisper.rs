//! In-process Whisper backend using whisper-rs.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature to be enabled and cmake to be installed:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::error::{AsrError, Result};
use crate::stt::model::{
    AsrModel, Capabilities, ChunkRequest, ChunkTranscription, ModelDescriptor, Task, WordTiming,
    language_hint,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Registry identifier of the local backend.
pub const LOCAL_WHISPER_ID: &str = "whisper_local";

/// Settings for [`LocalWhisperModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperSettings {
    /// Path to a ggml model file.
    pub model_path: PathBuf,
    /// Number of threads for inference (None = whisper.cpp default)
    pub threads: Option<usize>,
}

/// Whisper backend running on this machine.
///
/// The WhisperContext is wrapped in a Mutex, so chunks are decoded one at a
/// time and the descriptor reports `concurrent = false`.
pub struct LocalWhisperModel {
    context: Arc<Mutex<WhisperContext>>,
    settings: WhisperSettings,
    descriptor: ModelDescriptor,
}

impl std::fmt::Debug for LocalWhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWhisperModel")
            .field("settings", &self.settings)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl LocalWhisperModel {
    /// Load a model file.
    ///
    /// # Errors
    /// `Config` if the file is missing or whisper.cpp cannot load it.
    pub fn new(settings: WhisperSettings) -> Result<Self> {
        // Suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !settings.model_path.exists() {
            return Err(AsrError::Config {
                message: format!(
                    "Whisper model not found: {}",
                    settings.model_path.display()
                ),
            });
        }

        let stem = settings
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let path = settings.model_path.to_str().ok_or_else(|| AsrError::Config {
            message: "Invalid UTF-8 in model path".to_string(),
        })?;
        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(path, context_params).map_err(|e| {
            AsrError::Config {
                message: format!("Failed to load Whisper model: {e}"),
            }
        })?;

        let english_only = stem.ends_with(".en") || stem.ends_with("-en");
        let languages: Vec<String> = if english_only {
            vec!["en".to_string()]
        } else {
            (0..=whisper_rs::get_lang_max_id())
                .filter_map(whisper_rs::get_lang_str)
                .map(str::to_string)
                .collect()
        };

        let descriptor = ModelDescriptor::new(LOCAL_WHISPER_ID, format!("Whisper ({stem})"))
            .with_version(stem)
            .with_languages(languages)
            .with_capabilities(Capabilities {
                translate: !english_only,
                strict_languages: false,
                word_timestamps: true,
                concurrent: false,
            })
            .with_location(settings.model_path.display().to_string());

        tracing::info!(model = %settings.model_path.display(), "Loaded Whisper model");

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            settings,
            descriptor,
        })
    }

    pub fn settings(&self) -> &WhisperSettings {
        &self.settings
    }
}

/// Whisper expects f32 samples normalized to [-1.0, 1.0].
fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Owned copy of what one inference call needs, so it can cross into
/// the blocking pool.
struct Job {
    audio: Vec<f32>,
    task: Task,
    language: Option<String>,
    num_beams: u32,
    temperature: f32,
    prompt: Option<String>,
    threads: Option<usize>,
}

fn run_inference(context: &Mutex<WhisperContext>, job: Job) -> Result<ChunkTranscription> {
    let context = context
        .lock()
        .map_err(|e| AsrError::backend(format!("Failed to acquire context lock: {e}")))?;
    let mut state = context
        .create_state()
        .map_err(|e| AsrError::backend(format!("Failed to create Whisper state: {e}")))?;

    let strategy = if job.num_beams > 1 {
        SamplingStrategy::BeamSearch {
            beam_size: job.num_beams as i32,
            patience: -1.0,
        }
    } else {
        SamplingStrategy::Greedy { best_of: 1 }
    };
    let mut params = FullParams::new(strategy);
    params.set_language(job.language.as_deref());
    params.set_translate(job.task == Task::Translate);
    params.set_temperature(job.temperature);
    if let Some(prompt) = job.prompt.as_deref() {
        params.set_initial_prompt(prompt);
    }
    if let Some(threads) = job.threads {
        params.set_n_threads(threads as i32);
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_token_timestamps(true);

    state
        .full(params, &job.audio)
        .map_err(|e| AsrError::backend(format!("Whisper inference failed: {e}")))?;

    let mut text = String::new();
    let mut words = Vec::new();
    let mut confidence_sum = 0.0_f32;
    let mut segment_count = 0u32;
    for segment in state.as_iter() {
        text.push_str(&segment.to_string());
        let tokens = (0..segment.n_tokens()).filter_map(|i| {
            let token = segment.get_token(i)?;
            let piece = token.to_str_lossy().ok()?.into_owned();
            let data = token.token_data();
            Some((piece, data.t0, data.t1))
        });
        words.extend(words_from_tokens(tokens));
        confidence_sum += 1.0 - segment.no_speech_probability();
        segment_count += 1;
    }

    let confidence = if segment_count > 0 {
        (confidence_sum / segment_count as f32).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let transcription = ChunkTranscription::text(text.trim()).with_confidence(confidence);
    Ok(if words.is_empty() {
        transcription
    } else {
        transcription.with_words(words)
    })
}

/// Group token pieces `(text, t0, t1)` into words.
///
/// A piece with leading whitespace starts a new word; special tokens such as
/// `[_BEG_]` or `<|en|>` are skipped. Times are in centiseconds.
fn words_from_tokens(tokens: impl IntoIterator<Item = (String, i64, i64)>) -> Vec<WordTiming> {
    let mut words: Vec<WordTiming> = Vec::new();
    let mut open = false;
    for (piece, t0, t1) in tokens {
        if piece.starts_with("[_") || piece.starts_with("<|") {
            continue;
        }
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            open = false;
            continue;
        }
        let start = t0 as f64 / 100.0;
        let end = t1 as f64 / 100.0;
        match words.last_mut() {
            Some(word) if open && !piece.starts_with(char::is_whitespace) => {
                word.word.push_str(trimmed);
                word.end = end.max(word.end);
            }
            _ => words.push(WordTiming {
                word: trimmed.to_string(),
                start,
                end,
            }),
        }
        open = !piece.ends_with(char::is_whitespace);
    }
    words
}

#[async_trait]
impl AsrModel for LocalWhisperModel {
    async fn transcribe(&self, request: ChunkRequest<'_>) -> Result<ChunkTranscription> {
        self.descriptor
            .check_request(request.task, request.language)?;
        request.params.validate()?;

        let job = Job {
            audio: convert_audio(request.audio),
            task: request.task,
            language: language_hint(request.language).map(str::to_string),
            num_beams: request.params.num_beams,
            temperature: request.params.temperature,
            prompt: request.params.prompt.clone().filter(|p| !p.is_empty()),
            threads: self.settings.threads,
        };
        let context = Arc::clone(&self.context);

        tracing::debug!(chunk = request.index, samples = request.audio.len(), "Running Whisper");
        tokio::task::spawn_blocking(move || run_inference(&context, job))
            .await
            .map_err(|e| AsrError::backend(format!("Whisper task panicked: {e}")))?
    }

    fn describe(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    async fn health_check(&self) -> bool {
        self.context.lock().is_ok()
    }
}
