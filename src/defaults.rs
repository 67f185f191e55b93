//! Default configuration constants for modular-asr.
//!
//! Shared by the config layer, the pipeline and the backends so the same
//! numbers never drift apart.

/// Canonical pipeline sample rate in Hz.
///
/// Every backend receives mono 16-bit PCM at this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Lowest source sample rate the codec accepts.
pub const MIN_SOURCE_SAMPLE_RATE: u32 = 8000;

/// Highest source sample rate the codec accepts.
pub const MAX_SOURCE_SAMPLE_RATE: u32 = 192_000;

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "whisper_jax";

/// Language value that asks the backend to detect the language itself.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default chunk duration in seconds.
pub const CHUNK_SECS: f64 = 30.0;

/// Default overlap between consecutive chunks in seconds.
pub const OVERLAP_SECS: f64 = 1.0;

/// Default beam count (1 = greedy decoding).
pub const NUM_BEAMS: u32 = 1;

/// Default sampling temperature.
pub const TEMPERATURE: f32 = 0.0;

/// Chunk transcriptions in flight per request.
pub const MAX_CONCURRENT_CHUNKS: usize = 2;

/// Per-chunk dispatch timeout in seconds.
pub const CHUNK_TIMEOUT_SECS: u64 = 120;

/// Timeout for backend liveness probes in seconds.
pub const HEALTH_TIMEOUT_SECS: u64 = 5;

/// Default live capture length in seconds.
pub const RECORD_SECS: f64 = 8.0;

pub const WHISPER_JAX_ENDPOINT: &str = "http://127.0.0.1:8008/transcribe";
pub const OMNI_LINGUAL_ENDPOINT: &str = "http://hanoi2.ucd.ie/asr";
pub const CHUNKFORMER_ENDPOINT: &str = "http://hanoi2.ucd.ie/asr_chunkformer";
pub const QWEN3_ENDPOINT: &str = "http://localhost:8005/asr";
