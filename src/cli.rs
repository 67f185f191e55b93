//! Command-line interface for masr
//!
//! Provides argument parsing using clap derive macros.

use crate::pipeline::TranscriptionRequest;
use crate::stt::model::{DecodingParams, Task};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Speech-to-text over pluggable ASR backends
#[derive(Parser, Debug)]
#[command(name = "masr", version, about = "Speech-to-text over pluggable ASR backends")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v: debug, -vv: trace). MASR_LOG overrides this
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe an audio file (WAV, MP3, FLAC, OGG, M4A)
    Transcribe {
        /// Audio file to transcribe
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        decode: DecodeArgs,
    },

    /// Record from the microphone, then transcribe
    #[cfg(feature = "cpal-audio")]
    Record {
        /// Recording length in seconds
        #[arg(long, value_name = "SECONDS", default_value_t = crate::defaults::RECORD_SECS)]
        seconds: f64,

        /// Capture rate to request from the device (default: device native rate)
        #[arg(long, value_name = "HZ")]
        sample_rate: Option<u32>,

        /// Audio input device (default: system default)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        #[command(flatten)]
        decode: DecodeArgs,
    },

    /// List registered models
    Models,

    /// Probe backend liveness
    Health {
        /// Only probe this model (default: all)
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// List available audio input devices
    #[cfg(feature = "cpal-audio")]
    Devices,
}

/// Options shared by every command that runs a transcription
#[derive(Args, Debug, Clone, PartialEq)]
pub struct DecodeArgs {
    /// Model identifier (default: configured default model)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// transcribe or translate
    #[arg(long, value_name = "TASK", default_value = "transcribe", value_parser = parse_task)]
    pub task: Task,

    /// Language hint (default: auto-detect). Examples: auto, en, vi, vie_Latn
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Beam count (1 = greedy)
    #[arg(long, value_name = "N", default_value_t = crate::defaults::NUM_BEAMS)]
    pub beams: u32,

    /// Sampling temperature
    #[arg(long, value_name = "T", default_value_t = crate::defaults::TEMPERATURE)]
    pub temperature: f32,

    /// Initial prompt to bias vocabulary
    #[arg(long, value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Chunk duration in seconds (default: from config)
    #[arg(long, value_name = "SECONDS")]
    pub chunk_secs: Option<f64>,

    /// Overlap between chunks in seconds (default: from config)
    #[arg(long, value_name = "SECONDS")]
    pub overlap_secs: Option<f64>,

    /// Chunks transcribed in parallel (capped by config)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Per-chunk timeout. Examples: 90, 30s, 2m
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Keep going when chunks fail and report them as missing
    #[arg(long)]
    pub partial: bool,

    /// Print the full transcript as JSON
    #[arg(long)]
    pub json: bool,
}

impl DecodeArgs {
    pub fn to_request(&self) -> TranscriptionRequest {
        TranscriptionRequest {
            model: self.model.clone(),
            task: self.task,
            language: self.language.clone(),
            params: DecodingParams {
                num_beams: self.beams,
                temperature: self.temperature,
                prompt: self.prompt.clone(),
            },
            chunk_secs: self.chunk_secs,
            overlap_secs: self.overlap_secs,
            partial_results: self.partial,
            max_concurrency: self.concurrency,
            chunk_timeout: self.timeout,
        }
    }
}

fn parse_task(s: &str) -> Result<Task, String> {
    s.parse::<Task>().map_err(|e| e.to_string())
}

/// Parse a timeout string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`), and compound (`1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("timeout must be longer than zero".to_string());
    }
    Ok(duration)
}
