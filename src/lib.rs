//! modular-asr - swappable speech-to-text backends
//!
//! One audio normalisation and chunking pipeline in front of any number of
//! ASR engines, local or remote.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod stt;

// Core trait (backend seam)
pub use stt::model::AsrModel;

// Audio normalisation
pub use audio::{AudioBuffer, AudioCodec, AudioInput, CaptureBuffer};

// Pipeline
pub use pipeline::{
    Chunker, Execution, PipelineState, Transcript, TranscriptionPipeline, TranscriptionRequest,
};
pub use stt::registry::ModelRegistry;

// Error handling
pub use error::{AsrError, Result};

// Config
pub use config::Config;

/// Crate version, with the git commit appended as build metadata when
/// `build.rs` could read one (`0.1.0+abc1234`).
pub fn version_string() -> String {
    with_build_metadata(env!("CARGO_PKG_VERSION"), option_env!("GIT_HASH"))
}

fn with_build_metadata(version: &str, commit: Option<&str>) -> String {
    match commit.map(str::trim) {
        Some(commit) if !commit.is_empty() => format!("{version}+{commit}"),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_metadata_is_appended_only_for_a_known_commit() {
        assert_eq!(with_build_metadata("0.1.0", Some("1a2b3c4")), "0.1.0+1a2b3c4");
        assert_eq!(with_build_metadata("0.1.0", Some(" \n")), "0.1.0");
        assert_eq!(with_build_metadata("0.1.0", None), "0.1.0");
    }

    #[test]
    fn version_string_reports_this_build() {
        let version = version_string();
        let (release, commit) = match version.split_once('+') {
            Some((release, commit)) => (release, Some(commit)),
            None => (version.as_str(), None),
        };
        assert_eq!(release, env!("CARGO_PKG_VERSION"));
        assert_eq!(commit, option_env!("GIT_HASH").filter(|h| !h.trim().is_empty()));
    }
}
