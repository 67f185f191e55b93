use crate::defaults;
use crate::error::{AsrError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub endpoints: EndpointsConfig,
    pub pipeline: PipelineSettings,
}

/// Which backends exist and which one answers by default
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub default: String,
    /// ggml model file for the in-process Whisper backend.
    pub whisper_model_path: Option<PathBuf>,
    pub whisper_threads: Option<usize>,
}

/// Remote service addresses and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointsConfig {
    pub whisper_jax: String,
    pub omni_lingual: String,
    pub omni_lingual_api_key: Option<String>,
    pub chunkformer: String,
    pub chunkformer_api_key: Option<String>,
    pub qwen3: String,
    pub qwen3_api_key: Option<String>,
}

/// Chunking and dispatch defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_concurrent_chunks: usize,
    pub chunk_timeout_secs: u64,
    pub chunk_secs: f64,
    pub overlap_secs: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: defaults::DEFAULT_MODEL.to_string(),
            whisper_model_path: None,
            whisper_threads: None,
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            whisper_jax: defaults::WHISPER_JAX_ENDPOINT.to_string(),
            omni_lingual: defaults::OMNI_LINGUAL_ENDPOINT.to_string(),
            omni_lingual_api_key: None,
            chunkformer: defaults::CHUNKFORMER_ENDPOINT.to_string(),
            chunkformer_api_key: None,
            qwen3: defaults::QWEN3_ENDPOINT.to_string(),
            qwen3_api_key: None,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: defaults::MAX_CONCURRENT_CHUNKS,
            chunk_timeout_secs: defaults::CHUNK_TIMEOUT_SECS,
            chunk_secs: defaults::CHUNK_SECS,
            overlap_secs: defaults::OVERLAP_SECS,
        }
    }
}

impl PipelineSettings {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_chunks == 0 {
            return Err(AsrError::Config {
                message: "pipeline.max_concurrent_chunks must be at least 1".to_string(),
            });
        }
        if self.chunk_timeout_secs == 0 {
            return Err(AsrError::Config {
                message: "pipeline.chunk_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(AsrError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - ASR_DEFAULT_MODEL → models.default
    /// - ASR_WHISPER_MODEL_PATH → models.whisper_model_path
    /// - WHISPER_ENDPOINT → endpoints.whisper_jax
    /// - OMNILINGUAL_ENDPOINT / OMNILINGUAL_API_KEY → endpoints.omni_lingual{,_api_key}
    /// - CHUNKFORMER_ENDPOINT / CHUNKFORMER_API_KEY → endpoints.chunkformer{,_api_key}
    /// - QWEN3_ENDPOINT / QWEN3_API_KEY → endpoints.qwen3{,_api_key}
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(model) = env_value("ASR_DEFAULT_MODEL") {
            self.models.default = model;
        }
        if let Some(path) = env_value("ASR_WHISPER_MODEL_PATH") {
            self.models.whisper_model_path = Some(PathBuf::from(path));
        }

        let endpoints = &mut self.endpoints;
        if let Some(url) = env_value("WHISPER_ENDPOINT") {
            endpoints.whisper_jax = url;
        }
        if let Some(url) = env_value("OMNILINGUAL_ENDPOINT") {
            endpoints.omni_lingual = url;
        }
        if let Some(key) = env_value("OMNILINGUAL_API_KEY") {
            endpoints.omni_lingual_api_key = Some(key);
        }
        if let Some(url) = env_value("CHUNKFORMER_ENDPOINT") {
            endpoints.chunkformer = url;
        }
        if let Some(key) = env_value("CHUNKFORMER_API_KEY") {
            endpoints.chunkformer_api_key = Some(key);
        }
        if let Some(url) = env_value("QWEN3_ENDPOINT") {
            endpoints.qwen3 = url;
        }
        if let Some(key) = env_value("QWEN3_API_KEY") {
            endpoints.qwen3_api_key = Some(key);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/modular-asr/config.toml on Linux, or `None` when the
    /// platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("modular-asr").join("config.toml"))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "ASR_DEFAULT_MODEL",
        "ASR_WHISPER_MODEL_PATH",
        "WHISPER_ENDPOINT",
        "OMNILINGUAL_ENDPOINT",
        "OMNILINGUAL_API_KEY",
        "CHUNKFORMER_ENDPOINT",
        "CHUNKFORMER_API_KEY",
        "QWEN3_ENDPOINT",
        "QWEN3_API_KEY",
    ];

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_asr_env() {
        for key in ENV_KEYS {
            remove_env(key);
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.models.default, "whisper_jax");
        assert_eq!(config.models.whisper_model_path, None);

        assert_eq!(config.endpoints.whisper_jax, "http://127.0.0.1:8008/transcribe");
        assert_eq!(config.endpoints.qwen3, "http://localhost:8005/asr");
        assert_eq!(config.endpoints.omni_lingual_api_key, None);

        assert_eq!(config.pipeline.max_concurrent_chunks, 2);
        assert_eq!(config.pipeline.chunk_timeout_secs, 120);
        assert_eq!(config.pipeline.chunk_secs, 30.0);
        assert_eq!(config.pipeline.overlap_secs, 1.0);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [models]
            default = "qwen3"
            whisper_model_path = "/models/ggml-base.bin"

            [endpoints]
            qwen3 = "http://gpu-box:8005/asr"
            qwen3_api_key = "secret"

            [pipeline]
            max_concurrent_chunks = 4
            chunk_timeout_secs = 30
            chunk_secs = 20.0
            overlap_secs = 2.0
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.models.default, "qwen3");
        assert_eq!(
            config.models.whisper_model_path,
            Some(PathBuf::from("/models/ggml-base.bin"))
        );
        assert_eq!(config.endpoints.qwen3, "http://gpu-box:8005/asr");
        assert_eq!(config.endpoints.qwen3_api_key.as_deref(), Some("secret"));
        assert_eq!(config.pipeline.max_concurrent_chunks, 4);
        assert_eq!(config.pipeline.chunk_timeout(), Duration::from_secs(30));
        assert_eq!(config.pipeline.chunk_secs, 20.0);
        assert_eq!(config.pipeline.overlap_secs, 2.0);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [models]
            default = "chunkformer"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.models.default, "chunkformer");
        assert_eq!(config.endpoints, EndpointsConfig::default());
        assert_eq!(config.pipeline, PipelineSettings::default());
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let temp_file = write_config(
            r#"
            [pipeline]
            max_concurrent_chunks = 0
        "#,
        );

        let result = Config::load(temp_file.path());
        assert!(matches!(result, Err(AsrError::Config { .. })));
    }

    #[test]
    fn test_env_override_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asr_env();

        set_env("ASR_DEFAULT_MODEL", "omni_lingual");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.models.default, "omni_lingual");
        assert_eq!(config.endpoints, EndpointsConfig::default()); // Not overridden

        clear_asr_env();
    }

    #[test]
    fn test_env_override_endpoints_and_keys() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asr_env();

        set_env("WHISPER_ENDPOINT", "http://whisper:9000/transcribe");
        set_env("OMNILINGUAL_API_KEY", "omni-key");
        set_env("CHUNKFORMER_ENDPOINT", "http://cf:8000/asr");
        set_env("CHUNKFORMER_API_KEY", "cf-key");
        set_env("QWEN3_ENDPOINT", "http://qwen:8005");
        set_env("ASR_WHISPER_MODEL_PATH", "/opt/ggml-small.bin");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.endpoints.whisper_jax, "http://whisper:9000/transcribe");
        assert_eq!(config.endpoints.omni_lingual, defaults::OMNI_LINGUAL_ENDPOINT);
        assert_eq!(config.endpoints.omni_lingual_api_key.as_deref(), Some("omni-key"));
        assert_eq!(config.endpoints.chunkformer, "http://cf:8000/asr");
        assert_eq!(config.endpoints.chunkformer_api_key.as_deref(), Some("cf-key"));
        assert_eq!(config.endpoints.qwen3, "http://qwen:8005");
        assert_eq!(
            config.models.whisper_model_path,
            Some(PathBuf::from("/opt/ggml-small.bin"))
        );

        clear_asr_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asr_env();

        set_env("ASR_DEFAULT_MODEL", "");
        set_env("QWEN3_API_KEY", "");
        let config = Config::default().with_env_overrides();

        // Empty string should not override default
        assert_eq!(config.models.default, "whisper_jax");
        assert_eq!(config.endpoints.qwen3_api_key, None);

        clear_asr_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [models
            default = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(AsrError::ConfigParse(_))));
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let Some(path) = Config::default_path() else {
            return;
        };
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("modular-asr"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing_path = dir.path().join("config.toml");
        let config = Config::load_or_default(&missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_fails_on_invalid_toml() {
        let temp_file = write_config(
            r#"
            [models
            default = "broken
        "#,
        );

        // Should fail on invalid TOML, not return defaults
        let result = Config::load_or_default(temp_file.path());
        assert!(matches!(result, Err(AsrError::ConfigParse(_))));
    }
}
