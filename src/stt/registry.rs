//! Identifier → backend mapping, built once at startup.
//!
//! The registry is an explicit context object: construct it with
//! [`ModelRegistry::builder`] or [`ModelRegistry::from_config`], then share it
//! (read-only) with every request handler. Backends are instantiated lazily
//! on first resolve and the instance is reused afterwards, so resolving the
//! same identifier twice yields the same model.

use crate::config::Config;
use crate::defaults;
use crate::error::{AsrError, Result};
use crate::stt::model::AsrModel;
use std::sync::{Arc, Mutex};

type Constructor = Box<dyn Fn() -> Result<Arc<dyn AsrModel>> + Send + Sync>;

struct Entry {
    id: String,
    constructor: Constructor,
    instance: Mutex<Option<Arc<dyn AsrModel>>>,
}

impl Entry {
    fn instantiate(&self) -> Result<Arc<dyn AsrModel>> {
        let mut slot = self.instance.lock().map_err(|e| AsrError::Config {
            message: format!("Model '{}' slot poisoned: {e}", self.id),
        })?;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = (self.constructor)()?;
        tracing::debug!(model = %self.id, "Instantiated model");
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }
}

/// Collects constructors before the registry is frozen.
#[derive(Default)]
pub struct ModelRegistryBuilder {
    entries: Vec<Entry>,
    default: Option<String>,
}

impl ModelRegistryBuilder {
    /// Register a constructor. A later registration under the same identifier
    /// replaces the earlier one.
    pub fn register<F>(mut self, id: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn AsrModel>> + Send + Sync + 'static,
    {
        let id = id.into();
        self.entries.retain(|entry| entry.id != id);
        self.entries.push(Entry {
            id,
            constructor: Box::new(constructor),
            instance: Mutex::new(None),
        });
        self
    }

    /// Register an already-built model.
    pub fn register_instance(self, id: impl Into<String>, model: Arc<dyn AsrModel>) -> Self {
        self.register(id, move || Ok(Arc::clone(&model)))
    }

    pub fn default_model(mut self, id: impl Into<String>) -> Self {
        self.default = Some(id.into());
        self
    }

    /// Freeze the registry.
    ///
    /// Without an explicit default, `whisper_jax` is used when registered,
    /// otherwise the first registration.
    pub fn build(self) -> Result<ModelRegistry> {
        let first = self.entries.first().map(|entry| entry.id.clone());
        let Some(first) = first else {
            return Err(AsrError::Config {
                message: "No transcription models registered".to_string(),
            });
        };

        let default = match self.default {
            Some(id) => id,
            None if self.entries.iter().any(|e| e.id == defaults::DEFAULT_MODEL) => {
                defaults::DEFAULT_MODEL.to_string()
            }
            None => first,
        };

        let registry = ModelRegistry {
            entries: self.entries,
            default,
        };
        if !registry.contains(&registry.default) {
            return Err(registry.unknown(&registry.default));
        }
        Ok(registry)
    }
}

/// Read-only mapping from model identifier to backend.
pub struct ModelRegistry {
    entries: Vec<Entry>,
    default: String,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("ids", &self.ids())
            .field("default", &self.default)
            .finish()
    }
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Registry with every backend this build supports, configured from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        #[allow(unused_mut)]
        let mut builder = Self::builder().default_model(config.models.default.clone());

        #[cfg(feature = "remote")]
        {
            use crate::stt::remote::{RemoteFlavor, RemoteModel, RemoteSettings};

            let endpoints = &config.endpoints;
            for flavor in RemoteFlavor::ALL {
                let (endpoint, api_key) = match flavor {
                    RemoteFlavor::WhisperJax => (&endpoints.whisper_jax, None),
                    RemoteFlavor::OmniLingual => {
                        (&endpoints.omni_lingual, endpoints.omni_lingual_api_key.as_ref())
                    }
                    RemoteFlavor::Chunkformer => {
                        (&endpoints.chunkformer, endpoints.chunkformer_api_key.as_ref())
                    }
                    RemoteFlavor::Qwen3 => (&endpoints.qwen3, endpoints.qwen3_api_key.as_ref()),
                };
                let settings = RemoteSettings {
                    endpoint: endpoint.clone(),
                    api_key: api_key.cloned(),
                    timeout: None,
                };
                builder = builder.register(flavor.id(), move || {
                    let model: Arc<dyn AsrModel> =
                        Arc::new(RemoteModel::new(flavor, settings.clone())?);
                    Ok(model)
                });
            }
        }

        #[cfg(feature = "whisper")]
        if let Some(model_path) = config.models.whisper_model_path.clone() {
            use crate::stt::whisper::{LOCAL_WHISPER_ID, LocalWhisperModel, WhisperSettings};

            let settings = WhisperSettings {
                model_path,
                threads: config.models.whisper_threads,
            };
            builder = builder.register(LOCAL_WHISPER_ID, move || {
                let model: Arc<dyn AsrModel> =
                    Arc::new(LocalWhisperModel::new(settings.clone())?);
                Ok(model)
            });
        }

        builder.build()
    }

    /// Return the model registered under `id`, or the default when `id` is
    /// `None` or blank.
    ///
    /// # Errors
    /// `UnknownModel` listing the available identifiers, or whatever the
    /// backend's constructor reports.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn AsrModel>> {
        let id = id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.default);
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| self.unknown(id))?
            .instantiate()
    }

    pub fn default_id(&self) -> &str {
        &self.default
    }

    /// Registered identifiers in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    fn unknown(&self, id: &str) -> AsrError {
        AsrError::UnknownModel {
            id: id.to_string(),
            available: self.ids(),
        }
    }
}
