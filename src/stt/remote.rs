//! HTTP transcription backends.
//!
//! Each remote service takes a multipart upload of a 16 kHz mono WAV and
//! answers with JSON. The services differ only in field names, auth, the
//! languages they accept and how strict they are about them, which is what
//! [`RemoteFlavor`] captures.

use crate::audio::encode_wav;
use crate::defaults;
use crate::error::{AsrError, Result};
use crate::stt::model::{
    AsrModel, Capabilities, ChunkRequest, ChunkTranscription, ModelDescriptor, Task, WordTiming,
    language_hint,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

/// Script-tagged language codes accepted by the OmniLingual and Qwen3 services.
const SCRIPT_LANGUAGES: &[&str] = &[
    "eng_Latn", "vie_Latn", "fra_Latn", "spa_Latn", "deu_Latn", "ita_Latn", "por_Latn",
    "rus_Cyrl", "jpn_Jpan", "kor_Hang", "cmn_Hans", "cmn_Hant", "ara_Arab", "hin_Deva",
];

/// ISO-639-1 to ISO-639-3 for the codes Qwen3 deployments understand.
const ISO2_TO_ISO3: &[(&str, &str)] = &[
    ("en", "eng"),
    ("vi", "vie"),
    ("fr", "fra"),
    ("de", "deu"),
    ("es", "spa"),
    ("it", "ita"),
    ("pt", "por"),
    ("ru", "rus"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("zh", "cmn"),
    ("ar", "ara"),
    ("hi", "hin"),
];

/// Language names some Qwen3 deployments take instead of codes.
const QWEN_LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("eng", "English"),
    ("vi", "Vietnamese"),
    ("vie", "Vietnamese"),
];

/// Gateway path markers of Qwen3 deployments, and the port each model also
/// listens on directly.
const QWEN_DIRECT_PORTS: &[(&str, u16)] = &[("/asr_q3_1_7B", 8005), ("/asr_q3_0_6B", 8006)];

/// Statuses that mean "wrong path", not "transcription failed".
const ENDPOINT_FALLBACK_STATUSES: &[StatusCode] = &[
    StatusCode::BAD_REQUEST,
    StatusCode::NOT_FOUND,
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::UNPROCESSABLE_ENTITY,
];

const OMNI_DEFAULT_LANG_CODE: &str = "eng_Latn";

/// Which remote service a [`RemoteModel`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteFlavor {
    WhisperJax,
    OmniLingual,
    Chunkformer,
    Qwen3,
}

impl RemoteFlavor {
    pub const ALL: [RemoteFlavor; 4] = [
        RemoteFlavor::WhisperJax,
        RemoteFlavor::OmniLingual,
        RemoteFlavor::Chunkformer,
        RemoteFlavor::Qwen3,
    ];

    /// Registry identifier.
    pub fn id(&self) -> &'static str {
        match self {
            RemoteFlavor::WhisperJax => "whisper_jax",
            RemoteFlavor::OmniLingual => "omni_lingual",
            RemoteFlavor::Chunkformer => "chunkformer",
            RemoteFlavor::Qwen3 => "qwen3",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RemoteFlavor::WhisperJax => "Whisper JAX",
            RemoteFlavor::OmniLingual => "OmniLingual ASR",
            RemoteFlavor::Chunkformer => "Chunkformer",
            RemoteFlavor::Qwen3 => "Qwen3 ASR",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            RemoteFlavor::WhisperJax => defaults::WHISPER_JAX_ENDPOINT,
            RemoteFlavor::OmniLingual => defaults::OMNI_LINGUAL_ENDPOINT,
            RemoteFlavor::Chunkformer => defaults::CHUNKFORMER_ENDPOINT,
            RemoteFlavor::Qwen3 => defaults::QWEN3_ENDPOINT,
        }
    }

    /// Request timeout the service is known to need; `None` leaves it to the
    /// pipeline's per-chunk timeout.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self {
            RemoteFlavor::WhisperJax => None,
            RemoteFlavor::OmniLingual => Some(Duration::from_secs(60)),
            RemoteFlavor::Chunkformer | RemoteFlavor::Qwen3 => Some(Duration::from_secs(120)),
        }
    }

    /// Multipart field carrying the WAV payload.
    fn file_field(&self) -> &'static str {
        match self {
            RemoteFlavor::WhisperJax => "file",
            _ => "audio",
        }
    }

    fn languages(&self) -> BTreeSet<String> {
        let codes: &[&str] = match self {
            RemoteFlavor::WhisperJax => &["en", "vi", "hi", defaults::AUTO_LANGUAGE],
            RemoteFlavor::OmniLingual | RemoteFlavor::Qwen3 => SCRIPT_LANGUAGES,
            RemoteFlavor::Chunkformer => &["vi"],
        };
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            translate: matches!(self, RemoteFlavor::WhisperJax),
            strict_languages: matches!(self, RemoteFlavor::OmniLingual),
            word_timestamps: false,
            concurrent: true,
        }
    }
}

impl std::str::FromStr for RemoteFlavor {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self> {
        RemoteFlavor::ALL
            .into_iter()
            .find(|flavor| flavor.id() == s)
            .ok_or_else(|| AsrError::UnknownModel {
                id: s.to_string(),
                available: RemoteFlavor::ALL.iter().map(|f| f.id().to_string()).collect(),
            })
    }
}

/// Connection settings for one remote backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Overrides [`RemoteFlavor::request_timeout`].
    pub timeout: Option<Duration>,
}

impl RemoteSettings {
    pub fn for_flavor(flavor: RemoteFlavor) -> Self {
        Self {
            endpoint: flavor.default_endpoint().to_string(),
            api_key: None,
            timeout: None,
        }
    }
}

/// Backend that forwards chunks to an HTTP transcription service.
#[derive(Debug)]
pub struct RemoteModel {
    flavor: RemoteFlavor,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    descriptor: ModelDescriptor,
}

impl RemoteModel {
    pub fn new(flavor: RemoteFlavor, settings: RemoteSettings) -> Result<Self> {
        let endpoint = settings.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(AsrError::Config {
                message: format!("{} endpoint is empty", flavor.id()),
            });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout.or(flavor.request_timeout()) {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| AsrError::Config {
            message: format!("Failed to create HTTP client for {}: {e}", flavor.id()),
        })?;

        let descriptor = ModelDescriptor::new(flavor.id(), flavor.display_name())
            .with_languages(flavor.languages())
            .with_capabilities(flavor.capabilities())
            .with_location(endpoint.clone());

        Ok(Self {
            flavor,
            endpoint,
            api_key: settings.api_key.filter(|key| !key.is_empty()),
            client,
            descriptor,
        })
    }

    pub fn flavor(&self) -> RemoteFlavor {
        self.flavor
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn candidate_urls(&self) -> Vec<String> {
        let mut urls = vec![self.endpoint.clone()];
        if self.flavor != RemoteFlavor::Qwen3 {
            return urls;
        }
        let mut add = |url: String| {
            if !urls.contains(&url) {
                urls.push(url);
            }
        };

        let base = self.endpoint.trim_end_matches('/');
        for path in ["asr", "transcribe", "transcribe/upload"] {
            add(format!("{base}/{path}"));
        }

        if let Ok(parsed) = reqwest::Url::parse(&self.endpoint) {
            for &(marker, port) in QWEN_DIRECT_PORTS {
                if !parsed.path().contains(marker) {
                    continue;
                }
                let mut direct = parsed.clone();
                direct.set_path("");
                direct.set_query(None);
                direct.set_fragment(None);
                if direct.set_port(Some(port)).is_err() {
                    continue;
                }
                let direct_base = direct.as_str().trim_end_matches('/').to_string();
                for path in ["asr", "transcribe"] {
                    add(format!("{direct_base}/{path}"));
                }
            }
        }
        urls
    }

    /// `lang_code` is the Qwen3 language field for this attempt; other
    /// services derive theirs from the request.
    fn build_form(
        &self,
        request: &ChunkRequest<'_>,
        wav: &[u8],
        lang_code: Option<&str>,
    ) -> Result<Form> {
        let part = Part::bytes(wav.to_vec())
            .file_name(format!("chunk_{}.wav", request.index))
            .mime_str("audio/wav")
            .map_err(|e| AsrError::backend(format!("Failed to build upload: {e}")))?;

        let hint = language_hint(request.language);
        let mut form = Form::new().part(self.flavor.file_field(), part);

        match self.flavor {
            RemoteFlavor::WhisperJax => {
                form = form
                    .text("task", request.task.as_str())
                    .text("return_timestamps", "false")
                    .text("num_beams", request.params.num_beams.to_string())
                    .text("temperature", request.params.temperature.to_string());
                if let Some(lang) = hint {
                    form = form.text("language", lang.to_string());
                }
                if let Some(prompt) = request.params.prompt.as_deref()
                    && !prompt.is_empty()
                {
                    form = form.text("prompt", prompt.to_string());
                }
            }
            RemoteFlavor::OmniLingual => {
                form = form.text(
                    "lang_code",
                    hint.unwrap_or(OMNI_DEFAULT_LANG_CODE).to_string(),
                );
            }
            RemoteFlavor::Chunkformer => {
                form = form.text("return_timestamps", "false");
            }
            RemoteFlavor::Qwen3 => {
                if let Some(code) = lang_code {
                    form = form.text("lang_code", code.to_string());
                }
            }
        }
        Ok(form)
    }

    async fn post(&self, url: &str, form: Form) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AsrError::backend(format!("{} request to {url} timed out", self.flavor.id()))
            } else {
                AsrError::backend(format!("{} request to {url} failed: {e}", self.flavor.id()))
            }
        })
    }
}

/// Map a language hint to the `lang_code` Qwen3 expects.
fn qwen_lang_code(hint: Option<&str>) -> Option<String> {
    let lang = hint?;
    let lower = lang.to_ascii_lowercase();
    if let Some((_, iso3)) = ISO2_TO_ISO3.iter().find(|(iso2, _)| *iso2 == lower) {
        return Some(iso3.to_string());
    }
    match lang.split_once('_') {
        Some((code, _script)) => Some(code.to_string()),
        None => Some(lang.to_string()),
    }
}

/// `lang_code` values to try against Qwen3, in order: the normalised code,
/// then the language name where one is known. `[None]` sends no field.
fn qwen_lang_codes(hint: Option<&str>) -> Vec<Option<String>> {
    let Some(code) = qwen_lang_code(hint) else {
        return vec![None];
    };
    let lower = code.to_ascii_lowercase();
    let name = QWEN_LANGUAGE_NAMES
        .iter()
        .find(|(known, _)| *known == lower)
        .map(|(_, name)| name.to_string())
        .filter(|name| *name != code);
    std::iter::once(code).chain(name).map(Some).collect()
}

/// Extract a chunk result from a service's JSON body.
fn parse_response(flavor: RemoteFlavor, body: &str) -> Result<ChunkTranscription> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        AsrError::backend(format!("{} returned invalid JSON: {e}", flavor.id()))
    })?;

    let object = match value {
        Value::String(text) => return Ok(ChunkTranscription::text(text.trim())),
        Value::Object(object) => object,
        other => {
            return Err(AsrError::backend(format!(
                "{} returned unexpected JSON: {other}",
                flavor.id()
            )));
        }
    };

    if object.get("status").and_then(Value::as_str) == Some("error") {
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(AsrError::backend(format!("{} API error: {message}", flavor.id())));
    }

    let text = match object.get("text").and_then(Value::as_str) {
        Some(text) => text.trim().to_string(),
        None if matches!(flavor, RemoteFlavor::OmniLingual | RemoteFlavor::Qwen3) => object
            .values()
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AsrError::backend(format!("{} response has no text field", flavor.id()))
            })?,
        None => String::new(),
    };

    let words = object
        .get("words")
        .cloned()
        .and_then(|w| serde_json::from_value::<Vec<WordTiming>>(w).ok())
        .filter(|w| !w.is_empty());
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32);

    Ok(ChunkTranscription {
        text,
        words,
        confidence,
    })
}

#[async_trait]
impl AsrModel for RemoteModel {
    async fn transcribe(&self, request: ChunkRequest<'_>) -> Result<ChunkTranscription> {
        self.descriptor
            .check_request(request.task, request.language)?;
        request.params.validate()?;

        let wav = encode_wav(request.audio, request.sample_rate)?;
        let urls = self.candidate_urls();
        let lang_codes = match self.flavor {
            RemoteFlavor::Qwen3 => qwen_lang_codes(language_hint(request.language)),
            _ => vec![None],
        };
        let mut last_failure = None;

        for lang_code in &lang_codes {
            for url in &urls {
                tracing::debug!(
                    model = self.flavor.id(),
                    chunk = request.index,
                    url = %url,
                    lang_code = lang_code.as_deref(),
                    bytes = wav.len(),
                    "Sending chunk to remote backend"
                );
                let form = self.build_form(&request, &wav, lang_code.as_deref())?;
                let response = self.post(url, form).await?;
                let status = response.status();
                let body = response.text().await.map_err(|e| {
                    AsrError::backend(format!(
                        "{} response body unreadable: {e}",
                        self.flavor.id()
                    ))
                })?;

                if status.is_success() {
                    return parse_response(self.flavor, &body);
                }
                let failure = format!(
                    "{} request failed with status {status}: {}",
                    self.flavor.id(),
                    body.trim()
                );
                if self.flavor == RemoteFlavor::Qwen3
                    && ENDPOINT_FALLBACK_STATUSES.contains(&status)
                {
                    tracing::debug!(url = %url, status = %status, "Trying next endpoint");
                    last_failure = Some(failure);
                    continue;
                }
                return Err(AsrError::backend(failure));
            }
        }

        Err(AsrError::backend(last_failure.unwrap_or_else(|| {
            format!("{} has no endpoint configured", self.flavor.id())
        })))
    }

    fn describe(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    async fn health_check(&self) -> bool {
        let probe = self
            .client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(defaults::HEALTH_TIMEOUT_SECS))
            .send()
            .await;
        match probe {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(model = self.flavor.id(), error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::model::DecodingParams;

    fn model(flavor: RemoteFlavor, endpoint: &str) -> RemoteModel {
        RemoteModel::new(
            flavor,
            RemoteSettings {
                endpoint: endpoint.to_string(),
                api_key: None,
                timeout: Some(Duration::from_secs(2)),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_flavor_ids_round_trip() {
        for flavor in RemoteFlavor::ALL {
            assert_eq!(flavor.id().parse::<RemoteFlavor>().unwrap(), flavor);
        }
        assert!(matches!(
            "nope".parse::<RemoteFlavor>(),
            Err(AsrError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_descriptors_follow_service_contracts() {
        let whisper = model(RemoteFlavor::WhisperJax, defaults::WHISPER_JAX_ENDPOINT).describe();
        assert!(whisper.capabilities.translate);
        assert!(whisper.languages.contains("auto"));
        assert_eq!(whisper.location.as_deref(), Some(defaults::WHISPER_JAX_ENDPOINT));

        let omni = model(RemoteFlavor::OmniLingual, defaults::OMNI_LINGUAL_ENDPOINT).describe();
        assert!(!omni.capabilities.translate);
        assert!(omni.capabilities.strict_languages);
        assert_eq!(omni.languages.len(), 14);

        let chunkformer = model(RemoteFlavor::Chunkformer, defaults::CHUNKFORMER_ENDPOINT);
        assert_eq!(
            chunkformer.list_languages(),
            BTreeSet::from(["vi".to_string()])
        );
    }

    #[test]
    fn test_empty_endpoint_is_config_error() {
        let err = RemoteModel::new(
            RemoteFlavor::Qwen3,
            RemoteSettings {
                endpoint: "  ".to_string(),
                api_key: None,
                timeout: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AsrError::Config { .. }));
    }

    #[test]
    fn test_qwen_lang_code_normalisation() {
        assert_eq!(qwen_lang_code(Some("vi")).as_deref(), Some("vie"));
        assert_eq!(qwen_lang_code(Some("EN")).as_deref(), Some("eng"));
        assert_eq!(qwen_lang_code(Some("rus_Cyrl")).as_deref(), Some("rus"));
        assert_eq!(qwen_lang_code(Some("Vietnamese")).as_deref(), Some("Vietnamese"));
        assert_eq!(qwen_lang_code(None), None);
    }

    #[test]
    fn test_qwen_candidate_urls() {
        let qwen = model(RemoteFlavor::Qwen3, "http://host:8005/");
        assert_eq!(
            qwen.candidate_urls(),
            vec![
                "http://host:8005/".to_string(),
                "http://host:8005/asr".to_string(),
                "http://host:8005/transcribe".to_string(),
                "http://host:8005/transcribe/upload".to_string(),
            ]
        );

        let whisper = model(RemoteFlavor::WhisperJax, "http://host:8008/transcribe");
        assert_eq!(whisper.candidate_urls().len(), 1);
    }

    #[test]
    fn test_qwen_gateway_paths_add_direct_ports() {
        let large = model(RemoteFlavor::Qwen3, "https://gw.example.com/asr_q3_1_7B");
        let urls = large.candidate_urls();
        assert_eq!(urls[0], "https://gw.example.com/asr_q3_1_7B");
        assert!(urls.contains(&"https://gw.example.com/asr_q3_1_7B/transcribe/upload".to_string()));
        assert_eq!(
            &urls[urls.len() - 2..],
            &[
                "https://gw.example.com:8005/asr".to_string(),
                "https://gw.example.com:8005/transcribe".to_string(),
            ]
        );

        let small = model(RemoteFlavor::Qwen3, "http://gw:9000/asr_q3_0_6B/?v=2");
        let urls = small.candidate_urls();
        assert!(urls.contains(&"http://gw:8006/asr".to_string()));
        assert!(!urls.iter().any(|u| u.contains(":8005")));
    }

    #[test]
    fn test_qwen_lang_codes_try_language_name_second() {
        assert_eq!(
            qwen_lang_codes(Some("vi")),
            vec![Some("vie".to_string()), Some("Vietnamese".to_string())]
        );
        assert_eq!(
            qwen_lang_codes(Some("eng_Latn")),
            vec![Some("eng".to_string()), Some("English".to_string())]
        );
        assert_eq!(qwen_lang_codes(Some("fr")), vec![Some("fra".to_string())]);
        assert_eq!(
            qwen_lang_codes(Some("Vietnamese")),
            vec![Some("Vietnamese".to_string())]
        );
        assert_eq!(qwen_lang_codes(None), vec![None]);
    }

    #[test]
    fn test_parse_response_empty_words_are_no_timings() {
        let body = r#"{"text": "xin chào", "words": []}"#;
        let result = parse_response(RemoteFlavor::WhisperJax, body).unwrap();
        assert_eq!(result.text, "xin chào");
        assert!(result.words.is_none());
    }

    #[test]
    fn test_parse_response_text_field() {
        let result = parse_response(RemoteFlavor::WhisperJax, r#"{"text": "  xin chào  "}"#).unwrap();
        assert_eq!(result.text, "xin chào");
        assert!(result.words.is_none());
    }

    #[test]
    fn test_parse_response_words_and_confidence() {
        let body = r#"{"text": "hi there", "confidence": 0.5,
            "words": [{"word": "hi", "start": 0.0, "end": 0.2}, {"word": "there", "start": 0.3, "end": 0.6}]}"#;
        let result = parse_response(RemoteFlavor::Qwen3, body).unwrap();
        assert_eq!(result.confidence, Some(0.5));
        assert_eq!(result.words.unwrap()[1].word, "there");
    }

    #[test]
    fn test_parse_response_status_error() {
        let err = parse_response(
            RemoteFlavor::Chunkformer,
            r#"{"status": "error", "message": "model not loaded"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
        assert!(matches!(err, AsrError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_parse_response_falls_back_to_first_string_field() {
        let body = r#"{"id": 7, "transcription": "bonjour"}"#;
        let result = parse_response(RemoteFlavor::OmniLingual, body).unwrap();
        assert_eq!(result.text, "bonjour");
    }

    #[test]
    fn test_parse_response_without_text_for_strict_services() {
        assert!(parse_response(RemoteFlavor::Qwen3, r#"{"id": 7}"#).is_err());
        assert_eq!(
            parse_response(RemoteFlavor::WhisperJax, r#"{"id": 7}"#).unwrap().text,
            ""
        );
    }

    #[test]
    fn test_parse_response_rejects_non_json() {
        let err = parse_response(RemoteFlavor::WhisperJax, "<html>502</html>").unwrap_err();
        assert!(matches!(err, AsrError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_translate_rejected_before_network() {
        let chunkformer = model(RemoteFlavor::Chunkformer, "http://127.0.0.1:9/asr");
        let audio = vec![0i16; 160];
        let params = DecodingParams::default();
        let err = chunkformer
            .transcribe(ChunkRequest {
                index: 0,
                audio: &audio,
                sample_rate: 16000,
                task: Task::Translate,
                language: None,
                params: &params,
            })
            .await
            .unwrap_err();
        match err {
            AsrError::InvalidParameter { name, .. } => assert_eq!(name, "task"),
            other => panic!("Expected InvalidParameter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_backend_unavailable() {
        let whisper = model(RemoteFlavor::WhisperJax, "http://127.0.0.1:9/transcribe");
        let audio = vec![0i16; 160];
        let params = DecodingParams::default();
        let err = whisper
            .transcribe(ChunkRequest {
                index: 3,
                audio: &audio,
                sample_rate: 16000,
                task: Task::Transcribe,
                language: None,
                params: &params,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AsrError::BackendUnavailable { .. }));
        assert!(!whisper.health_check().await);
    }
}
