//! Scriptable in-memory backend for tests and offline runs.

use crate::error::{AsrError, Result};
use crate::stt::model::{
    AsrModel, Capabilities, ChunkRequest, ChunkTranscription, ModelDescriptor, WordTiming,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mock backend that answers per chunk index.
///
/// Chunks without a scripted response get the default response. Every call
/// is recorded so tests can assert on what was dispatched.
#[derive(Debug)]
pub struct MockModel {
    descriptor: ModelDescriptor,
    response: String,
    scripted: HashMap<usize, ChunkTranscription>,
    fail_at: BTreeSet<usize>,
    fail_all: bool,
    delay: Option<Duration>,
    delays: HashMap<usize, Duration>,
    healthy: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<usize>>,
}

impl MockModel {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: ModelDescriptor::new(id, format!("Mock ({id})"))
                .with_languages(["en"])
                .with_capabilities(Capabilities {
                    translate: true,
                    strict_languages: false,
                    word_timestamps: true,
                    concurrent: true,
                }),
            response: "mock transcription".to_string(),
            scripted: HashMap::new(),
            fail_at: BTreeSet::new(),
            fail_all: false,
            delay: None,
            delays: HashMap::new(),
            healthy: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Response for chunks without a scripted answer.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Script responses by chunk index, in order.
    pub fn with_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (index, text) in responses.into_iter().enumerate() {
            self.scripted
                .insert(index, ChunkTranscription::text(text.into()));
        }
        self
    }

    /// Script a full result, including word timings, for one chunk.
    pub fn with_chunk(mut self, index: usize, result: ChunkTranscription) -> Self {
        self.scripted.insert(index, result);
        self
    }

    /// Shorthand for a chunk whose words are `(word, start, end)` triples.
    pub fn with_words(self, index: usize, words: &[(&str, f64, f64)]) -> Self {
        let timings: Vec<WordTiming> = words
            .iter()
            .map(|&(word, start, end)| WordTiming {
                word: word.to_string(),
                start,
                end,
            })
            .collect();
        let text = timings
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.with_chunk(index, ChunkTranscription::text(text).with_words(timings))
    }

    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.fail_at.insert(index);
        self
    }

    /// Fail every call and report unhealthy.
    pub fn with_failure(mut self) -> Self {
        self.fail_all = true;
        self.healthy = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_at(mut self, index: usize, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Restrict language hints to `languages`.
    pub fn with_strict_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor = self.descriptor.with_languages(languages);
        self.descriptor.capabilities.strict_languages = true;
        self
    }

    pub fn without_translation(mut self) -> Self {
        self.descriptor.capabilities.translate = false;
        self
    }

    /// Mark the backend as unsafe for concurrent calls.
    pub fn sequential(mut self) -> Self {
        self.descriptor.capabilities.concurrent = false;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Chunk indices in the order calls arrived.
    pub fn seen_chunks(&self) -> Vec<usize> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AsrModel for MockModel {
    async fn transcribe(&self, request: ChunkRequest<'_>) -> Result<ChunkTranscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.index);
        }

        self.descriptor
            .check_request(request.task, request.language)?;
        request.params.validate()?;

        let delay = self.delays.get(&request.index).copied().or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all || self.fail_at.contains(&request.index) {
            return Err(AsrError::backend("mock transcription failure"));
        }

        Ok(self
            .scripted
            .get(&request.index)
            .cloned()
            .unwrap_or_else(|| ChunkTranscription::text(self.response.clone())))
    }

    fn describe(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::model::{DecodingParams, Task};
    use std::sync::Arc;

    async fn run(model: &dyn AsrModel, index: usize, language: Option<&str>) -> Result<ChunkTranscription> {
        let audio = vec![0i16; 1000];
        let params = DecodingParams::default();
        model
            .transcribe(ChunkRequest {
                index,
                audio: &audio,
                sample_rate: 16000,
                task: Task::Transcribe,
                language,
                params: &params,
            })
            .await
    }

    #[tokio::test]
    async fn test_mock_model_returns_default_response() {
        let model = MockModel::new("test-model").with_response("Hello, this is a test");
        let result = run(&model, 0, None).await.unwrap();
        assert_eq!(result.text, "Hello, this is a test");
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_model_scripted_by_index() {
        let model = MockModel::new("test-model").with_responses(["A", "B"]);
        assert_eq!(run(&model, 1, None).await.unwrap().text, "B");
        assert_eq!(run(&model, 0, None).await.unwrap().text, "A");
        assert_eq!(run(&model, 5, None).await.unwrap().text, "mock transcription");
        assert_eq!(model.seen_chunks(), vec![1, 0, 5]);
    }

    #[tokio::test]
    async fn test_mock_model_fails_at_index() {
        let model = MockModel::new("test-model").with_failure_at(1);
        assert!(run(&model, 0, None).await.is_ok());
        match run(&model, 1, None).await {
            Err(AsrError::BackendUnavailable { message, .. }) => {
                assert_eq!(message, "mock transcription failure");
            }
            other => panic!("Expected BackendUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_model_strict_languages() {
        let model = MockModel::new("vi-only").with_strict_languages(["vi"]);
        assert!(run(&model, 0, Some("vi")).await.is_ok());
        assert!(matches!(
            run(&model, 0, Some("en")).await,
            Err(AsrError::UnsupportedLanguage { .. })
        ));
        assert_eq!(model.list_languages(), BTreeSet::from(["vi".to_string()]));
    }

    #[tokio::test]
    async fn test_mock_model_words_build_text() {
        let model = MockModel::new("timed").with_words(0, &[("hello", 0.0, 0.4), ("world", 0.5, 0.9)]);
        let result = run(&model, 0, None).await.unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.words.map(|w| w.len()), Some(2));
    }

    #[tokio::test]
    async fn test_mock_model_health() {
        assert!(MockModel::new("ok").health_check().await);
        assert!(!MockModel::new("down").unhealthy().health_check().await);
        assert!(!MockModel::new("broken").with_failure().health_check().await);
    }

    #[tokio::test]
    async fn test_asr_model_trait_is_object_safe() {
        let model: Arc<dyn AsrModel> =
            Arc::new(MockModel::new("test-model").with_response("boxed test"));
        assert_eq!(model.describe().id, "test-model");
        assert_eq!(run(model.as_ref(), 0, None).await.unwrap().text, "boxed test");
    }
}
