use std::sync::Arc;

use filter_logging::{filter_debug, filter_error, filter_info, filter_warn};
use futures_util::future::join_all;
use serde_json::{json, Map};
use tokio::sync::Semaphore;

use crate::api::{ChatMessage, ChatRequest, MessageContent, Usage};
use crate::api_config::{ApiConfig, ConfigResolver, DEFAULT_MODEL};
use crate::codec::{batch_content, decode_decisions, recommendation_prompt, NO_RESPONSE};
use crate::storage::{keys, KeyValueStore};
use crate::transport::ChatTransport;
use crate::types::{BatchItem, BatchOutcome, ChunkFailure, ClassifyError, ErrorKind, ItemDecision};

/// How a batch larger than one request reaches the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Chunks of one batch are sent concurrently; batches do not wait for each other.
    #[default]
    Chunked,
    /// One batch at a time system-wide, chunks sent one after another. Later
    /// callers queue in arrival order.
    Serialized,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub max_items_per_request: usize,
    pub max_tokens: u32,
    pub recommendation_max_tokens: u32,
    pub recommendation_sample_size: usize,
    pub recommendation_model: String,
    pub mode: DispatchMode,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            max_items_per_request: 50,
            max_tokens: 1000,
            recommendation_max_tokens: 300,
            recommendation_sample_size: 20,
            recommendation_model: DEFAULT_MODEL.into(),
            mode: DispatchMode::Chunked,
        }
    }
}

/// Background-wide classification service.
///
/// Created once when the background starts and shared by every tab. Owns the
/// persisted request counter and, in serialized mode, the call queue.
pub struct BatchCoordinator {
    transport: Arc<dyn ChatTransport>,
    resolver: Arc<dyn ConfigResolver>,
    store: Arc<dyn KeyValueStore>,
    settings: ClassifierSettings,
    counter: tokio::sync::Mutex<u64>,
    /// One permit: serialized mode admits callers one at a time, in arrival order.
    serial: Semaphore,
}

impl BatchCoordinator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        resolver: Arc<dyn ConfigResolver>,
        store: Arc<dyn KeyValueStore>,
        settings: ClassifierSettings,
    ) -> Self {
        Self {
            transport,
            resolver,
            store,
            settings,
            counter: tokio::sync::Mutex::new(0),
            serial: Semaphore::new(1),
        }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Loads the persisted request counter. Unreadable storage starts from zero.
    pub async fn initialize_counter(&self) {
        let stored = match self.store.get(&[keys::GLOBAL_API_REQUEST_COUNT]).await {
            Ok(values) => values
                .get(keys::GLOBAL_API_REQUEST_COUNT)
                .and_then(|value| value.as_u64())
                .unwrap_or(0),
            Err(err) => {
                filter_warn!("Could not read request counter: {err}");
                0
            }
        };
        *self.counter.lock().await = stored;
    }

    pub async fn request_count(&self) -> u64 {
        *self.counter.lock().await
    }

    /// Classifies `items` against `topics`.
    ///
    /// Configuration problems fail the whole call. Upstream failures are
    /// reported per chunk in [`BatchOutcome::failures`]; an unreadable reply
    /// marks its chunk's items not allowed.
    pub async fn classify(
        &self,
        items: Vec<BatchItem>,
        topics: &[String],
    ) -> Result<BatchOutcome, ClassifyError> {
        if items.is_empty() {
            return Ok(BatchOutcome::default());
        }
        // Counted at dispatch, whatever the upstream later says.
        self.increment_counter(items.len()).await;

        match self.settings.mode {
            DispatchMode::Chunked => self.run_batch(items, topics).await,
            DispatchMode::Serialized => {
                let _permit = self.serial.acquire().await.map_err(|_| {
                    ClassifyError::Network("classification queue closed".into())
                })?;
                self.run_batch(items, topics).await
            }
        }
    }

    /// Asks for a filter suggestion from a sample of page titles. Returns the raw reply.
    pub async fn recommend(&self, titles: &[String]) -> Result<String, ClassifyError> {
        let config = self.resolver.resolve().await;
        config.validate()?;
        if titles.is_empty() {
            return Err(ClassifyError::NoItems);
        }

        let sample = &titles[..titles.len().min(self.settings.recommendation_sample_size)];
        let request = ChatRequest {
            model: self.settings.recommendation_model.clone(),
            messages: vec![ChatMessage::user(MessageContent::Text(
                recommendation_prompt(sample),
            ))],
            max_tokens: self.settings.recommendation_max_tokens,
            temperature: 1.0,
            post_count: (!config.uses_own_key).then_some(sample.len()),
        };

        let response = self.transport.send(&config, &request).await?;
        log_usage(response.usage);
        response
            .first_content()
            .map(str::to_owned)
            .ok_or_else(|| ClassifyError::InvalidResponse("reply has no choices".into()))
    }

    async fn run_batch(
        &self,
        items: Vec<BatchItem>,
        topics: &[String],
    ) -> Result<BatchOutcome, ClassifyError> {
        let config = self.resolver.resolve().await;
        config.validate()?;
        if topics.is_empty() {
            return Err(ClassifyError::NoTopics);
        }

        let chunk_size = self.settings.max_items_per_request.max(1);
        let chunks: Vec<&[BatchItem]> = items.chunks(chunk_size).collect();
        filter_info!(
            "Classifying {} items in {} request(s)",
            items.len(),
            chunks.len()
        );

        let results = match self.settings.mode {
            DispatchMode::Chunked => {
                join_all(
                    chunks
                        .iter()
                        .map(|chunk| self.classify_chunk(&config, chunk, topics)),
                )
                .await
            }
            DispatchMode::Serialized => {
                let mut results = Vec::with_capacity(chunks.len());
                for chunk in &chunks {
                    results.push(self.classify_chunk(&config, chunk, topics).await);
                }
                results
            }
        };

        let mut outcome = BatchOutcome::default();
        for (chunk, result) in chunks.into_iter().zip(results) {
            match result {
                Ok(decisions) => outcome.decisions.extend(decisions),
                Err(error) => outcome.failures.push(ChunkFailure {
                    items: chunk.to_vec(),
                    error,
                }),
            }
        }
        filter_info!(
            "Batch settled: {} decided ({} allowed), {} chunk(s) failed",
            outcome.decisions.len(),
            outcome.allowed_count(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn classify_chunk(
        &self,
        config: &ApiConfig,
        chunk: &[BatchItem],
        topics: &[String],
    ) -> Result<Vec<ItemDecision>, ClassifyError> {
        let request = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage::user(batch_content(
                chunk,
                topics,
                config.send_images,
            ))],
            max_tokens: self.settings.max_tokens,
            temperature: 0.0,
            post_count: (!config.uses_own_key).then_some(chunk.len()),
        };

        let reply = match self.transport.send(config, &request).await {
            Ok(response) => {
                log_usage(response.usage);
                response.first_content().map(str::to_owned)
            }
            Err(err) if err.kind() == ErrorKind::Parse => {
                filter_warn!("Unreadable reply, {} items default to blocked: {err}", chunk.len());
                None
            }
            Err(err) => {
                filter_error!("Chunk of {} items failed: {err}", chunk.len());
                return Err(err);
            }
        };

        let Some(reply) = reply else {
            return Ok(chunk.iter().map(not_answered).collect());
        };

        let lines = decode_decisions(&reply, chunk.len());
        Ok(chunk
            .iter()
            .zip(lines)
            .map(|(item, line)| ItemDecision {
                index: item.index,
                title: item.title.clone(),
                is_allowed: line.is_allowed,
                response_line: line.line,
            })
            .collect())
    }

    async fn increment_counter(&self, by: usize) {
        let mut counter = self.counter.lock().await;
        *counter += by as u64;
        let mut values = Map::new();
        values.insert(keys::GLOBAL_API_REQUEST_COUNT.to_owned(), json!(*counter));
        // Held across the write so persisted totals never go backwards.
        if let Err(err) = self.store.set(values).await {
            filter_warn!("Could not persist request counter: {err}");
        }
    }
}

fn not_answered(item: &BatchItem) -> ItemDecision {
    ItemDecision {
        index: item.index,
        title: item.title.clone(),
        is_allowed: false,
        response_line: NO_RESPONSE.to_owned(),
    }
}

fn log_usage(usage: Option<Usage>) {
    if let Some(usage) = usage {
        filter_debug!(
            "Token usage: {} prompt, {} completion, {} total",
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens
        );
    }
}
