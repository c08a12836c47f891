use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use super::channel::{event_channel, EventSink, EventSubscription};
use super::events::{SimilarExample, Stage, SynthesisEvent, SynthesisResult};
use super::prompt::{build_chat_request, NO_EXAMPLES_NOTICE, NO_EXEMPLARS_NOTICE};
use super::quality::QualitySelector;
use super::request::{QueryRequest, SynthesisRequest, DEFAULT_TOP_K};
use crate::core::cancel::CancellationToken;
use crate::core::errors::{FailedRun, ProviderError, SynthesisError};
use crate::core::retry::{RetryError, RetryPolicy};
use crate::llm::{ChatRequest, GenerativeModel};
use crate::search::SimilaritySearchEngine;

/// How the generative model is driven for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One `generate` call; a single chunk carrying the whole text.
    Blocking,
    /// `generate_stream`; one cumulative chunk per delta.
    Streaming,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_top_k: usize,
    pub channel_capacity: usize,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            channel_capacity: 64,
            temperature: Some(0.7),
            max_tokens: Some(1000),
        }
    }
}

/// Drives search, exemplar selection and generation for each request,
/// reporting through an event channel.
pub struct SynthesisOrchestrator {
    search: SimilaritySearchEngine,
    model: Arc<dyn GenerativeModel>,
    selector: QualitySelector,
    retry: RetryPolicy,
    settings: OrchestratorSettings,
}

impl SynthesisOrchestrator {
    pub fn new(
        search: SimilaritySearchEngine,
        model: Arc<dyn GenerativeModel>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            search,
            model,
            selector: QualitySelector::default(),
            retry,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_selector(mut self, selector: QualitySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn search_engine(&self) -> &SimilaritySearchEngine {
        &self.search
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Validates a request. Nothing downstream runs for a rejected request.
    pub fn prepare(&self, request: SynthesisRequest) -> Result<QueryRequest, SynthesisError> {
        request.validate(self.settings.default_top_k)
    }

    /// Spawns a run and returns its event subscription.
    ///
    /// The run stops early when `cancel` fires or the subscription is
    /// dropped. Either way exactly one terminal event is sent.
    pub fn start(
        self: &Arc<Self>,
        query: QueryRequest,
        mode: DeliveryMode,
        cancel: CancellationToken,
    ) -> EventSubscription {
        let (sink, subscription) = event_channel(self.settings.channel_capacity);
        let this = Arc::clone(self);
        let span = tracing::info_span!("synthesis", request_id = %Uuid::new_v4(), ?mode);

        tokio::spawn(
            async move {
                tracing::info!(
                    "Starting synthesis (top_k={}, keywords={:?}, query_len={})",
                    query.top_k,
                    query.keywords,
                    query.query_text.len()
                );
                let outcome = tokio::select! {
                    outcome = this.run_staged(&query, mode, &sink, &cancel) => outcome,
                    _ = sink.closed() => {
                        cancel.cancel();
                        Err(SynthesisError::Cancelled)
                    }
                };
                sink.finish(outcome).await;
            }
            .instrument(span),
        );

        subscription
    }

    /// Validates and starts a streaming run.
    pub fn stream(
        self: &Arc<Self>,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<EventSubscription, SynthesisError> {
        let query = self.prepare(request)?;
        Ok(self.start(query, DeliveryMode::Streaming, cancel))
    }

    /// Blocking binding: runs the same staged pipeline and keeps only the
    /// terminal event. Dropping the returned future cancels the run.
    pub async fn synthesize(
        self: &Arc<Self>,
        request: SynthesisRequest,
    ) -> Result<SynthesisResult, FailedRun> {
        let query = self.prepare(request)?;
        let cancel = CancellationToken::new();
        let _guard = cancel.drop_guard();
        self.start(query, DeliveryMode::Blocking, cancel.clone())
            .into_result()
            .await
    }

    async fn run_staged(
        &self,
        query: &QueryRequest,
        mode: DeliveryMode,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<SynthesisResult, SynthesisError> {
        enter_stage(sink, cancel, Stage::Initialization, "Initializing therapy response synthesis")
            .await?;

        enter_stage(
            sink,
            cancel,
            Stage::Search,
            format!("Searching for up to {} similar examples", query.top_k),
        )
        .await?;
        let candidates = self.search.search(query, cancel).await?;
        let similar_examples: Vec<SimilarExample> =
            candidates.iter().map(SimilarExample::from).collect();
        let delivered = sink
            .emit(SynthesisEvent::SimilarExamples {
                examples: similar_examples.clone(),
            })
            .await;
        if !delivered {
            return Err(SynthesisError::Cancelled);
        }

        enter_stage(
            sink,
            cancel,
            Stage::Processing,
            format!("Selecting exemplar responses from {} example(s)", candidates.len()),
        )
        .await?;
        let exemplars = self
            .selector
            .select_all(&candidates, query.quality_filter.as_ref());

        let finish = |synthesized_response: String| SynthesisResult {
            similar_examples,
            synthesized_response,
            keywords: query.keywords.clone(),
            user_query: query.query_text.clone(),
        };

        if candidates.is_empty() {
            tracing::warn!("No similar examples found");
            return Ok(finish(NO_EXAMPLES_NOTICE.to_string()));
        }
        if exemplars.is_empty() {
            tracing::warn!("No exemplar responses found among {} candidates", candidates.len());
            return Ok(finish(NO_EXEMPLARS_NOTICE.to_string()));
        }

        enter_stage(
            sink,
            cancel,
            Stage::Synthesis,
            format!("Generating response from {} example(s)", exemplars.len()),
        )
        .await?;
        let request = build_chat_request(
            &query.query_text,
            &query.keywords,
            &exemplars,
            self.settings.temperature,
            self.settings.max_tokens,
        );

        let text = match mode {
            DeliveryMode::Blocking => {
                let text = self.generate(request, cancel).await?;
                sink.chunk(text.clone());
                text
            }
            DeliveryMode::Streaming => self.generate_streaming(request, sink, cancel).await?,
        };

        tracing::info!("Synthesis complete ({} chars)", text.len());
        Ok(finish(text))
    }

    async fn generate(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<String, SynthesisError> {
        let model = &self.model;
        let text = self
            .retry
            .run("generation", cancel, |_| model.generate(request.clone()))
            .await
            .map_err(generation_error)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(empty_generation());
        }
        Ok(text.to_string())
    }

    /// Only opening the stream is retried. Once deltas have been forwarded a
    /// failure is terminal. Chunks and the final text both drop trailing
    /// whitespace, so every chunk is a prefix of the result.
    async fn generate_streaming(
        &self,
        request: ChatRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<String, SynthesisError> {
        let model = &self.model;
        let mut rx = self
            .retry
            .run("generation stream", cancel, |_| {
                model.generate_stream(request.clone())
            })
            .await
            .map_err(generation_error)?;

        let mut text = String::new();
        let mut sent_len = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SynthesisError::Cancelled),
                next = rx.recv() => next,
            };

            match next {
                Some(Ok(delta)) => {
                    let delta = if text.is_empty() {
                        delta.trim_start()
                    } else {
                        delta.as_str()
                    };
                    text.push_str(delta);
                    // Trailing whitespace is held back until more text follows it.
                    let visible = text.trim_end();
                    if visible.len() <= sent_len {
                        continue;
                    }
                    sent_len = visible.len();
                    if !sink.chunk(visible.to_string()) {
                        return Err(SynthesisError::Cancelled);
                    }
                }
                Some(Err(err)) => return Err(SynthesisError::Generation(err)),
                None => break,
            }
        }

        let trimmed_len = text.trim_end().len();
        if trimmed_len == 0 {
            return Err(empty_generation());
        }
        text.truncate(trimmed_len);
        Ok(text)
    }
}

async fn enter_stage(
    sink: &EventSink,
    cancel: &CancellationToken,
    stage: Stage,
    message: impl Into<String>,
) -> Result<(), SynthesisError> {
    if cancel.is_cancelled() {
        return Err(SynthesisError::Cancelled);
    }
    let message = message.into();
    tracing::debug!(?stage, "{}", message);
    if !sink.progress(stage, message).await {
        return Err(SynthesisError::Cancelled);
    }
    Ok(())
}

fn generation_error(err: RetryError) -> SynthesisError {
    match err {
        RetryError::Cancelled => SynthesisError::Cancelled,
        RetryError::Failed { source, .. } => SynthesisError::Generation(source),
    }
}

fn empty_generation() -> SynthesisError {
    SynthesisError::Generation(ProviderError::Malformed(
        "model returned an empty response".to_string(),
    ))
}
