#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Map;
use tokio::sync::mpsc;

use therapy_synth::core::config::{AppConfig, AppPaths};
use therapy_synth::core::errors::ProviderError;
use therapy_synth::core::retry::Backoff;
use therapy_synth::embedding::EmbeddingProvider;
use therapy_synth::index::{IndexHandle, IndexSnapshot, IndexedItem, QualityBuckets};
use therapy_synth::llm::{ChatRequest, DeltaReceiver, GenerativeModel};
use therapy_synth::state::AppState;

const VOCABULARY: [&str; 4] = ["sleep", "anxiety", "work", "family"];

/// Bag-of-words embedder over a tiny fixed vocabulary.
#[derive(Default)]
pub struct VocabEmbedder {
    pub calls: AtomicUsize,
}

impl VocabEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn vocab_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    // Bias term keeps every vector non-zero.
    vector.push(0.25);
    vector
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vocab_vector(text))
    }

    fn model_name(&self) -> &str {
        "vocab-embedder"
    }
}

/// Generative model that replays fixed deltas, fails every call, or stalls
/// after its deltas until the receiver is dropped.
pub struct FakeModel {
    deltas: Vec<String>,
    failing: bool,
    stall: bool,
    pub calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl FakeModel {
    pub fn replying(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            failing: false,
            stall: false,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::replying(&[])
        }
    }

    pub fn stalling(deltas: &[&str]) -> Self {
        Self {
            stall: true,
            ..Self::replying(deltas)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn record(&self, request: ChatRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    fn name(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, request: ChatRequest) -> Result<String, ProviderError> {
        self.record(request);
        if self.failing {
            return Err(ProviderError::Unreachable("connection refused".into()));
        }
        Ok(self.deltas.concat())
    }

    async fn generate_stream(&self, request: ChatRequest) -> Result<DeltaReceiver, ProviderError> {
        self.record(request);
        if self.failing {
            return Err(ProviderError::Unreachable("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        let deltas = self.deltas.clone();
        let stall = self.stall;
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

pub fn item(id: &str, position: u64, prompt: &str, keywords: &[&str], high: &[&str]) -> IndexedItem {
    IndexedItem {
        id: id.to_string(),
        position,
        raw_text: prompt.to_string(),
        embedding: vocab_vector(prompt),
        search_keywords: keywords.iter().map(|k| k.to_string()).collect(),
        quality_buckets: QualityBuckets {
            high: high.iter().map(|s| s.to_string()).collect(),
            medium: vec!["Could you say more about that?".to_string()],
            low: Vec::new(),
        },
        extra: Map::new(),
    }
}

/// Six exchanges; two tagged "Anxiety".
pub fn corpus() -> Vec<IndexedItem> {
    vec![
        item(
            "prompt_0",
            0,
            "I can't sleep and wake up every night",
            &["Sleep & Fatigue"],
            &["Let's look at your evening routine together."],
        ),
        item(
            "prompt_1",
            1,
            "Work stress keeps me up, sleep is short",
            &["Work", "Sleep & Fatigue"],
            &["It sounds like work follows you home."],
        ),
        item(
            "prompt_2",
            2,
            "My anxiety spikes before meetings at work",
            &["Anxiety", "Work"],
            &["What do you notice in your body before a meeting?"],
        ),
        item(
            "prompt_3",
            3,
            "Family dinners make me anxious",
            &["Family"],
            &["Family gatherings can carry a lot of history."],
        ),
        item(
            "prompt_4",
            4,
            "Constant anxiety, even at home with family",
            &["Anxiety", "Family"],
            &["When did you first notice the anxiety following you home?"],
        ),
        item(
            "prompt_5",
            5,
            "I feel fine but want to sleep better",
            &["Sleep & Fatigue"],
            &[],
        ),
    ]
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.max_attempts = 3;
    config.retry.backoff = Backoff::Fixed;
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config.retry.jitter = false;
    config
}

pub fn state_with(
    data_dir: &Path,
    index: IndexHandle,
    embedder: Arc<VocabEmbedder>,
    model: Arc<FakeModel>,
) -> Arc<AppState> {
    let paths = Arc::new(AppPaths::from_dirs(
        data_dir.to_path_buf(),
        data_dir.join("data"),
    ));
    Arc::new(AppState::from_parts(paths, test_config(), index, embedder, model))
}

pub fn loaded_index() -> IndexHandle {
    IndexHandle::new(IndexSnapshot::new(corpus(), Some("vocab-embedder".into())).unwrap())
}
