use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::ErrorKind;
use crate::index::{Candidate, QualityBuckets};

/// Pipeline stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialization,
    Search,
    Processing,
    Synthesis,
}

/// Metadata attached to a similar example on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleMetadata {
    pub search_keywords: Vec<String>,
    pub quality_buckets: QualityBuckets,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Caller-facing projection of a `Candidate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarExample {
    pub id: String,
    pub prompt: String,
    pub similarity_score: f32,
    pub metadata: ExampleMetadata,
}

impl From<&Candidate> for SimilarExample {
    fn from(candidate: &Candidate) -> Self {
        let item = &candidate.item;
        Self {
            id: item.id.clone(),
            prompt: item.raw_text.clone(),
            similarity_score: candidate.similarity_score,
            metadata: ExampleMetadata {
                search_keywords: item.search_keywords.iter().cloned().collect(),
                quality_buckets: item.quality_buckets.clone(),
                extra: item.extra.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub similar_examples: Vec<SimilarExample>,
    pub synthesized_response: String,
    pub keywords: Vec<String>,
    pub user_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SynthesisEvent {
    Progress { stage: Stage, message: String },
    SimilarExamples { examples: Vec<SimilarExample> },
    /// Cumulative text generated so far, not a delta.
    ResponseChunk { content: String },
    Complete { result: SynthesisResult },
    Error { message: String, kind: ErrorKind },
}

impl SynthesisEvent {
    pub fn progress(stage: Stage, message: impl Into<String>) -> Self {
        SynthesisEvent::Progress {
            stage,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SynthesisEvent::Complete { .. } | SynthesisEvent::Error { .. }
        )
    }

    /// Value of the `type` discriminator, also used as the SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            SynthesisEvent::Progress { .. } => "progress",
            SynthesisEvent::SimilarExamples { .. } => "similar_examples",
            SynthesisEvent::ResponseChunk { .. } => "response_chunk",
            SynthesisEvent::Complete { .. } => "complete",
            SynthesisEvent::Error { .. } => "error",
        }
    }
}
