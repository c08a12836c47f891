use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::ProviderError;

/// Stream of text deltas produced by a generation call.
pub type DeltaReceiver = mpsc::Receiver<Result<String, ProviderError>>;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// model name as reported in logs and status output
    fn name(&self) -> &str;

    /// whole completion in one call
    async fn generate(&self, request: ChatRequest) -> Result<String, ProviderError>;

    /// completion as incremental deltas; the channel closes when generation ends
    async fn generate_stream(&self, request: ChatRequest) -> Result<DeltaReceiver, ProviderError>;
}
