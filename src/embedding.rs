//! Text embedding seam.
//!
//! The same provider must embed both the corpus at index-build time and the
//! query at request time; vectors from different models are not comparable.

use async_trait::async_trait;

use crate::core::errors::ProviderError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Model identifier, recorded alongside a built index.
    fn model_name(&self) -> &str;
}
