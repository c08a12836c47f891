use thiserror::Error;

use crate::core::errors::{ConfigError, IndexError, ProviderError};

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] ConfigError),

    #[error("Failed to open the similarity index: {0}")]
    Index(#[source] IndexError),

    #[error("Failed to build the embedding client: {0}")]
    Embedding(#[source] ProviderError),

    #[error("Failed to build the generation client: {0}")]
    Generation(#[source] ProviderError),
}
