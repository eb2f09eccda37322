use async_trait::async_trait;
use thiserror::Error;

pub mod glossary;
pub mod memory;

pub use glossary::SqlGlossaryRepository;
pub use memory::InMemoryGlossaryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Exact-match term lookup backing the glossary tool.
#[async_trait]
pub trait GlossaryRepository: Send + Sync {
    async fn definition(&self, term: &str) -> Result<Option<String>, RepositoryError>;
}
