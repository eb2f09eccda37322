use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{GlossaryRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryGlossaryRepository {
    terms: RwLock<HashMap<String, String>>,
}

impl InMemoryGlossaryRepository {
    pub fn with_terms<I, K, V>(terms: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let terms = terms.into_iter().map(|(term, definition)| (term.into(), definition.into()));
        Self { terms: RwLock::new(terms.collect()) }
    }
}

#[async_trait]
impl GlossaryRepository for InMemoryGlossaryRepository {
    async fn definition(&self, term: &str) -> Result<Option<String>, RepositoryError> {
        let terms = self.terms.read().await;
        Ok(terms.get(term).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryGlossaryRepository;
    use crate::repositories::GlossaryRepository;

    #[tokio::test]
    async fn in_memory_glossary_round_trip() {
        let repo = InMemoryGlossaryRepository::with_terms([("AOV", "Average order value.")]);
        assert_eq!(repo.definition("AOV").await.expect("lookup").as_deref(), Some("Average order value."));
        assert_eq!(repo.definition("ARR").await.expect("lookup"), None);
    }
}
