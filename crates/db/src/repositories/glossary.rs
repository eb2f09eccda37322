use async_trait::async_trait;

use super::{GlossaryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlGlossaryRepository {
    pool: DbPool,
}

impl SqlGlossaryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GlossaryRepository for SqlGlossaryRepository {
    async fn definition(&self, term: &str) -> Result<Option<String>, RepositoryError> {
        let definition = sqlx::query_scalar::<_, String>(
            "SELECT definition FROM glossary WHERE term = ?1",
        )
        .bind(term)
        .fetch_optional(&self.pool)
        .await?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlGlossaryRepository;
    use crate::repositories::GlossaryRepository;
    use crate::{connect_with_settings, migrations, SampleDataset};

    async fn seeded_repository() -> SqlGlossaryRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SampleDataset::load(&pool).await.expect("seed");
        SqlGlossaryRepository::new(pool)
    }

    #[tokio::test]
    async fn finds_seeded_term() {
        let repo = seeded_repository().await;
        let definition = repo.definition("DSO").await.expect("lookup");
        assert!(definition.expect("DSO is seeded").starts_with("Days sales outstanding"));
    }

    #[tokio::test]
    async fn lookup_is_exact_match() {
        let repo = seeded_repository().await;
        assert_eq!(repo.definition("dso").await.expect("lookup"), None);
        assert_eq!(repo.definition("DSO ").await.expect("lookup"), None);
    }
}
