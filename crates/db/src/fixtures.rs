use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Row counts the sample dataset guarantees per table.
const EXPECTED_ROWS: &[(&str, i64)] = &[
    ("customers", 3),
    ("leads", 3),
    ("products", 5),
    ("orders", 2),
    ("order_items", 4),
    ("invoices", 2),
    ("payments", 1),
    ("ledger_entries", 6),
    ("stock", 6),
    ("suppliers", 2),
    ("purchase_orders", 2),
    ("glossary", 5),
];

/// Small deterministic ERP dataset used for demos, the CLI `seed` command and tests.
///
/// Every row carries a fixed primary key and is inserted with `INSERT OR IGNORE`, so
/// loading twice leaves the database unchanged.
pub struct SampleDataset;

impl SampleDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/erp_sample_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let mut tables = Vec::with_capacity(EXPECTED_ROWS.len());
        for (table, _) in EXPECTED_ROWS {
            tables.push((*table, count_rows(pool, table).await?));
        }
        tracing::info!(
            event_name = "system.db.fixtures.loaded",
            tables = tables.len(),
            "sample dataset loaded"
        );
        Ok(SeedResult { tables })
    }

    /// Checks that the anchor rows other components rely on are present.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (table, expected) in EXPECTED_ROWS {
            let actual = count_rows(pool, table).await?;
            checks.push((*table, actual >= *expected));
        }

        let john: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM customers WHERE email = 'john@example.com')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("customer-john", john == 1));

        let order_total: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM orders o
                WHERE o.id = 1
                  AND ABS(o.total_amount - (SELECT SUM(quantity * unit_price) FROM order_items WHERE order_id = 1)) < 0.005
            )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("order-1-total-matches-items", order_total == 1));

        let paid_invoice: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM invoices i JOIN payments p ON p.invoice_id = i.id
                WHERE i.id = 1 AND i.status = 'paid'
            )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("invoice-1-paid", paid_invoice == 1));

        let ledger_balanced: i64 = sqlx::query_scalar(
            "SELECT ABS(COALESCE(SUM(debit), 0) - COALESCE(SUM(credit), 0)) < 0.005 FROM ledger_entries",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("ledger-balanced", ledger_balanced == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

async fn count_rows(pool: &DbPool, table: &str) -> Result<i64, RepositoryError> {
    // Table names come from EXPECTED_ROWS only.
    let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(1) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub tables: Vec<(&'static str, i64)>,
}

impl SeedResult {
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SampleDataset;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn load_then_verify_passes() {
        let pool = migrated_pool().await;
        let seeded = SampleDataset::load(&pool).await.expect("load");
        assert!(seeded.total_rows() > 0);

        let verification = SampleDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.failed_checks());
    }

    #[tokio::test]
    async fn loading_twice_is_a_no_op() {
        let pool = migrated_pool().await;
        let first = SampleDataset::load(&pool).await.expect("first load");
        let second = SampleDataset::load(&pool).await.expect("second load");
        assert_eq!(first.tables, second.tables);
    }

    #[tokio::test]
    async fn verify_reports_missing_rows_on_empty_database() {
        let pool = migrated_pool().await;
        let verification = SampleDataset::verify(&pool).await.expect("verify");

        assert!(!verification.all_present);
        assert!(verification.failed_checks().contains(&"customer-john"));
    }

    #[test]
    fn fixture_sql_carries_reference_customers() {
        for email in ["john@example.com", "jane@example.com", "bob@example.com"] {
            assert!(SampleDataset::SQL.contains(email), "fixture should seed {email}");
        }
        assert!(SampleDataset::SQL.contains("INSERT OR IGNORE"));
    }
}
