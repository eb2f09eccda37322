pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod statements;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use fixtures::{SampleDataset, SeedResult, VerificationResult};
pub use repositories::{
    GlossaryRepository, InMemoryGlossaryRepository, RepositoryError, SqlGlossaryRepository,
};
pub use statements::{CellValue, QueryOutput, StatementError, StatementExecutor};
