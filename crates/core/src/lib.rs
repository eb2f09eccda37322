pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{render_history, ConversationTurn, SessionId};
pub use domain::intent::Intent;
pub use domain::statement::{split_statements, StatementKind};
pub use errors::AgentError;
