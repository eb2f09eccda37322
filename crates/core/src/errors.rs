use thiserror::Error;

use crate::domain::intent::Intent;
use crate::domain::statement::StatementKind;

/// Failure classes of the agent core.
///
/// Only routing, iteration-limit, deadline, and inference failures ever reach a caller;
/// the rest are turned into observations that feed the next reasoning step.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),
    #[error("query execution failed: {0}")]
    QueryExecution(String),
    #[error("could not parse model output: {reason}")]
    CompletionParse { reason: String },
    #[error("no agent is bound to intent `{intent}`")]
    RoutingUnresolved { intent: Intent },
    #[error("no final answer after {iterations} reasoning steps")]
    IterationLimitExceeded { iterations: usize },
    #[error("request exceeded its {timeout_secs}s deadline")]
    DeadlineExceeded { timeout_secs: u64 },
    #[error("inference service failure: {0}")]
    Inference(String),
    #[error("{statement_kind} statements require approval")]
    ApprovalRequired { statement_kind: StatementKind },
}

impl AgentError {
    /// Text fed back into the reasoning loop as an observation.
    pub fn observation(&self) -> String {
        match self {
            Self::ToolNotFound(name) => {
                format!("Tool '{name}' is not available. Choose one of the listed tools.")
            }
            Self::QueryExecution(detail) => format!("SQL Error: {detail}"),
            Self::CompletionParse { reason } => format!(
                "Invalid format: {reason}. Reply with either `Action:` and `Action Input:` lines or a `Final Answer:` line."
            ),
            Self::ApprovalRequired { statement_kind } => format!(
                "Approval required: {statement_kind} statements are sensitive and were not executed. Ask the user to resubmit the request with an approval token."
            ),
            other => other.to_string(),
        }
    }

    /// Text returned to the end user when this error ends a request.
    pub fn user_message(&self) -> String {
        match self {
            Self::RoutingUnresolved { intent } => format!(
                "Sorry, that request is not implemented yet. It was routed to: '{intent}'."
            ),
            Self::IterationLimitExceeded { iterations } => format!(
                "I could not reach an answer within {iterations} reasoning steps. Please rephrase or narrow the request."
            ),
            Self::DeadlineExceeded { timeout_secs } => {
                format!("The request timed out after {timeout_secs} seconds. Please try again.")
            }
            Self::Inference(_) => {
                "The language model is unavailable right now. Please retry shortly.".to_string()
            }
            other => other.observation(),
        }
    }
}
