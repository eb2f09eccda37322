use async_trait::async_trait;
use helios_core::StatementKind;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::tools::ToolContext;

/// Which statement kinds need an approval before a write tool runs them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WritePolicy {
    pub require_for_inserts: bool,
}

impl WritePolicy {
    pub fn is_sensitive(&self, kind: StatementKind) -> bool {
        match kind {
            StatementKind::Select => false,
            StatementKind::Insert => self.require_for_inserts,
            StatementKind::Update
            | StatementKind::Delete
            | StatementKind::Schema
            | StatementKind::Other => true,
        }
    }
}

/// A sensitive statement waiting for a decision.
#[derive(Clone, Copy, Debug)]
pub struct ApprovalRequest<'a> {
    pub tool_name: &'a str,
    pub statement: &'a str,
    pub kind: StatementKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Refused { reason_code: &'static str },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, request: ApprovalRequest<'_>, context: &ToolContext)
        -> ApprovalDecision;
}

/// Approves when the request context carries a token equal to the configured secret.
///
/// With no configured secret nothing is ever approved.
pub struct TokenApprovalGate {
    expected: Option<SecretString>,
}

impl TokenApprovalGate {
    pub fn new(expected: Option<SecretString>) -> Self {
        let expected = expected.filter(|token| !token.expose_secret().trim().is_empty());
        Self { expected }
    }
}

#[async_trait]
impl ApprovalGate for TokenApprovalGate {
    async fn review(
        &self,
        _request: ApprovalRequest<'_>,
        context: &ToolContext,
    ) -> ApprovalDecision {
        let Some(expected) = &self.expected else {
            return ApprovalDecision::Refused { reason_code: "approval_not_configured" };
        };
        let Some(supplied) = &context.approval_token else {
            return ApprovalDecision::Refused { reason_code: "approval_token_missing" };
        };
        if constant_time_eq(expected.expose_secret().as_bytes(), supplied.expose_secret().as_bytes())
        {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Refused { reason_code: "approval_token_mismatch" }
        }
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.ct_eq(right).into()
}

/// Human-in-the-loop gate: defers the decision to a caller-supplied closure.
pub struct CallbackApprovalGate<F> {
    callback: F,
}

impl<F> CallbackApprovalGate<F>
where
    F: Fn(&ApprovalRequest<'_>, &ToolContext) -> bool + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ApprovalGate for CallbackApprovalGate<F>
where
    F: Fn(&ApprovalRequest<'_>, &ToolContext) -> bool + Send + Sync,
{
    async fn review(
        &self,
        request: ApprovalRequest<'_>,
        context: &ToolContext,
    ) -> ApprovalDecision {
        if (self.callback)(&request, context) {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Refused { reason_code: "approval_declined" }
        }
    }
}
