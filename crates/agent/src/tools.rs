use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use helios_core::{AgentError, SessionId};
use secrecy::SecretString;

/// Per-request context handed to every tool invocation.
///
/// The approval token comes from the inbound request, never from model output.
pub struct ToolContext {
    pub session_id: SessionId,
    pub approval_token: Option<SecretString>,
}

impl ToolContext {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id, approval_token: None }
    }

    pub fn with_approval_token(mut self, token: Option<SecretString>) -> Self {
        self.approval_token = token;
        self
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("has_approval_token", &self.approval_token.is_some())
            .finish()
    }
}

/// A named capability the reasoning agents can invoke with text input.
///
/// `run` never fails: expected failures come back as observation text.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self, input: &str, context: &ToolContext) -> String;
}

/// Name to tool bindings, built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    /// Binds `tool` under its name. A previous binding with the same name is replaced.
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(
                event_name = "system.agent.tools.overwritten",
                tool = %name,
                "tool re-registered, previous binding replaced"
            );
        } else {
            tracing::debug!(event_name = "system.agent.tools.registered", tool = %name);
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.tools.get(name).cloned().ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tools.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Strips the wrapping models tend to put around tool input: whitespace, code fences,
/// and matching quotes or backticks.
pub fn normalize_tool_input(raw: &str) -> String {
    let mut value = raw.trim();

    if let Some(rest) = value.strip_prefix("```") {
        // An opening fence may carry a lowercase language tag such as `sql`.
        let rest = match rest.split_once('\n') {
            Some((tag, body))
                if tag.trim().chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
            {
                body
            }
            _ => rest,
        };
        value = rest.trim();
        value = value.strip_suffix("```").unwrap_or(value).trim();
    }

    while let Some(inner) = strip_matching_quotes(value) {
        value = inner.trim();
    }

    value.to_string()
}

fn strip_matching_quotes(value: &str) -> Option<&str> {
    ['"', '\'', '`']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote).and_then(|inner| inner.strip_suffix(quote)))
}
