use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use helios_core::config::{AppConfig, ClassifierStrategy};
use helios_core::{AgentError, ConversationTurn, Intent, SessionId};
use helios_db::{SqlGlossaryRepository, StatementExecutor};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::classifier::{IntentClassifier, KeywordClassifier, LlmClassifier};
use crate::guardrails::{ApprovalGate, TokenApprovalGate, WritePolicy};
use crate::llm::LlmClient;
use crate::memory::ConversationMemory;
use crate::profiles::AgentProfile;
use crate::reasoning::ReasoningAgent;
use crate::sql_tools::{register_default_tools, ToolDependencies};
use crate::tools::{ToolContext, ToolRegistry};

/// Inbound chat request.
#[derive(Clone, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_token")]
    pub approval_token: Option<SecretString>,
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let token = Option::<String>::deserialize(deserializer)?;
    Ok(token.filter(|value| !value.trim().is_empty()).map(SecretString::from))
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), session_id: None, approval_token: None }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_approval_token(mut self, token: impl Into<String>) -> Self {
        self.approval_token = Some(token.into().into());
        self
    }
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("prompt", &self.prompt)
            .field("session_id", &self.session_id)
            .field("has_approval_token", &self.approval_token.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub agent_used: String,
    pub session_id: String,
}

/// Classifies a prompt, hands it to the matching domain agent and records the turn.
pub struct AgentRouter {
    classifier: Arc<dyn IntentClassifier>,
    agents: HashMap<Intent, ReasoningAgent>,
    memory: Arc<ConversationMemory>,
    request_timeout: Duration,
}

impl AgentRouter {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        memory: Arc<ConversationMemory>,
        request_timeout: Duration,
    ) -> Self {
        Self { classifier, agents: HashMap::new(), memory, request_timeout }
    }

    /// Binds `agent` to the intent of its profile, replacing any previous binding.
    pub fn with_agent(mut self, agent: ReasoningAgent) -> Self {
        self.agents.insert(agent.profile().intent, agent);
        self
    }

    /// Wires the full tool catalogue and the four domain agents from configuration.
    pub fn from_config(
        config: &AppConfig,
        executor: StatementExecutor,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, tera::Error> {
        let gate: Arc<dyn ApprovalGate> =
            Arc::new(TokenApprovalGate::new(config.approval.token.clone()));
        let mut registry = ToolRegistry::new();
        register_default_tools(
            &mut registry,
            ToolDependencies {
                glossary: Arc::new(SqlGlossaryRepository::new(executor.pool().clone())),
                executor,
                llm: Arc::clone(&llm),
                gate,
                policy: WritePolicy { require_for_inserts: config.approval.require_for_inserts },
            },
        );
        let registry = Arc::new(registry);

        let classifier: Arc<dyn IntentClassifier> = match config.agent.classifier {
            ClassifierStrategy::Keyword => Arc::new(KeywordClassifier),
            ClassifierStrategy::Llm => Arc::new(LlmClassifier::new(Arc::clone(&llm))),
        };
        let memory =
            Arc::new(ConversationMemory::new(config.agent.memory_window, config.agent.max_sessions));

        let mut router = Self::new(
            classifier,
            memory,
            Duration::from_secs(config.agent.request_timeout_secs),
        );
        for profile in AgentProfile::all() {
            let agent = ReasoningAgent::new(
                profile,
                Arc::clone(&registry),
                Arc::clone(&llm),
                config.agent.max_iterations,
            )?
            .with_structured_output(config.llm.structured_output);
            router = router.with_agent(agent);
        }
        Ok(router)
    }

    pub async fn route(&self, prompt: &str) -> Intent {
        self.classifier.classify(prompt).await
    }

    /// Runs the agent bound to `intent`. Every outcome, including failures, is answer text.
    pub async fn dispatch(&self, prompt: &str, intent: Intent, context: &ToolContext) -> String {
        self.dispatch_until(prompt, intent, context, Instant::now() + self.request_timeout).await
    }

    async fn dispatch_until(
        &self,
        prompt: &str,
        intent: Intent,
        context: &ToolContext,
        deadline: Instant,
    ) -> String {
        let Some(agent) = self.agents.get(&intent) else {
            return AgentError::RoutingUnresolved { intent }.user_message();
        };

        let history = self.memory.load(&context.session_id).await;
        let run = agent.run(prompt, &history, context);
        match tokio::time::timeout_at(deadline, run).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "system.agent.router.agent_failed",
                    intent = %intent,
                    session_id = %context.session_id,
                    error = %error,
                    "agent run ended without an answer"
                );
                error.user_message()
            }
            Err(_) => {
                let error =
                    AgentError::DeadlineExceeded { timeout_secs: self.request_timeout.as_secs() };
                tracing::warn!(
                    event_name = "system.agent.router.deadline_exceeded",
                    intent = %intent,
                    session_id = %context.session_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "agent run aborted at deadline"
                );
                error.user_message()
            }
        }
    }

    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let session_id = SessionId::from_optional(request.session_id.as_deref());
        let context =
            ToolContext::new(session_id.clone()).with_approval_token(request.approval_token);

        // Classification and the agent run share one deadline.
        let deadline = Instant::now() + self.request_timeout;
        let (intent, response) =
            match tokio::time::timeout_at(deadline, self.route(&request.prompt)).await {
                Ok(intent) => {
                    tracing::info!(
                        event_name = "system.agent.router.dispatch",
                        intent = %intent,
                        session_id = %session_id,
                        "request routed"
                    );
                    let response =
                        self.dispatch_until(&request.prompt, intent, &context, deadline).await;
                    (intent, response)
                }
                Err(_) => {
                    let intent = KeywordClassifier.classify_text(&request.prompt);
                    tracing::warn!(
                        event_name = "system.agent.router.classification_deadline_exceeded",
                        fallback_intent = %intent,
                        session_id = %session_id,
                        timeout_secs = self.request_timeout.as_secs(),
                        "classification did not finish before the request deadline"
                    );
                    let error = AgentError::DeadlineExceeded {
                        timeout_secs: self.request_timeout.as_secs(),
                    };
                    (intent, error.user_message())
                }
            };
        self.memory.append(&session_id, ConversationTurn::new(request.prompt, response.clone())).await;
        let live_sessions = self.memory.session_count().await;
        tracing::debug!(
            event_name = "system.agent.memory.appended",
            session_id = %session_id,
            live_sessions = live_sessions,
        );

        ChatResponse {
            response,
            agent_used: intent.agent_label().to_string(),
            session_id: session_id.to_string(),
        }
    }
}
