//! Agent core - routing, reasoning and tool dispatch for the Helios ERP assistant
//!
//! A prompt flows through this crate as follows:
//! 1. **Classification** (`classifier`) - map free text to an `Intent`
//! 2. **Routing** (`router`) - pick the domain agent bound to that intent
//! 3. **Reasoning** (`reasoning`) - bounded thought/action/observation loop
//! 4. **Tool dispatch** (`tools`, `sql_tools`) - registry lookup and data access
//! 5. **Memory** (`memory`) - the turn is appended to its session's history
//!
//! # Key Types
//!
//! - `AgentRouter` - entry point, turns a `ChatRequest` into a `ChatResponse`
//! - `ReasoningAgent` - one per domain, configured by an `AgentProfile`
//! - `ToolRegistry` - immutable name to tool map shared by all agents
//! - `LlmClient` - the inference-service boundary
//!
//! # Safety
//!
//! Read tools only run read-only statements. Sensitive writes need approval from an
//! `ApprovalGate`, and the approval token only ever comes from the inbound request.

pub mod classifier;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod profiles;
pub mod reasoning;
pub mod router;
pub mod sql_tools;
pub mod tools;

pub use classifier::{IntentClassifier, KeywordClassifier, LlmClassifier};
pub use guardrails::{ApprovalGate, CallbackApprovalGate, TokenApprovalGate, WritePolicy};
pub use llm::{check_model_available, client_from_config, pull_model, LlmClient, ScriptedLlm};
pub use memory::ConversationMemory;
pub use profiles::AgentProfile;
pub use reasoning::{parse_completion, ReasoningAgent, StepDecision};
pub use router::{AgentRouter, ChatRequest, ChatResponse};
pub use tools::{Tool, ToolContext, ToolRegistry};
