use std::fmt::Write as _;
use std::sync::Arc;

use helios_core::{render_history, AgentError, ConversationTurn};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::LlmClient;
use crate::profiles::{
    json_format_instructions, text_format_instructions, AgentProfile, PromptTemplate, PromptVars,
};
use crate::tools::{ToolContext, ToolRegistry};

/// What one completion asks the loop to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepDecision {
    Action { thought: String, tool: String, input: String },
    Final { thought: String, answer: String },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StructuredStep {
    Action {
        #[serde(default)]
        thought: String,
        tool: String,
        #[serde(default)]
        input: Value,
    },
    Final {
        #[serde(default)]
        thought: String,
        text: String,
    },
}

/// Parses one completion into an action or a final answer.
///
/// Anything after the first `Observation:` line is discarded. The structured JSON form is
/// tried first, then the `Thought / Action / Action Input` / `Final Answer` text form.
pub fn parse_completion(completion: &str) -> Result<StepDecision, AgentError> {
    let completion = truncate_at_observation(completion);

    if let Some(step) = parse_structured(completion) {
        return step;
    }
    parse_text(completion)
}

fn truncate_at_observation(completion: &str) -> &str {
    match find_marker(completion, "observation:") {
        Some(position) => &completion[..position],
        None => completion,
    }
}

fn parse_structured(completion: &str) -> Option<Result<StepDecision, AgentError>> {
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    if end < start {
        return None;
    }
    // Only treat the completion as JSON when nothing but fences surrounds the object.
    let outside = format!("{}{}", &completion[..start], &completion[end + 1..]);
    let outside = outside.replace("```json", "").replace("```", "");
    if !outside.trim().is_empty() {
        return None;
    }

    let step = serde_json::from_str::<StructuredStep>(&completion[start..=end]).ok()?;
    Some(match step {
        StructuredStep::Action { thought, tool, input } => {
            let input = match input {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let tool = clean_tool_name(&tool);
            if tool.is_empty() {
                Err(parse_error("the action names no tool"))
            } else {
                Ok(StepDecision::Action { thought, tool, input })
            }
        }
        StructuredStep::Final { thought, text } if !text.trim().is_empty() => {
            Ok(StepDecision::Final { thought, answer: text.trim().to_string() })
        }
        StructuredStep::Final { .. } => Err(parse_error("the final answer is empty")),
    })
}

fn parse_text(completion: &str) -> Result<StepDecision, AgentError> {
    let action = find_marker(completion, "action:");
    let action_input = find_marker(completion, "action input:");
    let final_answer = find_marker(completion, "final answer:");

    let first_marker = [action, action_input, final_answer].into_iter().flatten().min();
    let thought = match find_marker(completion, "thought:") {
        Some(position) if first_marker.map_or(true, |first| position < first) => {
            let body = &completion[position + "thought:".len()..];
            let end = first_marker.map_or(body.len(), |first| first - position - "thought:".len());
            body[..end].trim().to_string()
        }
        _ => completion[..first_marker.unwrap_or(completion.len())].trim().to_string(),
    };

    match (action, final_answer) {
        (Some(_), Some(_)) => {
            Err(parse_error("the reply contains both an action and a final answer"))
        }
        (None, Some(position)) => {
            let answer = completion[position + "final answer:".len()..].trim();
            if answer.is_empty() {
                Err(parse_error("the final answer is empty"))
            } else {
                Ok(StepDecision::Final { thought, answer: answer.to_string() })
            }
        }
        (Some(position), None) => {
            let line = completion[position + "action:".len()..].lines().next().unwrap_or("");
            let tool = clean_tool_name(line);
            if tool.is_empty() {
                return Err(parse_error("the action names no tool"));
            }
            let Some(input_position) = action_input else {
                return Err(parse_error("`Action:` was not followed by `Action Input:`"));
            };
            let input = completion[input_position + "action input:".len()..].trim().to_string();
            Ok(StepDecision::Action { thought, tool, input })
        }
        (None, None) => Err(parse_error("no `Action:` or `Final Answer:` found")),
    }
}

/// Byte offset of `marker` at the start of a line, compared case-insensitively.
fn find_marker(text: &str, marker: &str) -> Option<usize> {
    let lowered = text.to_ascii_lowercase();
    lowered.match_indices(marker).map(|(position, _)| position).find(|position| {
        lowered[..*position]
            .rsplit('\n')
            .next()
            .map_or(true, |line_prefix| line_prefix.trim().is_empty())
    })
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim().trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '[' | ']' | '*')).trim().to_string()
}

fn parse_error(reason: &str) -> AgentError {
    AgentError::CompletionParse { reason: reason.to_string() }
}

/// One completed iteration of the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceStep {
    Action { thought: String, tool: String, input: String, observation: String },
    Invalid { completion: String, observation: String },
}

/// Renders prior steps as `Thought / Action / Action Input / Observation` blocks.
pub fn render_scratchpad(trace: &[TraceStep]) -> String {
    let mut out = String::new();
    for step in trace {
        match step {
            TraceStep::Action { thought, tool, input, observation } => {
                let _ = write!(
                    out,
                    "Thought: {thought}\nAction: {tool}\nAction Input: {input}\nObservation: {observation}\n"
                );
            }
            TraceStep::Invalid { completion, observation } => {
                let _ = write!(out, "{}\nObservation: {observation}\n", completion.trim());
            }
        }
    }
    out
}

/// Thought/action/observation loop for one domain.
pub struct ReasoningAgent {
    profile: AgentProfile,
    prompt: PromptTemplate,
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    max_iterations: usize,
    structured_output: bool,
}

impl ReasoningAgent {
    pub fn new(
        profile: AgentProfile,
        registry: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        max_iterations: usize,
    ) -> Result<Self, tera::Error> {
        let prompt = PromptTemplate::compile(&profile)?;
        Ok(Self {
            profile,
            prompt,
            registry,
            llm,
            max_iterations: max_iterations.max(1),
            structured_output: false,
        })
    }

    pub fn with_structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Runs the loop to a final answer.
    ///
    /// Tool and parse failures become observations. Only the iteration cap and inference
    /// failures end the run with an error.
    pub async fn run(
        &self,
        input: &str,
        history: &[ConversationTurn],
        context: &ToolContext,
    ) -> Result<String, AgentError> {
        let tool_names = self.profile.tools.join(", ");
        let tool_descriptions = self.describe_tools();
        let format_instructions = if self.structured_output {
            json_format_instructions(&tool_names)
        } else {
            text_format_instructions(&tool_names)
        };
        let history = render_history(history);
        let mut trace = Vec::new();

        for iteration in 1..=self.max_iterations {
            let scratchpad = render_scratchpad(&trace);
            let prompt = self
                .prompt
                .render(&PromptVars {
                    tools: &tool_descriptions,
                    tool_names: &tool_names,
                    format_instructions: &format_instructions,
                    history: &history,
                    input,
                    agent_scratchpad: &scratchpad,
                })
                .map_err(|error| AgentError::Inference(format!("prompt rendering failed: {error}")))?;

            let completion = self
                .llm
                .complete(&prompt)
                .await
                .map_err(|error| AgentError::Inference(format!("{error:#}")))?;

            tracing::debug!(
                event_name = "system.agent.reasoning.step",
                agent = self.profile.name(),
                session_id = %context.session_id,
                iteration,
                "completion received"
            );

            match parse_completion(&completion) {
                Ok(StepDecision::Final { answer, .. }) => {
                    tracing::debug!(
                        event_name = "system.agent.reasoning.final_answer",
                        agent = self.profile.name(),
                        session_id = %context.session_id,
                        iterations = iteration,
                    );
                    return Ok(answer);
                }
                Ok(StepDecision::Action { thought, tool, input: tool_input }) => {
                    let observation = self.invoke(&tool, &tool_input, context).await;
                    trace.push(TraceStep::Action { thought, tool, input: tool_input, observation });
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "system.agent.reasoning.parse_failed",
                        agent = self.profile.name(),
                        session_id = %context.session_id,
                        iteration,
                        error = %error,
                        "completion could not be parsed"
                    );
                    trace.push(TraceStep::Invalid {
                        completion: truncate_at_observation(&completion).to_string(),
                        observation: error.observation(),
                    });
                }
            }
        }

        tracing::warn!(
            event_name = "system.agent.reasoning.iteration_limit",
            agent = self.profile.name(),
            session_id = %context.session_id,
            max_iterations = self.max_iterations,
            "no final answer within iteration cap"
        );
        Err(AgentError::IterationLimitExceeded { iterations: self.max_iterations })
    }

    async fn invoke(&self, tool_name: &str, input: &str, context: &ToolContext) -> String {
        if !self.profile.permits(tool_name) {
            tracing::warn!(
                event_name = "system.agent.tools.not_permitted",
                agent = self.profile.name(),
                tool = %tool_name,
                session_id = %context.session_id,
                "model requested a tool outside its profile"
            );
            return AgentError::ToolNotFound(tool_name.to_string()).observation();
        }

        let tool = match self.registry.resolve(tool_name) {
            Ok(tool) => tool,
            Err(error) => {
                tracing::warn!(
                    event_name = "system.agent.tools.unresolved",
                    tool = %tool_name,
                    session_id = %context.session_id,
                    "permitted tool is not registered"
                );
                return error.observation();
            }
        };

        tracing::info!(
            event_name = "system.agent.tools.invoked",
            agent = self.profile.name(),
            tool = %tool_name,
            session_id = %context.session_id,
            "invoking tool"
        );
        tool.run(input, context).await
    }

    fn describe_tools(&self) -> String {
        self.profile
            .tools
            .iter()
            .map(|name| match self.registry.resolve(name) {
                Ok(tool) => format!("{name}: {}", tool.description()),
                Err(_) => format!("{name}: (unavailable)"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use helios_core::{AgentError, ConversationTurn, Intent, SessionId};

    use super::{parse_completion, render_scratchpad, ReasoningAgent, StepDecision, TraceStep};
    use crate::llm::ScriptedLlm;
    use crate::profiles::AgentProfile;
    use crate::tools::{Tool, ToolContext, ToolRegistry};

    struct FixedTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Returns a fixed reply."
        }

        async fn run(&self, input: &str, _context: &ToolContext) -> String {
            if input.contains("INSER ") {
                "SQL Error: near \"INSER\": syntax error".to_string()
            } else {
                self.reply.to_string()
            }
        }
    }

    fn sales_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(FixedTool { name: "sales_sql_read", reply: "| email |\n| --- |\n| john@example.com |" });
        registry.register(FixedTool { name: "sales_sql_write", reply: "SQL write operation successful. Rows affected: 1" });
        registry.register(FixedTool { name: "finance_sql_write", reply: "should never run" });
        Arc::new(registry)
    }

    fn agent(llm: Arc<ScriptedLlm>, max_iterations: usize) -> ReasoningAgent {
        let profile = AgentProfile::for_intent(Intent::Sales).expect("sales profile");
        ReasoningAgent::new(profile, sales_registry(), llm, max_iterations).expect("agent")
    }

    fn context() -> ToolContext {
        ToolContext::new(SessionId("reasoning".to_string()))
    }

    #[test]
    fn parses_text_action() {
        let decision = parse_completion(
            "Thought: I should look up customers\nAction: sales_sql_read\nAction Input: SELECT * FROM customers",
        )
        .expect("action");

        assert_eq!(
            decision,
            StepDecision::Action {
                thought: "I should look up customers".to_string(),
                tool: "sales_sql_read".to_string(),
                input: "SELECT * FROM customers".to_string(),
            }
        );
    }

    #[test]
    fn parses_final_answer_and_drops_hallucinated_observation() {
        let decision = parse_completion(
            "Thought: done\nFinal Answer: There are 3 customers.\nObservation: made up\nAction: sales_sql_write",
        )
        .expect("final");
        assert_eq!(
            decision,
            StepDecision::Final {
                thought: "done".to_string(),
                answer: "There are 3 customers.".to_string()
            }
        );
    }

    #[test]
    fn parses_structured_json_even_when_fenced() {
        let decision = parse_completion(
            "```json\n{\"kind\": \"action\", \"tool\": \"sales_sql_read\", \"input\": \"SELECT 1\"}\n```",
        )
        .expect("structured action");
        assert!(matches!(decision, StepDecision::Action { ref tool, .. } if tool == "sales_sql_read"));

        let final_answer =
            parse_completion("{\"kind\": \"final\", \"text\": \"All done.\"}").expect("final");
        assert!(matches!(final_answer, StepDecision::Final { ref answer, .. } if answer == "All done."));
    }

    #[test]
    fn rejects_ambiguous_or_empty_completions() {
        let both = parse_completion("Action: sales_sql_read\nAction Input: x\nFinal Answer: y");
        assert!(matches!(both, Err(AgentError::CompletionParse { .. })));

        let neither = parse_completion("I am not sure what to do.");
        assert!(matches!(neither, Err(AgentError::CompletionParse { .. })));

        let missing_input = parse_completion("Action: sales_sql_read");
        assert!(matches!(missing_input, Err(AgentError::CompletionParse { .. })));
    }

    #[test]
    fn markers_must_start_a_line() {
        let decision = parse_completion("Thought: the column is named final answer: no\nFinal Answer: ok")
            .expect("final");
        assert!(matches!(decision, StepDecision::Final { ref answer, .. } if answer == "ok"));
    }

    #[test]
    fn scratchpad_renders_steps_in_order() {
        let rendered = render_scratchpad(&[TraceStep::Action {
            thought: "look".to_string(),
            tool: "sales_sql_read".to_string(),
            input: "SELECT 1".to_string(),
            observation: "| 1 |".to_string(),
        }]);
        assert_eq!(
            rendered,
            "Thought: look\nAction: sales_sql_read\nAction Input: SELECT 1\nObservation: | 1 |\n"
        );
    }

    #[tokio::test]
    async fn runs_tool_then_answers() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought: list customers\nAction: sales_sql_read\nAction Input: SELECT email FROM customers",
            "Thought: I now know the final answer\nFinal Answer: The customer is john@example.com.",
        ]));
        let history = vec![ConversationTurn::new("hello", "hi there")];

        let answer =
            agent(llm.clone(), 5).run("show me all customers", &history, &context()).await.expect("answer");

        assert_eq!(answer, "The customer is john@example.com.");
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Human: hello\nAI: hi there"));
        assert!(prompts[0].contains("sales_sql_read: Returns a fixed reply."));
        assert!(prompts[1].contains("Observation: | email |"));
    }

    #[tokio::test]
    async fn stops_at_iteration_cap_when_no_final_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec!["just rambling"; 10]));

        let result = agent(llm.clone(), 3).run("anything", &[], &context()).await;

        assert_eq!(result, Err(AgentError::IterationLimitExceeded { iterations: 3 }));
        assert_eq!(llm.prompts().len(), 3);
        assert!(llm.prompts()[2].contains("Invalid format: no `Action:` or `Final Answer:` found"));
    }

    #[tokio::test]
    async fn tool_outside_profile_becomes_observation() {
        let llm = Arc::new(ScriptedLlm::new([
            "Action: finance_sql_write\nAction Input: DELETE FROM invoices",
            "Final Answer: I cannot do that here.",
        ]));

        let answer = agent(llm.clone(), 4).run("delete invoices", &[], &context()).await.expect("answer");

        assert_eq!(answer, "I cannot do that here.");
        assert!(llm.prompts()[1].contains("Tool 'finance_sql_write' is not available"));
        assert!(!llm.prompts()[1].contains("should never run"));
    }

    #[tokio::test]
    async fn malformed_write_error_feeds_a_corrected_attempt() {
        let llm = Arc::new(ScriptedLlm::new([
            "Action: sales_sql_write\nAction Input: INSER INTO leads VALUES (1)",
            "Thought: fix the typo\nAction: sales_sql_write\nAction Input: INSERT INTO leads (name, email) VALUES ('A', 'a@b.c')",
            "Final Answer: Lead added.",
        ]));

        let answer = agent(llm.clone(), 5).run("add a lead", &[], &context()).await.expect("answer");

        assert_eq!(answer, "Lead added.");
        let prompts = llm.prompts();
        assert!(prompts[1].contains("Observation: SQL Error: near \"INSER\": syntax error"));
        assert!(prompts[2].contains("Observation: SQL write operation successful. Rows affected: 1"));
    }

    #[tokio::test]
    async fn inference_failure_ends_the_run() {
        let llm = Arc::new(ScriptedLlm::default());
        let result = agent(llm, 3).run("anything", &[], &context()).await;
        assert!(matches!(result, Err(AgentError::Inference(_))));
    }
}
