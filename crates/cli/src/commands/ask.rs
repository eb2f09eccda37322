use std::sync::Arc;

use helios_agent::{client_from_config, AgentRouter, ChatRequest, LlmClient};
use helios_core::config::AppConfig;
use helios_db::StatementExecutor;

use crate::commands::{build_runtime, load_config, open_migrated_pool, CommandResult};

#[derive(Debug, Clone)]
pub struct AskArgs {
    pub prompt: String,
    pub session: Option<String>,
    pub approval_token: Option<String>,
}

impl AskArgs {
    fn into_request(self) -> ChatRequest {
        let mut request = ChatRequest::new(self.prompt);
        if let Some(session) = self.session {
            request = request.with_session(session);
        }
        if let Some(token) = self.approval_token.filter(|token| !token.trim().is_empty()) {
            request = request.with_approval_token(token);
        }
        request
    }
}

pub fn run(args: AskArgs) -> CommandResult {
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let llm: Arc<dyn LlmClient> = match client_from_config(&config.llm) {
        Ok(client) => client.into(),
        Err(error) => {
            return CommandResult::failure("ask", "inference_setup", format!("{error:#}"), 7);
        }
    };
    execute(config, args, llm)
}

/// Same as [`run`] with a caller-supplied inference client.
pub fn run_with_llm(args: AskArgs, llm: Arc<dyn LlmClient>) -> CommandResult {
    match load_config("ask") {
        Ok(config) => execute(config, args, llm),
        Err(failure) => failure,
    }
}

fn execute(config: AppConfig, args: AskArgs, llm: Arc<dyn LlmClient>) -> CommandResult {
    let runtime = match build_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let router = AgentRouter::from_config(&config, StatementExecutor::new(pool.clone()), llm)
            .map_err(|error| ("prompt_template", error.to_string(), 8u8))?;

        let response = router.handle(args.into_request()).await;
        pool.close().await;
        Ok::<_, crate::commands::StepFailure>(response)
    });

    match result {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("ask", "serialization", error.to_string(), 9),
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}
