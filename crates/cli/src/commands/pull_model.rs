use helios_agent::pull_model;

use crate::commands::{build_runtime, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("pull-model") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("pull-model") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    match runtime.block_on(pull_model(&config.llm)) {
        Ok(message) => CommandResult::success("pull-model", message),
        Err(error) => CommandResult::failure(
            "pull-model",
            "inference_setup",
            format!("model pull failed: {error:#}"),
            7,
        ),
    }
}
