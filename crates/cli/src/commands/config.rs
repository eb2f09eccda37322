use std::env;
use std::fs;
use std::path::Path;

use helios_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = SourceLookup { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    render(&config, &sources)
}

struct SourceLookup<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl SourceLookup<'_> {
    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn render(config: &AppConfig, sources: &SourceLookup<'_>) -> String {
    let entries = vec![
        entry("database.url", config.database.url.clone(), &["HELIOS_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["HELIOS_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["HELIOS_DATABASE_TIMEOUT_SECS"],
        ),
        entry("llm.provider", format!("{:?}", config.llm.provider), &["HELIOS_LLM_PROVIDER"]),
        entry("llm.model", config.llm.model.clone(), &["HELIOS_LLM_MODEL"]),
        entry(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["HELIOS_LLM_BASE_URL", "OLLAMA_API_BASE"],
        ),
        entry("llm.api_key", redact(config.llm.api_key.is_some()), &["HELIOS_LLM_API_KEY"]),
        entry("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["HELIOS_LLM_TIMEOUT_SECS"]),
        entry("llm.max_retries", config.llm.max_retries.to_string(), &["HELIOS_LLM_MAX_RETRIES"]),
        entry(
            "llm.structured_output",
            config.llm.structured_output.to_string(),
            &["HELIOS_LLM_STRUCTURED_OUTPUT"],
        ),
        entry(
            "agent.max_iterations",
            config.agent.max_iterations.to_string(),
            &["HELIOS_AGENT_MAX_ITERATIONS"],
        ),
        entry(
            "agent.memory_window",
            config.agent.memory_window.to_string(),
            &["HELIOS_AGENT_MEMORY_WINDOW"],
        ),
        entry(
            "agent.max_sessions",
            config.agent.max_sessions.to_string(),
            &["HELIOS_AGENT_MAX_SESSIONS"],
        ),
        entry(
            "agent.request_timeout_secs",
            config.agent.request_timeout_secs.to_string(),
            &["HELIOS_AGENT_REQUEST_TIMEOUT_SECS"],
        ),
        entry(
            "agent.classifier",
            format!("{:?}", config.agent.classifier),
            &["HELIOS_AGENT_CLASSIFIER"],
        ),
        entry("approval.token", redact(config.approval.token.is_some()), &["HELIOS_APPROVAL_TOKEN"]),
        entry(
            "approval.require_for_inserts",
            config.approval.require_for_inserts.to_string(),
            &["HELIOS_APPROVAL_REQUIRE_FOR_INSERTS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["HELIOS_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["HELIOS_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["HELIOS_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["HELIOS_LOGGING_LEVEL", "HELIOS_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["HELIOS_LOGGING_FORMAT", "HELIOS_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.into_iter().map(|(key, value, env_keys)| {
        format!("- {key} = {value} (source: {})", sources.source(key, env_keys))
    }));
    lines.join("\n")
}

type Entry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn redact(is_set: bool) -> String {
    if is_set { "<redacted>" } else { "<unset>" }.to_string()
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
