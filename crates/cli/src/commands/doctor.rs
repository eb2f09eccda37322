use std::future::Future;

use helios_agent::check_model_available;
use helios_core::config::{AppConfig, LlmProvider, LoadOptions};
use helios_db::{connect_with_settings, ping};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_inference_settings(&config));
            checks.push(check_inference_reachability(&config));
            checks.push(check_approval_gate(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in [
                "inference_settings",
                "inference_reachability",
                "approval_gate",
                "database_connectivity",
            ] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_inference_settings(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.llm.base_url.as_deref().unwrap_or(match config.llm.provider {
        LlmProvider::Ollama => "http://localhost:11434",
        LlmProvider::OpenAi => "https://api.openai.com",
    });
    DoctorCheck {
        name: "inference_settings",
        status: CheckStatus::Pass,
        details: format!(
            "{:?} model `{}` at {endpoint} (timeout {}s, {} retries)",
            config.llm.provider, config.llm.model, config.llm.timeout_secs, config.llm.max_retries
        ),
    }
}

/// Informational: without a token every sensitive write is refused, which is a valid setup.
fn check_approval_gate(config: &AppConfig) -> DoctorCheck {
    let details = if config.approval.token.is_some() {
        "approval token configured; sensitive writes need a matching request token"
    } else {
        "no approval token configured; sensitive writes will be refused"
    };
    DoctorCheck { name: "approval_gate", status: CheckStatus::Pass, details: details.to_string() }
}

fn check_inference_reachability(config: &AppConfig) -> DoctorCheck {
    run_check("inference_reachability", async {
        check_model_available(&config.llm).await.map_err(|error| format!("{error:#}"))
    })
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    run_check("database_connectivity", async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let probe = ping(&pool).await.map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        probe.map(|()| format!("connected using `{}`", config.database.url))
    })
}

/// Drives one async check to completion on a private runtime.
fn run_check<F>(name: &'static str, check: F) -> DoctorCheck
where
    F: Future<Output = Result<String, String>>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name,
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    match runtime.block_on(check) {
        Ok(details) => DoctorCheck { name, status: CheckStatus::Pass, details },
        Err(details) => DoctorCheck { name, status: CheckStatus::Fail, details },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
