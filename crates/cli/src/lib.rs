pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "helios",
    about = "Helios ERP agent operator CLI",
    long_about = "Prepare the ERP database, inspect configuration, check readiness, and ask the agents a question.",
    after_help = "Examples:\n  helios migrate\n  helios seed\n  helios doctor --json\n  helios pull-model\n  helios ask \"show me all customers\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the sample ERP dataset and verify its anchor rows")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model availability and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Download the configured model into the local Ollama instance")]
    PullModel,
    #[command(about = "Route one prompt through the agents and print the response as JSON")]
    Ask {
        #[arg(help = "Natural-language request")]
        prompt: String,
        #[arg(long, help = "Continue an existing conversation session")]
        session: Option<String>,
        #[arg(long, help = "Token that approves sensitive writes for this request")]
        approval_token: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::PullModel => commands::pull_model::run(),
        Command::Ask { prompt, session, approval_token } => {
            commands::ask::run(commands::ask::AskArgs { prompt, session, approval_token })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
