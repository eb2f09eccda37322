use std::process::ExitCode;

fn main() -> ExitCode {
    helios_cli::run()
}
