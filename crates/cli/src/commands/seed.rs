use helios_db::{SampleDataset, SeedResult};

use crate::commands::{build_runtime, load_config, open_migrated_pool, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;

        let seed_result = SampleDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = SampleDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, StepFailure> = if verification.all_present {
            Ok(seed_result)
        } else {
            Err(("seed_verification", verification_message(&verification.failed_checks()), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary_message(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some sample data failed to load".to_string()
    } else {
        format!("Sample data verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn summary_message(seeded: &SeedResult) -> String {
    let tables = seeded
        .tables
        .iter()
        .map(|(table, count)| format!("  - {table}: {count}"))
        .collect::<Vec<_>>();
    format!(
        "sample ERP dataset loaded ({} rows across {} tables):\n{}",
        seeded.total_rows(),
        seeded.tables.len(),
        tables.join("\n")
    )
}
