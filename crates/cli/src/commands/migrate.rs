use equiptrack_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{exit, load_config, runtime, CommandResult, Failure};

#[derive(Debug, Serialize)]
struct MigrationSummary {
    applied_before: usize,
    applied_after: usize,
    available: usize,
}

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), exit::DB_CONNECT))?;
        // A fresh database has no migration table yet.
        let applied_before = migrations::applied_count(&pool).await.unwrap_or(0);
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;
        let applied_after = migrations::applied_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;
        pool.close().await;
        Ok::<MigrationSummary, Failure>(MigrationSummary {
            applied_before,
            applied_after,
            available: migrations::expected_count(),
        })
    });

    match result {
        Ok(summary) => {
            let newly_applied = summary.applied_after.saturating_sub(summary.applied_before);
            CommandResult::success_with(
                "migrate",
                format!("applied {newly_applied} pending migration(s)"),
                summary,
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
