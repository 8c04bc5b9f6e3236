use equiptrack_db::{connect_with_config, migrations, ReferenceSeedDataset, VerificationResult};

use crate::commands::{exit, load_config, runtime, CommandResult, Failure};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeedMode {
    /// Load the reference data unless it is already present.
    #[default]
    Load,
    /// Only report which reference rows are present.
    Verify,
    /// Remove the reference data and anything that points at it.
    Clean,
}

enum SeedOutcome {
    Loaded(equiptrack_db::SeedResult),
    AlreadyPresent,
    Verified(VerificationResult),
    Cleaned,
}

pub fn run(mode: SeedMode) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), exit::DB_CONNECT))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;

        let verify = |error: equiptrack_db::RepositoryError| -> Failure {
            ("seed_verification", error.to_string(), exit::SEED)
        };
        let outcome = match mode {
            SeedMode::Load => {
                if ReferenceSeedDataset::verify(&pool).await.map_err(verify)?.all_present {
                    SeedOutcome::AlreadyPresent
                } else {
                    let loaded = ReferenceSeedDataset::load(&pool)
                        .await
                        .map_err(|error| ("seed_execution", error.to_string(), exit::SEED))?;
                    let verification = ReferenceSeedDataset::verify(&pool).await.map_err(verify)?;
                    if !verification.all_present {
                        return Err((
                            "seed_verification",
                            verification_failure_message(&verification),
                            exit::SEED,
                        ));
                    }
                    SeedOutcome::Loaded(loaded)
                }
            }
            SeedMode::Verify => {
                SeedOutcome::Verified(ReferenceSeedDataset::verify(&pool).await.map_err(verify)?)
            }
            SeedMode::Clean => {
                ReferenceSeedDataset::clean(&pool)
                    .await
                    .map_err(|error| ("seed_clean", error.to_string(), exit::SEED))?;
                SeedOutcome::Cleaned
            }
        };

        pool.close().await;
        Ok::<SeedOutcome, Failure>(outcome)
    });

    match result {
        Ok(SeedOutcome::Loaded(loaded)) => CommandResult::success_with(
            "seed",
            format!(
                "reference data loaded: {} units, {} locations, {} users, {} machines",
                loaded.units, loaded.locations, loaded.users, loaded.machines
            ),
            loaded,
        ),
        Ok(SeedOutcome::AlreadyPresent) => {
            CommandResult::success("seed", "reference data already present; nothing loaded")
        }
        Ok(SeedOutcome::Verified(verification)) if verification.all_present => {
            CommandResult::success_with("seed", "reference data present", verification)
        }
        Ok(SeedOutcome::Verified(verification)) => CommandResult::failure(
            "seed",
            "seed_verification",
            verification_failure_message(&verification),
            exit::SEED,
        ),
        Ok(SeedOutcome::Cleaned) => CommandResult::success("seed", "reference data removed"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_failure_message(verification: &VerificationResult) -> String {
    let failed_checks = verification
        .checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some reference data failed to load".to_string()
    } else {
        format!("reference data missing for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use equiptrack_db::VerificationResult;

    use super::verification_failure_message;

    #[test]
    fn verification_message_names_failed_checks() {
        let verification = VerificationResult {
            all_present: false,
            checks: vec![("units", true), ("machines", false), ("in-house machines located", false)],
        };

        assert_eq!(
            verification_failure_message(&verification),
            "reference data missing for checks: machines, in-house machines located"
        );
    }

    #[test]
    fn verification_message_falls_back_when_every_check_passed() {
        let verification =
            VerificationResult { all_present: false, checks: vec![("units", true)] };

        assert_eq!(verification_failure_message(&verification), "some reference data failed to load");
    }
}
