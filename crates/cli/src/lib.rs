pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::seed::SeedMode;

#[derive(Debug, Parser)]
#[command(
    name = "equiptrack",
    about = "EquipTrack operator CLI",
    long_about = "Operate EquipTrack schema migrations, reference data, config inspection, and readiness checks.",
    after_help = "Examples:\n  equiptrack migrate\n  equiptrack seed --verify\n  equiptrack doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load reference units, locations, users, and machines")]
    Seed {
        #[arg(long, help = "Only report whether the reference data is present")]
        verify: bool,
        #[arg(long, conflicts_with = "verify", help = "Remove the reference data")]
        clean: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, approval dispatch, DB connectivity, and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { verify, clean } => {
            let mode = match (verify, clean) {
                (true, _) => SeedMode::Verify,
                (_, true) => SeedMode::Clean,
                _ => SeedMode::Load,
            };
            commands::seed::run(mode)
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn seed_flags_parse() {
        let cli = Cli::try_parse_from(["equiptrack", "seed", "--verify"]).expect("parse");
        assert!(matches!(cli.command, Command::Seed { verify: true, clean: false }));
    }

    #[test]
    fn seed_verify_and_clean_conflict() {
        assert!(Cli::try_parse_from(["equiptrack", "seed", "--verify", "--clean"]).is_err());
    }
}
