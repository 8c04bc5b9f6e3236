use std::process::ExitCode;

fn main() -> ExitCode {
    equiptrack_cli::run()
}
