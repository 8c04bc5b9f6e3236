use std::env;
use std::sync::{Mutex, OnceLock};

use equiptrack_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["applied_before"], 0);
        assert_eq!(payload["data"]["applied_after"], payload["data"]["available"]);
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "postgres://localhost/equiptrack")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_reference_data() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run(seed::SeedMode::Load);
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        assert!(payload["data"]["machines"].as_u64().unwrap_or_default() > 0);
        assert!(payload["data"]["locations"].as_u64().unwrap_or_default() > 0);
    });
}

#[test]
fn seed_verify_reports_missing_reference_data_on_empty_database() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run(seed::SeedMode::Verify);
        assert_eq!(result.exit_code, 6, "expected seed verification failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "seed_verification");
        let message = payload["message"].as_str().expect("message should be a string");
        assert!(message.contains("machines"), "unexpected message: {message}");
    });
}

#[test]
fn seed_clean_succeeds_on_empty_database() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run(seed::SeedMode::Clean);
        assert_eq!(result.exit_code, 0);
        assert_eq!(parse_payload(&result.output)["message"], "reference data removed");
    });
}

#[test]
fn config_attributes_env_sources_and_redacts_secrets() {
    with_env(
        &[
            ("EQUIPTRACK_DATABASE_URL", "sqlite::memory:"),
            ("EQUIPTRACK_DISPATCH_API_TOKEN", "very-secret-token"),
        ],
        || {
            let output = config::run();

            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (EQUIPTRACK_DATABASE_URL))"
            ));
            assert!(output.contains(
                "- dispatch.api_token = <redacted> (source: env (EQUIPTRACK_DISPATCH_API_TOKEN))"
            ));
            assert!(output.contains("- server.port = 8080 (source: default)"));
            assert!(!output.contains("very-secret-token"));
        },
    );
}

#[test]
fn doctor_json_reports_unmigrated_schema() {
    with_env(&[("EQUIPTRACK_DATABASE_URL", "sqlite::memory:")], || {
        let payload = parse_payload(&doctor::run(true));

        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks should be an array");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("approval_dispatch"), "pass");
        assert_eq!(status_of("database_connectivity"), "pass");
        assert_eq!(status_of("schema_migrations"), "fail");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("EQUIPTRACK_SERVER_PORT", "not-a-port")], || {
        let output = doctor::run(false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] database_connectivity:"));
        assert!(output.contains("- [skip] schema_migrations:"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "EQUIPTRACK_DATABASE_URL",
        "EQUIPTRACK_DATABASE_MAX_CONNECTIONS",
        "EQUIPTRACK_DATABASE_TIMEOUT_SECS",
        "EQUIPTRACK_SERVER_BIND_ADDRESS",
        "EQUIPTRACK_SERVER_PORT",
        "EQUIPTRACK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "EQUIPTRACK_DISPATCH_ENDPOINT_URL",
        "EQUIPTRACK_DISPATCH_CALLBACK_BASE_URL",
        "EQUIPTRACK_DISPATCH_API_TOKEN",
        "EQUIPTRACK_DISPATCH_CALLBACK_SECRET",
        "EQUIPTRACK_DISPATCH_TIMEOUT_SECS",
        "EQUIPTRACK_PERMISSIONS_ADMIN_CAPABILITY",
        "EQUIPTRACK_PERMISSIONS_EDIT_CAPABILITY",
        "EQUIPTRACK_LOGGING_LEVEL",
        "EQUIPTRACK_LOGGING_FORMAT",
        "EQUIPTRACK_LOG_LEVEL",
        "EQUIPTRACK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
