use equiptrack_core::config::{AppConfig, LoadOptions};
use equiptrack_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;

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

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {reason}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_approval_dispatch(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            let reason = "configuration did not load";
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            checks.push(DoctorCheck::skipped("approval_dispatch", reason));
            checks.push(DoctorCheck::skipped("database_connectivity", reason));
            checks.push(DoctorCheck::skipped("schema_migrations", reason));
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_approval_dispatch(config: &AppConfig) -> DoctorCheck {
    match (&config.dispatch.endpoint_url, &config.dispatch.callback_base_url) {
        (Some(endpoint), Some(callback)) => DoctorCheck::new(
            "approval_dispatch",
            CheckStatus::Pass,
            format!("http dispatch to `{endpoint}`, callbacks via `{callback}`"),
        ),
        (Some(endpoint), None) => DoctorCheck::new(
            "approval_dispatch",
            CheckStatus::Fail,
            format!("endpoint `{endpoint}` is set but dispatch.callback_base_url is missing"),
        ),
        (None, _) => DoctorCheck::new(
            "approval_dispatch",
            CheckStatus::Pass,
            "no endpoint configured; approval requests are logged only",
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema_migrations", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Pass,
                format!("connected using `{}`", config.database.url),
            ),
            check_schema(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let expected = migrations::expected_count();
    match migrations::applied_count(pool).await {
        Ok(applied) if applied >= expected => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Pass,
            format!("{applied} of {expected} migrations applied"),
        ),
        Ok(applied) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            format!("{applied} of {expected} migrations applied; run `equiptrack migrate`"),
        ),
        Err(_) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            "migration history not found; run `equiptrack migrate`",
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

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
