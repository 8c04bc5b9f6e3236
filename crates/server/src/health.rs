use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use equiptrack_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub status: &'static str,
    pub detail: String,
}

impl ComponentCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: ComponentCheck,
    pub schema: ComponentCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = database_check(&state.db_pool).await;
    let schema = if database.is_ready() {
        schema_check(&state.db_pool).await
    } else {
        ComponentCheck::degraded("skipped: database unreachable")
    };
    let ready = database.is_ready() && schema.is_ready();

    let report = HealthReport {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

async fn database_check(pool: &DbPool) -> ComponentCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => ComponentCheck::ready("database query succeeded"),
        Err(error) => ComponentCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn schema_check(pool: &DbPool) -> ComponentCheck {
    let expected = migrations::expected_count();
    match migrations::applied_count(pool).await {
        Ok(applied) if applied >= expected => {
            ComponentCheck::ready(format!("{applied} migrations applied"))
        }
        Ok(applied) => {
            ComponentCheck::degraded(format!("{applied} of {expected} migrations applied"))
        }
        Err(error) => ComponentCheck::degraded(format!("migration table unreadable: {error}")),
    }
}
