use std::sync::Arc;

use axum::Router;
use equiptrack_core::config::AppConfig;
use equiptrack_core::{TicketService, TracingAuditSink};
use equiptrack_db::{connect_with_config, migrations, DbPool, SqlIdentityDirectory, SqliteTicketStore};
use thiserror::Error;
use tracing::info;

use crate::{api, dispatch, health};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<TicketService>,
}

impl Application {
    /// Ticket API and health probe on one router.
    pub fn router(&self) -> Router {
        let state =
            api::ApiState::new(self.service.clone(), self.config.dispatch.callback_secret.clone());
        api::router(state).merge(health::router(self.db_pool.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("approval dispatch client could not be built: {0}")]
    DispatchClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let approvals = dispatch::build(&config.dispatch).map_err(BootstrapError::DispatchClient)?;
    info!(
        event_name = "system.bootstrap.dispatch_ready",
        correlation_id = "bootstrap",
        mode = if config.dispatch.endpoint_url.is_some() { "http" } else { "log_only" },
        "approval dispatch initialized"
    );

    let service = TicketService::new(
        Arc::new(SqliteTicketStore::new(db_pool.clone())),
        Arc::new(SqlIdentityDirectory::new(db_pool.clone())),
        approvals,
        Arc::new(TracingAuditSink),
        config.approval.clone(),
        config.permissions.clone(),
    );

    Ok(Application { config, db_pool, service: Arc::new(service) })
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use equiptrack_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use tower::ServiceExt;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config() -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_exposes_ticket_tables() {
        let app = bootstrap_with_config(config())
            .await
            .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('machine', 'ticket', 'ticket_approval_step', 'location_history')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should be readable after bootstrap");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrapped_router_serves_health() {
        let mut config = config();
        config.dispatch.endpoint_url = Some("https://approvals.local/requests".to_string());
        config.dispatch.callback_base_url = Some("https://equiptrack.local".to_string());
        let app = bootstrap_with_config(config).await.expect("bootstrap with http dispatch");

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_file_is_a_connect_error() {
        let mut config = config();
        config.database.url = "sqlite:///nonexistent-dir/equiptrack.db".to_string();

        let result = bootstrap_with_config(config).await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
