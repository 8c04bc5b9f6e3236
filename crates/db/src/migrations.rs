use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of forward migrations shipped with this build.
pub fn expected_count() -> usize {
    MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration()).count()
}

/// Number of migrations recorded as applied. Fails when the migration table
/// does not exist yet.
pub async fn applied_count(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(applied as usize)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "org_unit",
        "location",
        "app_user",
        "user_capability",
        "machine",
        "machine_location",
        "ticket",
        "ticket_detail",
        "ticket_approval_step",
        "inventory_scan",
        "location_history",
        "idx_app_user_unit_id",
        "idx_machine_location_location_id",
        "idx_ticket_status",
        "idx_ticket_detail_machine_id",
        "idx_location_history_machine_id",
    ];

    #[tokio::test]
    async fn migrations_create_equipment_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let signature = managed_schema_signature(&pool).await;
        assert_eq!(signature.len(), MANAGED_SCHEMA_OBJECTS.len());

        let machine_columns: Vec<String> = sqlx::query("PRAGMA table_info(machine)")
            .fetch_all(&pool)
            .await
            .expect("machine columns")
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();
        assert!(machine_columns.contains(&"version".to_string()));
        assert!(machine_columns.contains(&"borrow_status".to_string()));
    }

    #[tokio::test]
    async fn location_codes_are_unique_ignoring_case() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO org_unit (id, name) VALUES ('assembly', 'Assembly')")
            .execute(&pool)
            .await
            .expect("insert unit");
        sqlx::query(
            "INSERT INTO location (id, code, name, unit_id, kind)
             VALUES ('L-1', 'WH-A', 'Warehouse A', 'assembly', 'warehouse')",
        )
        .execute(&pool)
        .await
        .expect("insert location");

        let duplicate = sqlx::query(
            "INSERT INTO location (id, code, name, unit_id, kind)
             VALUES ('L-2', 'wh-a', 'Warehouse A again', 'assembly', 'warehouse')",
        )
        .execute(&pool)
        .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
