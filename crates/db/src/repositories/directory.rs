use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use equiptrack_core::domain::identity::{UnitId, UserId};
use equiptrack_core::ports::{DirectoryError, IdentityDirectory};

use super::RepositoryError;
use crate::DbPool;

/// Identity directory backed by the `app_user` and `user_capability` tables.
pub struct SqlIdentityDirectory {
    pool: DbPool,
}

impl SqlIdentityDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl From<RepositoryError> for DirectoryError {
    fn from(value: RepositoryError) -> Self {
        DirectoryError::Unavailable(value.to_string())
    }
}

fn unavailable(error: sqlx::Error) -> DirectoryError {
    DirectoryError::from(RepositoryError::from(error))
}

#[async_trait]
impl IdentityDirectory for SqlIdentityDirectory {
    async fn has_capability(
        &self,
        user: &UserId,
        capability: &str,
    ) -> Result<bool, DirectoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM user_capability
             WHERE user_id = ? AND capability = ?",
        )
        .bind(&user.0)
        .bind(capability)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.try_get::<i64, _>("count").map_err(unavailable)? > 0)
    }

    async fn unit_of(&self, user: &UserId) -> Result<Option<UnitId>, DirectoryError> {
        let unit = sqlx::query_scalar::<_, Option<String>>(
            "SELECT unit_id FROM app_user WHERE id = ?",
        )
        .bind(&user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(unit.flatten().map(UnitId))
    }

    async fn members_of(&self, unit: &UnitId) -> Result<Vec<UserId>, DirectoryError> {
        let members = sqlx::query_scalar::<_, String>(
            "SELECT id FROM app_user WHERE lower(trim(unit_id)) = lower(trim(?)) ORDER BY id",
        )
        .bind(&unit.0)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(members.into_iter().map(UserId).collect())
    }

    async fn display_name(&self, user: &UserId) -> Result<Option<String>, DirectoryError> {
        sqlx::query_scalar::<_, String>("SELECT display_name FROM app_user WHERE id = ?")
            .bind(&user.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)
    }
}

/// Creates or replaces a user and its capability set.
pub async fn upsert_user(
    conn: &mut SqliteConnection,
    user: &UserId,
    unit: Option<&UnitId>,
    display_name: &str,
    capabilities: &[&str],
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO app_user (id, display_name, unit_id) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            display_name = excluded.display_name,
            unit_id = excluded.unit_id",
    )
    .bind(&user.0)
    .bind(display_name)
    .bind(unit.map(|unit| unit.0.as_str()))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM user_capability WHERE user_id = ?")
        .bind(&user.0)
        .execute(&mut *conn)
        .await?;
    for capability in capabilities {
        sqlx::query("INSERT INTO user_capability (user_id, capability) VALUES (?, ?)")
            .bind(&user.0)
            .bind(*capability)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
