use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use equiptrack_core::domain::identity::UnitId;
use equiptrack_core::domain::location::{Location, LocationId, LocationKind};

use super::{parse_enum, RepositoryError};

pub async fn find(
    conn: &mut SqliteConnection,
    id: &LocationId,
) -> Result<Option<Location>, RepositoryError> {
    let row = sqlx::query("SELECT id, code, name, unit_id, kind FROM location WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(location_from_row).transpose()
}

/// Codes are compared case-insensitively (the column is `COLLATE NOCASE`).
pub async fn find_by_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<Option<Location>, RepositoryError> {
    let row = sqlx::query("SELECT id, code, name, unit_id, kind FROM location WHERE code = ?")
        .bind(code.trim())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(location_from_row).transpose()
}

pub async fn insert_unit(
    conn: &mut SqliteConnection,
    unit: &UnitId,
    name: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO org_unit (id, name) VALUES (?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(&unit.0)
    .bind(name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn upsert(conn: &mut SqliteConnection, location: &Location) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO location (id, code, name, unit_id, kind)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            code = excluded.code,
            name = excluded.name,
            unit_id = excluded.unit_id,
            kind = excluded.kind",
    )
    .bind(&location.id.0)
    .bind(&location.code)
    .bind(&location.name)
    .bind(&location.unit_id.0)
    .bind(location.kind.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn location_from_row(row: SqliteRow) -> Result<Location, RepositoryError> {
    let kind: String = row.try_get("kind")?;

    Ok(Location {
        id: LocationId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        unit_id: UnitId(row.try_get("unit_id")?),
        kind: parse_enum("kind", &kind, LocationKind::parse)?,
    })
}
