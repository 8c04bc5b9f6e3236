use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use equiptrack_core::domain::identity::UserId;
use equiptrack_core::domain::location::{LocationAssignment, LocationHistoryEntry, LocationId};
use equiptrack_core::domain::machine::{BorrowStatus, BorrowTerms, Machine, MachineId, MachineStatus};
use equiptrack_core::domain::ticket::TicketId;

use super::{
    format_optional_date, parse_enum, parse_optional_date, parse_optional_enum, parse_timestamp,
    parse_u32, RepositoryError,
};

const MACHINE_COLUMNS: &str = "SELECT
        m.id,
        m.name,
        m.current_status,
        m.borrow_status,
        m.counterparty,
        m.borrow_start_date,
        m.borrow_due_date,
        m.rfid_tag,
        m.version,
        m.updated_at,
        ml.location_id
     FROM machine m
     LEFT JOIN machine_location ml ON ml.machine_id = m.id";

pub async fn find(
    conn: &mut SqliteConnection,
    id: &MachineId,
) -> Result<Option<Machine>, RepositoryError> {
    let row = sqlx::query(&format!("{MACHINE_COLUMNS} WHERE m.id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(machine_from_row).transpose()
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Machine>, RepositoryError> {
    let rows = sqlx::query(&format!("{MACHINE_COLUMNS} ORDER BY m.id"))
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(machine_from_row).collect()
}

/// Inserts a machine record as-is, including its version. Used for seeding
/// and imports from the asset register.
pub async fn insert(conn: &mut SqliteConnection, machine: &Machine) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO machine (
            id,
            name,
            current_status,
            borrow_status,
            counterparty,
            borrow_start_date,
            borrow_due_date,
            rfid_tag,
            version,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&machine.id.0)
    .bind(&machine.name)
    .bind(machine.current_status.as_str())
    .bind(machine.borrow_status.as_ref().map(BorrowStatus::as_str))
    .bind(machine.borrow.counterparty.as_deref())
    .bind(format_optional_date(machine.borrow.start_date))
    .bind(format_optional_date(machine.borrow.due_date))
    .bind(machine.rfid_tag.as_deref())
    .bind(i64::from(machine.version))
    .bind(machine.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes the mutable machine fields when the stored version still equals
/// `machine.version`. Returns the number of rows written (0 on mismatch).
pub async fn update_versioned(
    conn: &mut SqliteConnection,
    machine: &Machine,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE machine SET
            current_status = ?,
            borrow_status = ?,
            counterparty = ?,
            borrow_start_date = ?,
            borrow_due_date = ?,
            rfid_tag = ?,
            version = version + 1,
            updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(machine.current_status.as_str())
    .bind(machine.borrow_status.as_ref().map(BorrowStatus::as_str))
    .bind(machine.borrow.counterparty.as_deref())
    .bind(format_optional_date(machine.borrow.start_date))
    .bind(format_optional_date(machine.borrow.due_date))
    .bind(machine.rfid_tag.as_deref())
    .bind(machine.updated_at.to_rfc3339())
    .bind(&machine.id.0)
    .bind(i64::from(machine.version))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn current_location(
    conn: &mut SqliteConnection,
    machine_id: &MachineId,
) -> Result<Option<LocationAssignment>, RepositoryError> {
    let row = sqlx::query(
        "SELECT machine_id, location_id, assigned_at, updated_at
         FROM machine_location
         WHERE machine_id = ?",
    )
    .bind(&machine_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(assignment_from_row).transpose()
}

pub async fn upsert_location(
    conn: &mut SqliteConnection,
    assignment: &LocationAssignment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO machine_location (machine_id, location_id, assigned_at, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(machine_id) DO UPDATE SET
            location_id = excluded.location_id,
            assigned_at = excluded.assigned_at,
            updated_at = excluded.updated_at",
    )
    .bind(&assignment.machine_id.0)
    .bind(&assignment.location_id.0)
    .bind(assignment.assigned_at.to_rfc3339())
    .bind(assignment.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn touch_location(
    conn: &mut SqliteConnection,
    machine_id: &MachineId,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE machine_location SET updated_at = ? WHERE machine_id = ?")
        .bind(at.to_rfc3339())
        .bind(&machine_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn append_history(
    conn: &mut SqliteConnection,
    entry: &LocationHistoryEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO location_history (
            id,
            machine_id,
            from_location_id,
            to_location_id,
            moved_at,
            actor_id,
            ticket_id
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.machine_id.0)
    .bind(entry.from_location.as_ref().map(|location| location.0.as_str()))
    .bind(&entry.to_location.0)
    .bind(entry.moved_at.to_rfc3339())
    .bind(&entry.actor.0)
    .bind(entry.ticket_id.as_ref().map(|ticket| ticket.0.as_str()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn history(
    conn: &mut SqliteConnection,
    machine_id: &MachineId,
) -> Result<Vec<LocationHistoryEntry>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, machine_id, from_location_id, to_location_id, moved_at, actor_id, ticket_id
         FROM location_history
         WHERE machine_id = ?
         ORDER BY moved_at ASC, rowid ASC",
    )
    .bind(&machine_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(history_from_row).collect()
}

fn machine_from_row(row: SqliteRow) -> Result<Machine, RepositoryError> {
    let status: String = row.try_get("current_status")?;

    Ok(Machine {
        id: MachineId(row.try_get("id")?),
        name: row.try_get("name")?,
        current_status: parse_enum("current_status", &status, MachineStatus::parse)?,
        borrow_status: parse_optional_enum(
            "borrow_status",
            row.try_get("borrow_status")?,
            BorrowStatus::parse,
        )?,
        borrow: BorrowTerms {
            counterparty: row.try_get("counterparty")?,
            start_date: parse_optional_date("borrow_start_date", row.try_get("borrow_start_date")?)?,
            due_date: parse_optional_date("borrow_due_date", row.try_get("borrow_due_date")?)?,
        },
        rfid_tag: row.try_get("rfid_tag")?,
        location_id: row.try_get::<Option<String>, _>("location_id")?.map(LocationId),
        version: parse_u32("version", row.try_get("version")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn assignment_from_row(row: SqliteRow) -> Result<LocationAssignment, RepositoryError> {
    Ok(LocationAssignment {
        machine_id: MachineId(row.try_get("machine_id")?),
        location_id: LocationId(row.try_get("location_id")?),
        assigned_at: parse_timestamp("assigned_at", row.try_get("assigned_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn history_from_row(row: SqliteRow) -> Result<LocationHistoryEntry, RepositoryError> {
    Ok(LocationHistoryEntry {
        id: row.try_get("id")?,
        machine_id: MachineId(row.try_get("machine_id")?),
        from_location: row.try_get::<Option<String>, _>("from_location_id")?.map(LocationId),
        to_location: LocationId(row.try_get("to_location_id")?),
        moved_at: parse_timestamp("moved_at", row.try_get("moved_at")?)?,
        actor: UserId(row.try_get("actor_id")?),
        ticket_id: row.try_get::<Option<String>, _>("ticket_id")?.map(TicketId),
    })
}
