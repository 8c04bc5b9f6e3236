use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use equiptrack_core::domain::approval::{ApprovalFlow, ApprovalStep, StepDecision};
use equiptrack_core::domain::identity::{UnitId, UserId};
use equiptrack_core::domain::location::LocationId;
use equiptrack_core::domain::machine::{BorrowTerms, MachineId, MachineStatus};
use equiptrack_core::domain::ticket::{
    DepartmentCount, InventoryCount, OperationType, ScannedLocation, ScannedMachine, Ticket,
    TicketCategory, TicketDetail, TicketId, TicketStatus,
};

use super::{
    format_optional_date, parse_enum, parse_optional_date, parse_optional_enum,
    parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
};

pub async fn find(
    conn: &mut SqliteConnection,
    id: &TicketId,
) -> Result<Option<Ticket>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            category,
            operation,
            status,
            source_unit_id,
            target_location_id,
            target_status,
            counterparty,
            borrow_start_date,
            borrow_due_date,
            creator_id,
            note,
            version,
            created_at,
            updated_at,
            completed_at
         FROM ticket
         WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut ticket = ticket_from_row(row)?;
    ticket.details = details(conn, id).await?;
    ticket.approval_flow = approval_flow(conn, id).await?;
    ticket.inventory = inventory(conn, id).await?;
    Ok(Some(ticket))
}

pub async fn insert(conn: &mut SqliteConnection, ticket: &Ticket) -> Result<(), RepositoryError> {
    let terms = ticket.borrow_terms.as_ref();
    sqlx::query(
        "INSERT INTO ticket (
            id,
            category,
            operation,
            status,
            source_unit_id,
            target_location_id,
            target_status,
            counterparty,
            borrow_start_date,
            borrow_due_date,
            creator_id,
            note,
            version,
            created_at,
            updated_at,
            completed_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&ticket.id.0)
    .bind(ticket.category.as_str())
    .bind(ticket.operation.as_str())
    .bind(ticket.status.as_str())
    .bind(ticket.source_unit.as_ref().map(|unit| unit.0.as_str()))
    .bind(ticket.target_location.as_ref().map(|location| location.0.as_str()))
    .bind(ticket.target_status.as_ref().map(MachineStatus::as_str))
    .bind(terms.and_then(|terms| terms.counterparty.as_deref()))
    .bind(format_optional_date(terms.and_then(|terms| terms.start_date)))
    .bind(format_optional_date(terms.and_then(|terms| terms.due_date)))
    .bind(&ticket.creator.0)
    .bind(ticket.note.as_deref())
    .bind(i64::from(ticket.version))
    .bind(ticket.created_at.to_rfc3339())
    .bind(ticket.updated_at.to_rfc3339())
    .bind(ticket.completed_at.map(|value| value.to_rfc3339()))
    .execute(&mut *conn)
    .await?;

    write_children(conn, ticket).await
}

/// Rewrites the mutable ticket columns and its child rows when the stored
/// version still equals `ticket.version`. Returns the rows written on the
/// ticket table (0 on mismatch, in which case children are left alone).
pub async fn update_versioned(
    conn: &mut SqliteConnection,
    ticket: &Ticket,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE ticket SET
            status = ?,
            note = ?,
            version = version + 1,
            updated_at = ?,
            completed_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(ticket.status.as_str())
    .bind(ticket.note.as_deref())
    .bind(ticket.updated_at.to_rfc3339())
    .bind(ticket.completed_at.map(|value| value.to_rfc3339()))
    .bind(&ticket.id.0)
    .bind(i64::from(ticket.version))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(0);
    }

    for table in ["ticket_detail", "ticket_approval_step", "inventory_scan"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE ticket_id = ?"))
            .bind(&ticket.id.0)
            .execute(&mut *conn)
            .await?;
    }
    write_children(conn, ticket).await?;

    Ok(result.rows_affected())
}

async fn write_children(conn: &mut SqliteConnection, ticket: &Ticket) -> Result<(), RepositoryError> {
    for (line_no, detail) in ticket.details.iter().enumerate() {
        sqlx::query(
            "INSERT INTO ticket_detail (ticket_id, line_no, machine_id, note) VALUES (?, ?, ?, ?)",
        )
        .bind(&ticket.id.0)
        .bind(line_no as i64)
        .bind(&detail.machine_id.0)
        .bind(detail.note.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    for step in ticket.approval_flow.steps() {
        sqlx::query(
            "INSERT INTO ticket_approval_step (
                ticket_id,
                position,
                approver_id,
                display_name,
                step_flow,
                is_final,
                is_flow,
                is_forward,
                decision,
                status_text
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.id.0)
        .bind(i64::from(step.position))
        .bind(&step.approver.0)
        .bind(&step.display_name)
        .bind(i64::from(step.step_flow))
        .bind(step.is_final)
        .bind(step.is_flow)
        .bind(step.is_forward)
        .bind(step.decision.as_str())
        .bind(step.status_text.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    if let Some(count) = &ticket.inventory {
        let scans = count.departments.iter().flat_map(|department| {
            department.locations.iter().flat_map(move |location| {
                location.machines.iter().map(move |machine| (department, location, machine))
            })
        }).collect::<Vec<_>>();
        for (line_no, (department, location, machine)) in scans.into_iter().enumerate() {
            sqlx::query(
                "INSERT INTO inventory_scan (
                    ticket_id,
                    line_no,
                    department_unit_id,
                    location_code,
                    machine_id,
                    mislocated
                 ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&ticket.id.0)
            .bind(line_no as i64)
            .bind(&department.unit_id.0)
            .bind(&location.location_code)
            .bind(&machine.machine_id.0)
            .bind(machine.mislocated)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

async fn details(
    conn: &mut SqliteConnection,
    id: &TicketId,
) -> Result<Vec<TicketDetail>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT machine_id, note FROM ticket_detail WHERE ticket_id = ? ORDER BY line_no ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(detail_from_row).collect()
}

async fn approval_flow(
    conn: &mut SqliteConnection,
    id: &TicketId,
) -> Result<ApprovalFlow, RepositoryError> {
    let rows = sqlx::query(
        "SELECT
            position,
            approver_id,
            display_name,
            step_flow,
            is_final,
            is_flow,
            is_forward,
            decision,
            status_text
         FROM ticket_approval_step
         WHERE ticket_id = ?
         ORDER BY position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let steps = rows.into_iter().map(step_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok(ApprovalFlow(steps))
}

/// Rebuilds the department / location grouping from the flattened scan rows,
/// keeping first-seen order.
async fn inventory(
    conn: &mut SqliteConnection,
    id: &TicketId,
) -> Result<Option<InventoryCount>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT department_unit_id, location_code, machine_id, mislocated
         FROM inventory_scan
         WHERE ticket_id = ?
         ORDER BY line_no ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut count = InventoryCount::default();
    for row in rows {
        let unit_id = UnitId(row.try_get("department_unit_id")?);
        let location_code: String = row.try_get("location_code")?;
        let machine = ScannedMachine {
            machine_id: MachineId(row.try_get("machine_id")?),
            mislocated: row.try_get("mislocated")?,
        };

        let department_index =
            match count.departments.iter().position(|department| department.unit_id == unit_id) {
                Some(index) => index,
                None => {
                    count.departments.push(DepartmentCount { unit_id, locations: Vec::new() });
                    count.departments.len() - 1
                }
            };
        let department = &mut count.departments[department_index];
        match department
            .locations
            .iter_mut()
            .find(|location| location.location_code == location_code)
        {
            Some(location) => location.machines.push(machine),
            None => department
                .locations
                .push(ScannedLocation { location_code, machines: vec![machine] }),
        }
    }

    Ok(Some(count))
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, RepositoryError> {
    let category: String = row.try_get("category")?;
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;

    let counterparty: Option<String> = row.try_get("counterparty")?;
    let start_date = parse_optional_date("borrow_start_date", row.try_get("borrow_start_date")?)?;
    let due_date = parse_optional_date("borrow_due_date", row.try_get("borrow_due_date")?)?;
    let borrow_terms = if counterparty.is_none() && start_date.is_none() && due_date.is_none() {
        None
    } else {
        Some(BorrowTerms { counterparty, start_date, due_date })
    };

    Ok(Ticket {
        id: TicketId(row.try_get("id")?),
        category: parse_enum("category", &category, TicketCategory::parse)?,
        operation: parse_enum("operation", &operation, OperationType::parse)?,
        status: parse_enum("status", &status, TicketStatus::parse)?,
        source_unit: row.try_get::<Option<String>, _>("source_unit_id")?.map(UnitId),
        target_location: row.try_get::<Option<String>, _>("target_location_id")?.map(LocationId),
        target_status: parse_optional_enum(
            "target_status",
            row.try_get("target_status")?,
            MachineStatus::parse,
        )?,
        borrow_terms,
        creator: UserId(row.try_get("creator_id")?),
        approval_flow: ApprovalFlow::default(),
        details: Vec::new(),
        inventory: None,
        note: row.try_get("note")?,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}

fn detail_from_row(row: SqliteRow) -> Result<TicketDetail, RepositoryError> {
    Ok(TicketDetail { machine_id: MachineId(row.try_get("machine_id")?), note: row.try_get("note")? })
}

fn step_from_row(row: SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let decision: String = row.try_get("decision")?;

    Ok(ApprovalStep {
        approver: UserId(row.try_get("approver_id")?),
        display_name: row.try_get("display_name")?,
        step_flow: parse_u32("step_flow", row.try_get("step_flow")?)?,
        position: parse_u32("position", row.try_get("position")?)?,
        is_final: row.try_get("is_final")?,
        is_flow: row.try_get("is_flow")?,
        is_forward: row.try_get("is_forward")?,
        decision: parse_enum("decision", &decision, StepDecision::parse)?,
        status_text: row.try_get("status_text")?,
    })
}
