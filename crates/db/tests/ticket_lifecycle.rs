use std::sync::Arc;

use equiptrack_core::approvals::{ApprovalCallback, ApprovalPolicy, ExternalStep};
use equiptrack_core::audit::InMemoryAuditSink;
use equiptrack_core::config::AppConfig;
use equiptrack_core::domain::identity::UserId;
use equiptrack_core::domain::location::LocationId;
use equiptrack_core::domain::machine::{MachineId, MachineStatus};
use equiptrack_core::domain::ticket::{
    DepartmentCount, InventoryCount, ScannedLocation, ScannedMachine, TicketDetail, TicketStatus,
};
use equiptrack_core::errors::ApplicationError;
use equiptrack_core::ports::RecordingApprovalDispatch;
use equiptrack_core::service::{CallbackDisposition, NewTicket, RequestContext, TicketService};
use equiptrack_core::store::{TicketStore, UnitOfWork};
use equiptrack_core::UnitId;
use equiptrack_db::repositories::machine;
use equiptrack_db::{
    connect_with_settings, migrations, DbPool, ReferenceSeedDataset, SqlIdentityDirectory,
    SqliteTicketStore,
};

struct Harness {
    pool: DbPool,
    store: SqliteTicketStore,
    dispatch: RecordingApprovalDispatch,
    service: TicketService,
}

async fn harness_with(dispatch: RecordingApprovalDispatch) -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    ReferenceSeedDataset::load(&pool).await.expect("seed");

    let store = SqliteTicketStore::new(pool.clone());
    let service = TicketService::new(
        Arc::new(store.clone()),
        Arc::new(SqlIdentityDirectory::new(pool.clone())),
        Arc::new(dispatch.clone()),
        Arc::new(InMemoryAuditSink::default()),
        ApprovalPolicy::default(),
        AppConfig::default().permissions,
    );
    Harness { pool, store, dispatch, service }
}

async fn harness() -> Harness {
    harness_with(RecordingApprovalDispatch::default()).await
}

fn ctx(actor: &str) -> RequestContext {
    RequestContext::new(actor, format!("corr-{actor}"))
}

fn ticket_input(category: &str, operation: &str, machines: &[&str]) -> NewTicket {
    NewTicket {
        category: category.to_string(),
        operation: operation.to_string(),
        details: machines
            .iter()
            .map(|id| TicketDetail { machine_id: MachineId((*id).to_string()), note: None })
            .collect(),
        ..NewTicket::default()
    }
}

async fn machine_row(pool: &DbPool, id: &str) -> equiptrack_core::Machine {
    let mut conn = pool.acquire().await.expect("acquire");
    machine::find(&mut conn, &MachineId(id.to_string())).await.expect("find").expect("machine")
}

async fn history_rows(pool: &DbPool, id: &str) -> usize {
    let mut conn = pool.acquire().await.expect("acquire");
    machine::history(&mut conn, &MachineId(id.to_string())).await.expect("history").len()
}

#[tokio::test]
async fn transfer_to_shop_floor_persists_move_and_history() {
    let h = harness().await;
    let mut input = ticket_input("internal_transfer", "internal_transfer", &["mc-001"]);
    input.target_location = Some(LocationId("loc-asm-fl1".to_string()));

    let created = h.service.create(&ctx("u-asm-clerk"), input).await.expect("create");
    assert_eq!(created.status, TicketStatus::PendingApproval);

    let stored = h.store.ticket(&created.id).await.expect("read").expect("ticket");
    assert_eq!(stored, created);

    let done = h.service.approve(&ctx("u-asm-admin"), &created.id).await.expect("approve");
    assert_eq!(done.status, TicketStatus::Completed);
    assert_eq!(done.version, 2);

    let moved = machine_row(&h.pool, "mc-001").await;
    assert_eq!(moved.current_status, MachineStatus::InUse);
    assert_eq!(moved.location_id, Some(LocationId("loc-asm-fl1".to_string())));
    assert_eq!(moved.version, 2);
    assert_eq!(history_rows(&h.pool, "mc-001").await, 1);
}

#[tokio::test]
async fn cross_unit_transfer_lists_destination_confirmers() {
    let h = harness().await;
    let mut input = ticket_input("internal_transfer", "internal_transfer", &["mc-002"]);
    input.target_location = Some(LocationId("loc-pnt-fl1".to_string()));

    let created = h.service.create(&ctx("u-asm-clerk"), input).await.expect("create");

    assert_eq!(created.status, TicketStatus::PendingConfirmation);
    let confirmer = created.approval_flow.find(&UserId("u-pnt-lead".to_string())).expect("step");
    assert_eq!(confirmer.display_name, "Paint Lead");
    assert!(!confirmer.is_final);

    let confirmed = h.service.confirm(&ctx("u-pnt-lead"), &created.id).await.expect("confirm");
    assert_eq!(confirmed.status, TicketStatus::PendingApproval);
}

#[tokio::test]
async fn returning_borrowed_out_machine_clears_counterparty() {
    let h = harness().await;
    let mut input = ticket_input("import", "borrowed_out_return", &["mc-004"]);
    input.target_location = Some(LocationId("loc-asm-wh".to_string()));

    let created = h.service.create(&ctx("u-asm-clerk"), input).await.expect("create");
    let callback = ApprovalCallback {
        ticket_id: created.id.clone(),
        status_text: "Completed".to_string(),
        approval_flow: vec![ExternalStep {
            approver: UserId("dept-head".to_string()),
            display_name: Some("Department Head".to_string()),
            step_flow: 0,
            is_final: true,
            is_flow: true,
            status: Some("Approved".to_string()),
        }],
    };

    let first = h.service.handle_callback(&ctx("approval-service"), &callback).await.expect("cb");
    let replay = h.service.handle_callback(&ctx("approval-service"), &callback).await.expect("cb");

    assert_eq!(first.disposition, CallbackDisposition::Applied);
    assert_eq!(replay.disposition, CallbackDisposition::IgnoredTerminal);
    let returned = machine_row(&h.pool, "mc-004").await;
    assert_eq!(returned.current_status, MachineStatus::Available);
    assert_eq!(returned.borrow_status, None);
    assert_eq!(returned.borrow.counterparty, None);
    assert_eq!(returned.location_id, Some(LocationId("loc-asm-wh".to_string())));
    assert_eq!(history_rows(&h.pool, "mc-004").await, 1);
}

#[tokio::test]
async fn inventory_check_round_trips_scans_and_corrects_locations() {
    let h = harness().await;
    let mut input = ticket_input("inventory_check", "inventory_check", &[]);
    input.inventory = Some(InventoryCount {
        departments: vec![DepartmentCount {
            unit_id: UnitId("assembly".to_string()),
            locations: vec![ScannedLocation {
                location_code: "asm-fl1".to_string(),
                machines: vec![
                    ScannedMachine { machine_id: MachineId("mc-001".to_string()), mislocated: true },
                    ScannedMachine { machine_id: MachineId("mc-002".to_string()), mislocated: false },
                ],
            }],
        }],
    });

    let created = h.service.create(&ctx("u-asm-clerk"), input).await.expect("create");
    assert_eq!(created.details.len(), 2);
    let stored = h.store.ticket(&created.id).await.expect("read").expect("ticket");
    assert_eq!(stored.inventory, created.inventory);

    h.service.approve(&ctx("u-asm-admin"), &created.id).await.expect("approve");

    let corrected = machine_row(&h.pool, "mc-001").await;
    assert_eq!(corrected.location_id, Some(LocationId("loc-asm-fl1".to_string())));
    assert_eq!(corrected.current_status, MachineStatus::InUse);
    assert_eq!(history_rows(&h.pool, "mc-002").await, 0);
}

#[tokio::test]
async fn rejected_dispatch_rolls_back_ticket_rows() {
    let h = harness_with(RecordingApprovalDispatch::rejecting("service down")).await;
    let mut input = ticket_input("export", "maintenance", &["mc-001"]);
    input.note = Some("annual service".to_string());

    let result = h.service.create(&ctx("u-asm-clerk"), input).await;

    assert!(matches!(result, Err(ApplicationError::Integration(_))));
    assert_eq!(h.dispatch.requests().len(), 1);
    let tickets: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM ticket")
        .fetch_one(&h.pool)
        .await
        .expect("count tickets");
    let details: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM ticket_detail")
        .fetch_one(&h.pool)
        .await
        .expect("count details");
    assert_eq!((tickets, details), (0, 0));
}

#[tokio::test]
async fn stale_ticket_version_aborts_update() {
    let h = harness().await;
    let created = h
        .service
        .create(&ctx("u-asm-clerk"), ticket_input("export", "maintenance", &["mc-002"]))
        .await
        .expect("create");

    h.service.cancel(&ctx("u-asm-clerk"), &created.id).await.expect("cancel");

    let mut uow = h.store.begin().await.expect("begin");
    let result = uow.update_ticket(&created).await;
    assert!(result.is_err());
    drop(uow);

    let machine = machine_row(&h.pool, "mc-002").await;
    assert_eq!(machine.current_status, MachineStatus::InUse);
    assert_eq!(machine.version, 1);
}
