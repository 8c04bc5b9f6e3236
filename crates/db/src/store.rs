//! [`TicketStore`] over SQLite. A unit of work owns one transaction; dropping
//! it without commit lets sqlx roll the transaction back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use equiptrack_core::domain::location::{
    Location, LocationAssignment, LocationHistoryEntry, LocationId,
};
use equiptrack_core::domain::machine::{Machine, MachineId};
use equiptrack_core::domain::ticket::{Ticket, TicketId};
use equiptrack_core::store::{StoreError, TicketStore, UnitOfWork};

use crate::repositories::{location, machine, ticket, RepositoryError};
use crate::DbPool;

#[derive(Clone)]
pub struct SqliteTicketStore {
    pool: DbPool,
}

impl SqliteTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::from(RepositoryError::from(error))
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(SqlUnitOfWork { tx: Some(tx) }))
    }

    async fn ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        Ok(ticket::find(&mut conn, id).await?)
    }

    async fn location(&self, id: &LocationId) -> Result<Option<Location>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        Ok(location::find(&mut conn, id).await?)
    }
}

pub struct SqlUnitOfWork {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqlUnitOfWork {
    fn conn(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl UnitOfWork for SqlUnitOfWork {
    async fn find_machine(&mut self, id: &MachineId) -> Result<Option<Machine>, StoreError> {
        Ok(machine::find(self.conn()?, id).await?)
    }

    async fn save_machine(&mut self, record: &Machine) -> Result<u32, StoreError> {
        match machine::update_versioned(self.conn()?, record).await? {
            0 => Err(StoreError::Conflict { entity: "machine", id: record.id.0.clone() }),
            _ => Ok(record.version + 1),
        }
    }

    async fn current_location(
        &mut self,
        machine_id: &MachineId,
    ) -> Result<Option<LocationAssignment>, StoreError> {
        Ok(machine::current_location(self.conn()?, machine_id).await?)
    }

    async fn upsert_location(&mut self, assignment: &LocationAssignment) -> Result<(), StoreError> {
        Ok(machine::upsert_location(self.conn()?, assignment).await?)
    }

    async fn touch_location(
        &mut self,
        machine_id: &MachineId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(machine::touch_location(self.conn()?, machine_id, at).await?)
    }

    async fn append_history(&mut self, entry: &LocationHistoryEntry) -> Result<(), StoreError> {
        Ok(machine::append_history(self.conn()?, entry).await?)
    }

    async fn find_location(&mut self, id: &LocationId) -> Result<Option<Location>, StoreError> {
        Ok(location::find(self.conn()?, id).await?)
    }

    async fn find_location_by_code(&mut self, code: &str) -> Result<Option<Location>, StoreError> {
        Ok(location::find_by_code(self.conn()?, code).await?)
    }

    async fn find_ticket(&mut self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(ticket::find(self.conn()?, id).await?)
    }

    async fn insert_ticket(&mut self, record: &Ticket) -> Result<(), StoreError> {
        ticket::insert(self.conn()?, record).await.map_err(|error| match error {
            RepositoryError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                StoreError::Conflict { entity: "ticket", id: record.id.0.clone() }
            }
            other => other.into(),
        })
    }

    async fn update_ticket(&mut self, record: &Ticket) -> Result<u32, StoreError> {
        match ticket::update_versioned(self.conn()?, record).await? {
            0 => Err(StoreError::Conflict { entity: "ticket", id: record.id.0.clone() }),
            _ => Ok(record.version + 1),
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await.map_err(backend)?;
        debug!(event_name = "store.committed", "unit of work committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use equiptrack_core::domain::identity::UnitId;
    use equiptrack_core::domain::location::{Location, LocationId, LocationKind};
    use equiptrack_core::domain::machine::{BorrowTerms, Machine, MachineId, MachineStatus};
    use equiptrack_core::store::{StoreError, TicketStore};

    use super::SqliteTicketStore;
    use crate::repositories::{location, machine};
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqliteTicketStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let mut conn = pool.acquire().await.expect("acquire");
        location::insert_unit(&mut conn, &UnitId("assembly".to_string()), "Assembly")
            .await
            .expect("unit");
        location::upsert(
            &mut conn,
            &Location {
                id: LocationId("L-WH".to_string()),
                code: "WH-A".to_string(),
                name: "Warehouse A".to_string(),
                unit_id: UnitId("assembly".to_string()),
                kind: LocationKind::Warehouse,
            },
        )
        .await
        .expect("location");
        machine::insert(
            &mut conn,
            &Machine {
                id: MachineId("M-1".to_string()),
                name: "Overlock".to_string(),
                current_status: MachineStatus::Available,
                borrow_status: None,
                borrow: BorrowTerms::default(),
                rfid_tag: None,
                location_id: None,
                version: 1,
                updated_at: Utc::now(),
            },
        )
        .await
        .expect("machine");
        drop(conn);

        SqliteTicketStore::new(pool)
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = store().await;
        {
            let mut uow = store.begin().await.expect("begin");
            let mut record = uow
                .find_machine(&MachineId("M-1".to_string()))
                .await
                .expect("find")
                .expect("present");
            record.current_status = MachineStatus::Broken;
            assert_eq!(uow.save_machine(&record).await.expect("save"), 2);
        }

        let mut uow = store.begin().await.expect("begin");
        let record =
            uow.find_machine(&MachineId("M-1".to_string())).await.expect("find").expect("present");
        assert_eq!(record.current_status, MachineStatus::Available);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn stale_machine_version_is_a_conflict() {
        let store = store().await;
        let mut uow = store.begin().await.expect("begin");
        let mut record =
            uow.find_machine(&MachineId("M-1".to_string())).await.expect("find").expect("present");
        record.current_status = MachineStatus::InUse;
        uow.save_machine(&record).await.expect("first save");

        let stale = uow.save_machine(&record).await;
        assert_eq!(
            stale,
            Err(StoreError::Conflict { entity: "machine", id: "M-1".to_string() })
        );
    }

    #[tokio::test]
    async fn location_code_lookup_ignores_case() {
        let store = store().await;
        let mut uow = store.begin().await.expect("begin");

        let found = uow.find_location_by_code(" wh-a ").await.expect("lookup");
        assert_eq!(found.map(|location| location.id), Some(LocationId("L-WH".to_string())));
    }

    #[tokio::test]
    async fn committed_unit_of_work_cannot_be_reused() {
        let store = store().await;
        let mut uow = store.begin().await.expect("begin");
        uow.commit().await.expect("commit");

        assert_eq!(uow.commit().await, Err(StoreError::Closed));
        assert_eq!(
            uow.find_machine(&MachineId("M-1".to_string())).await,
            Err(StoreError::Closed)
        );
    }
}
