use serde::Serialize;
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_UNIT_IDS: &[&str] = &["assembly", "paint"];
const SEED_LOCATION_IDS: &[&str] = &["loc-asm-wh", "loc-asm-fl1", "loc-pnt-wh", "loc-pnt-fl1"];
const SEED_USER_IDS: &[&str] = &[
    "u-asm-clerk",
    "u-asm-admin",
    "u-pnt-lead",
    "dept-head",
    "finance-controller",
    "warehouse-keeper",
    "equipment-manager",
    "floor-supervisor",
];
const SEED_MACHINE_IDS: &[&str] = &["mc-001", "mc-002", "mc-003", "mc-004", "mc-005"];

/// Reference units, locations, users and machines used by local runs and the
/// end-to-end ticket checks. Loading is all-or-nothing.
pub struct ReferenceSeedDataset;

impl ReferenceSeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/reference_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(Self::SQL).await?;
        tx.commit().await?;

        Ok(SeedResult {
            units: SEED_UNIT_IDS.len(),
            locations: SEED_LOCATION_IDS.len(),
            users: SEED_USER_IDS.len(),
            machines: SEED_MACHINE_IDS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        for (name, table, ids) in [
            ("units", "org_unit", SEED_UNIT_IDS),
            ("locations", "location", SEED_LOCATION_IDS),
            ("users", "app_user", SEED_USER_IDS),
            ("machines", "machine", SEED_MACHINE_IDS),
        ] {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(1) FROM {table} WHERE id IN {}",
                sql_array_from_ids(ids)
            ))
            .fetch_one(pool)
            .await?;
            checks.push((name, count == ids.len() as i64));
        }

        let unassigned: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM machine m
             LEFT JOIN machine_location ml ON ml.machine_id = m.id
             WHERE m.borrow_status IS NULL AND ml.location_id IS NULL",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("in-house machines located", unassigned == 0));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded rows together with any tickets and history that
    /// reference them.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let machines = sql_array_from_ids(SEED_MACHINE_IDS);
        let mut tx = pool.begin().await?;

        tx.execute(
            format!(
                "DELETE FROM location_history WHERE machine_id IN {machines};
                 DELETE FROM ticket WHERE id IN (
                    SELECT ticket_id FROM ticket_detail WHERE machine_id IN {machines}
                 );
                 DELETE FROM machine_location WHERE machine_id IN {machines};
                 DELETE FROM machine WHERE id IN {machines};
                 DELETE FROM user_capability WHERE user_id IN {users};
                 DELETE FROM app_user WHERE id IN {users};
                 DELETE FROM location WHERE id IN {locations};
                 DELETE FROM org_unit WHERE id IN {units};",
                users = sql_array_from_ids(SEED_USER_IDS),
                locations = sql_array_from_ids(SEED_LOCATION_IDS),
                units = sql_array_from_ids(SEED_UNIT_IDS),
            )
            .as_str(),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub units: usize,
    pub locations: usize,
    pub users: usize,
    pub machines: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
