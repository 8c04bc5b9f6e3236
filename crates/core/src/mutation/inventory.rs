use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::identity::UserId;
use crate::domain::location::LocationKind;
use crate::domain::machine::{MachineId, MachineStatus};
use crate::domain::ticket::{InventoryCount, TicketId};
use crate::errors::DomainError;
use crate::mutation::{relocate, MutationError, MutationReport};
use crate::store::UnitOfWork;

/// Corrects machines a physical count found in the wrong place. Only
/// machines flagged as mislocated are touched.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryReconciler;

impl InventoryReconciler {
    pub async fn reconcile(
        &self,
        uow: &mut dyn UnitOfWork,
        ticket_id: &TicketId,
        count: &InventoryCount,
        ticket_machines: &[MachineId],
        actor: &UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<MutationReport, MutationError> {
        if let Some(stray) = count
            .departments
            .iter()
            .flat_map(|department| department.locations.iter())
            .flat_map(|location| location.machines.iter())
            .find(|entry| entry.mislocated && !ticket_machines.contains(&entry.machine_id))
        {
            return Err(DomainError::InvariantViolation(format!(
                "machine `{}` is flagged in the count but is not on ticket `{ticket_id}`",
                stray.machine_id
            ))
            .into());
        }

        let mut report = MutationReport::default();

        for department in &count.departments {
            for scanned in &department.locations {
                let flagged: Vec<_> =
                    scanned.machines.iter().filter(|machine| machine.mislocated).collect();
                if flagged.is_empty() {
                    continue;
                }

                let location = uow
                    .find_location_by_code(&scanned.location_code)
                    .await?
                    .ok_or_else(|| DomainError::LocationNotFound(scanned.location_code.clone()))?;
                let status = match location.kind {
                    LocationKind::Warehouse => MachineStatus::Available,
                    LocationKind::ShopFloor => MachineStatus::InUse,
                };

                for entry in flagged {
                    let mut machine = uow
                        .find_machine(&entry.machine_id)
                        .await?
                        .ok_or_else(|| DomainError::MachineNotFound(entry.machine_id.clone()))?;

                    if relocate(uow, &machine.id, &location.id, actor, ticket_id, occurred_at)
                        .await?
                    {
                        report.machines_moved += 1;
                    }
                    machine.current_status = status;
                    machine.updated_at = occurred_at;
                    uow.save_machine(&machine).await?;
                    report.machines_updated += 1;

                    debug!(
                        event_name = "inventory.machine_relocated",
                        ticket_id = %ticket_id,
                        machine_id = %machine.id,
                        location_code = %location.code,
                        department = %department.unit_id,
                        "mislocated machine corrected"
                    );
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::InventoryReconciler;
    use crate::domain::identity::{UnitId, UserId};
    use crate::domain::location::{Location, LocationId, LocationKind};
    use crate::domain::machine::{BorrowTerms, Machine, MachineId, MachineStatus};
    use crate::domain::ticket::{
        DepartmentCount, InventoryCount, ScannedLocation, ScannedMachine, TicketId,
    };
    use crate::errors::DomainError;
    use crate::mutation::MutationError;
    use crate::store::{InMemoryStore, TicketStore};

    fn machine(id: &str) -> Machine {
        Machine {
            id: MachineId(id.to_owned()),
            name: id.to_owned(),
            current_status: MachineStatus::Available,
            borrow_status: None,
            borrow: BorrowTerms::default(),
            rfid_tag: None,
            location_id: None,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    fn count(code: &str, machines: &[(&str, bool)]) -> InventoryCount {
        InventoryCount {
            departments: vec![DepartmentCount {
                unit_id: UnitId("assembly".to_owned()),
                locations: vec![ScannedLocation {
                    location_code: code.to_owned(),
                    machines: machines
                        .iter()
                        .map(|(id, mislocated)| ScannedMachine {
                            machine_id: MachineId((*id).to_owned()),
                            mislocated: *mislocated,
                        })
                        .collect(),
                }],
            }],
        }
    }

    fn ids(ids: &[&str]) -> Vec<MachineId> {
        ids.iter().map(|id| MachineId((*id).to_owned())).collect()
    }

    fn scanned(code: &str, machines: &[(&str, bool)]) -> ScannedLocation {
        ScannedLocation {
            location_code: code.to_owned(),
            machines: machines
                .iter()
                .map(|(id, mislocated)| ScannedMachine {
                    machine_id: MachineId((*id).to_owned()),
                    mislocated: *mislocated,
                })
                .collect(),
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::default();
        for (id, code, kind) in [
            ("L-WH", "WH-A", LocationKind::Warehouse),
            ("L-FL", "FL-1", LocationKind::ShopFloor),
        ] {
            store
                .insert_location(Location {
                    id: LocationId(id.to_owned()),
                    code: code.to_owned(),
                    name: code.to_owned(),
                    unit_id: UnitId("assembly".to_owned()),
                    kind,
                })
                .await;
        }
        store.insert_machine(machine("M-1")).await;
        store.insert_machine(machine("M-2")).await;
        store.assign(&MachineId("M-1".to_owned()), &LocationId("L-WH".to_owned())).await;
        store.assign(&MachineId("M-2".to_owned()), &LocationId("L-WH".to_owned())).await;
        store
    }

    #[tokio::test]
    async fn only_mislocated_machines_move() {
        let store = seeded_store().await;
        let ticket_id = TicketId("T-INV".to_owned());

        let mut uow = store.begin().await.expect("begin");
        let report = InventoryReconciler
            .reconcile(
                uow.as_mut(),
                &ticket_id,
                &count("FL-1", &[("M-1", true), ("M-2", false)]),
                &ids(&["M-1", "M-2"]),
                &UserId("u-admin".to_owned()),
                Utc::now(),
            )
            .await
            .expect("reconcile");
        uow.commit().await.expect("commit");

        assert_eq!(report.machines_moved, 1);
        let corrected = store.machine(&MachineId("M-1".to_owned())).await.expect("M-1");
        assert_eq!(corrected.location_id, Some(LocationId("L-FL".to_owned())));
        assert_eq!(corrected.current_status, MachineStatus::InUse);
        let untouched = store.machine(&MachineId("M-2".to_owned())).await.expect("M-2");
        assert_eq!(untouched.location_id, Some(LocationId("L-WH".to_owned())));
        assert_eq!(untouched.version, 1);
        assert_eq!(store.history().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_scanned_location_aborts() {
        let store = seeded_store().await;
        let result = {
            let mut uow = store.begin().await.expect("begin");
            InventoryReconciler
                .reconcile(
                    uow.as_mut(),
                    &TicketId("T-INV".to_owned()),
                    &count("NOPE-9", &[("M-1", true)]),
                    &ids(&["M-1"]),
                    &UserId("u-admin".to_owned()),
                    Utc::now(),
                )
                .await
        };

        assert_eq!(
            result,
            Err(MutationError::Domain(DomainError::LocationNotFound("NOPE-9".to_owned())))
        );
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn every_department_and_location_is_reconciled() {
        let store = seeded_store().await;
        store
            .insert_location(Location {
                id: LocationId("L-PT".to_owned()),
                code: "PT-1".to_owned(),
                name: "Paint floor".to_owned(),
                unit_id: UnitId("paint".to_owned()),
                kind: LocationKind::ShopFloor,
            })
            .await;
        store.insert_machine(machine("M-3")).await;
        store.assign(&MachineId("M-3".to_owned()), &LocationId("L-FL".to_owned())).await;
        let count = InventoryCount {
            departments: vec![
                DepartmentCount {
                    unit_id: UnitId("assembly".to_owned()),
                    locations: vec![
                        scanned("WH-A", &[("M-1", false)]),
                        // Flagged, but the record already says FL-1.
                        scanned("FL-1", &[("M-3", true)]),
                    ],
                },
                DepartmentCount {
                    unit_id: UnitId("paint".to_owned()),
                    locations: vec![scanned("PT-1", &[("M-2", true)])],
                },
            ],
        };

        let mut uow = store.begin().await.expect("begin");
        let report = InventoryReconciler
            .reconcile(
                uow.as_mut(),
                &TicketId("T-INV".to_owned()),
                &count,
                &ids(&["M-1", "M-2", "M-3"]),
                &UserId("u-admin".to_owned()),
                Utc::now(),
            )
            .await
            .expect("reconcile");
        uow.commit().await.expect("commit");

        assert_eq!(report.machines_updated, 2);
        assert_eq!(report.machines_moved, 1);
        let history = store.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].machine_id, MachineId("M-2".to_owned()));

        let painted = store.machine(&MachineId("M-2".to_owned())).await.expect("M-2");
        assert_eq!(painted.location_id, Some(LocationId("L-PT".to_owned())));
        assert_eq!(painted.current_status, MachineStatus::InUse);
        let in_place = store.machine(&MachineId("M-3".to_owned())).await.expect("M-3");
        assert_eq!(in_place.location_id, Some(LocationId("L-FL".to_owned())));
        assert_eq!(in_place.current_status, MachineStatus::InUse);
        let untouched = store.machine(&MachineId("M-1".to_owned())).await.expect("M-1");
        assert_eq!(untouched.version, 1);
    }

    #[tokio::test]
    async fn flagged_machine_outside_the_ticket_is_refused() {
        let store = seeded_store().await;
        let result = {
            let mut uow = store.begin().await.expect("begin");
            InventoryReconciler
                .reconcile(
                    uow.as_mut(),
                    &TicketId("T-INV".to_owned()),
                    &count("FL-1", &[("M-1", false), ("M-2", true)]),
                    &ids(&["M-1"]),
                    &UserId("u-admin".to_owned()),
                    Utc::now(),
                )
                .await
        };

        assert!(matches!(
            result,
            Err(MutationError::Domain(DomainError::InvariantViolation(ref message)))
                if message.contains("M-2")
        ));
        let m2 = store.machine(&MachineId("M-2".to_owned())).await.expect("M-2");
        assert_eq!(m2.location_id, Some(LocationId("L-WH".to_owned())));
        assert!(store.history().await.is_empty());
    }
}
