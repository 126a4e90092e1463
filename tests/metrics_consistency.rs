//! Derived metrics stay equal to their fresh aggregates across arbitrary
//! appointment lifecycles.

mod common;

use common::*;
use rand::prelude::*;

use vetledger::clinic::{
    revisions, AppointmentStatus, AppointmentUpdate, ClinicService, NewAppointment,
};
use vetledger::metrics;

async fn assert_consistent(svc: &ClinicService, op: &str) {
    let mut conn = svc.pool().acquire().await.unwrap();
    let drifts = metrics::check(&mut conn, None).await.unwrap();
    assert!(drifts.is_empty(), "drift after {op}: {drifts:?}");
}

#[tokio::test]
async fn test_random_lifecycle_keeps_metrics_fresh() {
    let migrator = migrated_to(revisions::METRICS).await;
    let svc = service(&migrator).await;
    let mut rng = StdRng::seed_from_u64(20240601);

    let mut pets = Vec::new();
    for i in 0..4 {
        let owner = add_owner(&svc, &format!("life-{i}")).await;
        pets.push(add_pet(&svc, owner, &format!("Pet {i}")).await.pet_id);
    }
    let mut vets = Vec::new();
    for i in 0..3 {
        vets.push(add_vet(&svc, &format!("life-{i}")).await.veterinarian_id);
    }

    // (appointment id, still scheduled)
    let mut live: Vec<(i64, bool)> = Vec::new();

    for _ in 0..200 {
        let pending: Vec<usize> = live
            .iter()
            .enumerate()
            .filter(|(_, (_, scheduled))| *scheduled)
            .map(|(i, _)| i)
            .collect();

        let op = rng.random_range(0..6);
        let label = match op {
            1..=3 if !pending.is_empty() => {
                let slot = pending[rng.random_range(0..pending.len())];
                let id = live[slot].0;
                let appt = match op {
                    1 => svc.complete_appointment(id, None).await,
                    2 => svc.cancel_appointment(id).await,
                    _ => svc.mark_no_show(id).await,
                }
                .unwrap();
                assert!(appt.status.is_terminal());
                live[slot].1 = false;
                "transition"
            }
            4 if !live.is_empty() => {
                let id = live[rng.random_range(0..live.len())].0;
                let changes = AppointmentUpdate {
                    pet_id: rng
                        .random_bool(0.5)
                        .then(|| pets[rng.random_range(0..pets.len())]),
                    veterinarian_id: rng
                        .random_bool(0.5)
                        .then(|| vets[rng.random_range(0..vets.len())]),
                    appointment_date: rng.random_bool(0.5).then(|| {
                        at(2024, rng.random_range(1..=12), rng.random_range(1..=28), 10)
                    }),
                    ..AppointmentUpdate::default()
                };
                svc.update_appointment(id, changes).await.unwrap();
                "edit"
            }
            5 if !live.is_empty() => {
                let slot = rng.random_range(0..live.len());
                let (id, _) = live.swap_remove(slot);
                svc.delete_appointment(id).await.unwrap();
                "delete"
            }
            _ => {
                let pet = pets[rng.random_range(0..pets.len())];
                let vet = vets[rng.random_range(0..vets.len())];
                let when = at(2024, rng.random_range(1..=12), rng.random_range(1..=28), 9);
                let appt = svc
                    .schedule_appointment(NewAppointment::scheduled(pet, vet, when))
                    .await
                    .unwrap();
                assert_eq!(appt.status, AppointmentStatus::Scheduled);
                live.push((appt.appointment_id, true));
                "schedule"
            }
        };
        assert_consistent(&svc, label).await;
    }

    assert_eq!(svc.list_appointments(0, 1_000).await.unwrap().len(), live.len());
}

#[tokio::test]
async fn test_deleting_sole_visit_clears_last_visit() {
    let migrator = migrated_to(revisions::METRICS).await;
    let svc = service(&migrator).await;
    let owner = add_owner(&svc, "sole").await;
    let pet = add_pet(&svc, owner, "Solo").await;
    let vet = add_vet(&svc, "sole").await;

    let id = complete(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 5, 5, 9)).await;
    let visited = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(visited.visit_count, Some(1));
    assert_eq!(visited.last_visit_date, Some(day(2024, 5, 5)));

    svc.delete_appointment(id).await.unwrap();
    let cleared = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(cleared.visit_count, Some(0));
    assert_eq!(cleared.last_visit_date, None);
    assert_eq!(
        svc.get_veterinarian(vet.veterinarian_id)
            .await
            .unwrap()
            .total_appointments,
        Some(0)
    );
    assert_consistent(&svc, "delete").await;
}

#[tokio::test]
async fn test_upgrade_derives_metrics_from_history() {
    let migrator = migrated_to(revisions::INVOICES).await;
    let svc = service(&migrator).await;
    let owner = add_owner(&svc, "hist").await;
    let pet = add_pet(&svc, owner, "Biscuit").await;
    let vet = add_vet(&svc, "hist").await;
    complete(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1, 9)).await;
    complete(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 8, 9)).await;
    cancel(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 15, 9)).await;
    drop(svc);

    migrator.upgrade(None).await.unwrap();
    let svc = service(&migrator).await;

    let pet = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(pet.visit_count, Some(2));
    assert_eq!(pet.last_visit_date, Some(day(2024, 3, 8)));
    let vet = svc.get_veterinarian(vet.veterinarian_id).await.unwrap();
    assert_eq!(vet.total_appointments, Some(3));
    assert_consistent(&svc, "upgrade").await;
}
