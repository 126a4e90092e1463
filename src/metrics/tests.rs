use super::*;

use chrono::{NaiveDate, NaiveDateTime};

use crate::clinic::{AppointmentUpdate, ClinicError, ClinicService, NewAppointment};
use crate::config::Config;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    day(y, m, d).and_hms_opt(10, 30, 0).unwrap()
}

fn facts(pet_id: i64, veterinarian_id: i64, completed: bool, visit_date: NaiveDate) -> AppointmentFacts {
    AppointmentFacts {
        pet_id,
        veterinarian_id,
        completed,
        visit_date,
    }
}

async fn clinic() -> ClinicService {
    ClinicService::for_test(None, &Config::for_test()).await
}

async fn complete_on(svc: &ClinicService, pet_id: i64, vet_id: i64, when: NaiveDateTime) -> i64 {
    let appt = svc
        .schedule_appointment(NewAppointment::scheduled(pet_id, vet_id, when))
        .await
        .unwrap();
    svc.complete_appointment(appt.appointment_id, None).await.unwrap();
    appt.appointment_id
}

// ============================================================================
// transition
// ============================================================================

#[test]
fn test_transition_create_scheduled_counts_only_total() {
    let new = facts(1, 7, false, day(2024, 3, 1));
    assert_eq!(
        transition(None, Some(&new)),
        vec![MetricDelta::TotalAppointments {
            veterinarian_id: 7,
            delta: 1
        }]
    );
}

#[test]
fn test_transition_complete_adds_visit() {
    let old = facts(1, 7, false, day(2024, 3, 1));
    let new = facts(1, 7, true, day(2024, 3, 1));
    assert_eq!(
        transition(Some(&old), Some(&new)),
        vec![
            MetricDelta::VisitCount { pet_id: 1, delta: 1 },
            MetricDelta::LastVisitObserved {
                pet_id: 1,
                date: day(2024, 3, 1)
            },
        ]
    );
}

#[test]
fn test_transition_delete_completed_withdraws_everything() {
    let old = facts(1, 7, true, day(2024, 3, 1));
    assert_eq!(
        transition(Some(&old), None),
        vec![
            MetricDelta::TotalAppointments {
                veterinarian_id: 7,
                delta: -1
            },
            MetricDelta::VisitCount { pet_id: 1, delta: -1 },
            MetricDelta::LastVisitRetracted {
                pet_id: 1,
                date: day(2024, 3, 1)
            },
        ]
    );
}

#[test]
fn test_transition_unchanged_is_empty() {
    let same = facts(1, 7, true, day(2024, 3, 1));
    assert!(transition(Some(&same), Some(&same)).is_empty());
}

#[test]
fn test_transition_date_edit_moves_last_visit() {
    let old = facts(1, 7, true, day(2024, 3, 1));
    let new = facts(1, 7, true, day(2024, 2, 1));
    assert_eq!(
        transition(Some(&old), Some(&new)),
        vec![
            MetricDelta::LastVisitRetracted {
                pet_id: 1,
                date: day(2024, 3, 1)
            },
            MetricDelta::LastVisitObserved {
                pet_id: 1,
                date: day(2024, 2, 1)
            },
        ]
    );
}

#[test]
fn test_transition_reassignment_moves_counts() {
    let old = facts(1, 7, true, day(2024, 3, 1));
    let new = facts(2, 8, true, day(2024, 3, 1));
    let deltas = transition(Some(&old), Some(&new));
    assert_eq!(
        deltas,
        vec![
            MetricDelta::TotalAppointments {
                veterinarian_id: 7,
                delta: -1
            },
            MetricDelta::TotalAppointments {
                veterinarian_id: 8,
                delta: 1
            },
            MetricDelta::VisitCount { pet_id: 1, delta: -1 },
            MetricDelta::VisitCount { pet_id: 2, delta: 1 },
            MetricDelta::LastVisitRetracted {
                pet_id: 1,
                date: day(2024, 3, 1)
            },
            MetricDelta::LastVisitObserved {
                pet_id: 2,
                date: day(2024, 3, 1)
            },
        ]
    );
    assert_eq!(deltas[0].entity(), EntityRef::veterinarian(7));
    assert_eq!(deltas[3].entity(), EntityRef::pet(2));
}

#[test]
fn test_definitions_cover_every_metric_field() {
    let names: Vec<String> = definitions().iter().map(|d| d.name()).collect();
    assert_eq!(
        names,
        vec![
            "pets.visit_count",
            "pets.last_visit_date",
            "veterinarians.total_appointments"
        ]
    );
}

// ============================================================================
// Incremental maintenance
// ============================================================================

#[tokio::test]
async fn test_lifecycle_keeps_metrics_fresh() {
    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("a").await;

    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 10)).await;
    let cancelled = svc
        .schedule_appointment(NewAppointment::scheduled(pet.pet_id, vet.veterinarian_id, at(2024, 4, 1)))
        .await
        .unwrap();
    svc.cancel_appointment(cancelled.appointment_id).await.unwrap();

    let pet = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(pet.visit_count, Some(2));
    assert_eq!(pet.last_visit_date, Some(day(2024, 3, 10)));
    let vet = svc.get_veterinarian(vet.veterinarian_id).await.unwrap();
    assert_eq!(vet.total_appointments, Some(3));

    let mut conn = svc.pool().acquire().await.unwrap();
    assert!(check(&mut conn, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retracting_latest_visit_falls_back_to_previous() {
    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("b").await;

    let early = complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;
    let late = complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 10)).await;

    svc.delete_appointment(late).await.unwrap();
    let after_delete = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(after_delete.last_visit_date, Some(day(2024, 3, 1)));
    assert_eq!(after_delete.visit_count, Some(1));

    svc.update_appointment(
        early,
        AppointmentUpdate {
            appointment_date: Some(at(2024, 2, 1)),
            ..AppointmentUpdate::default()
        },
    )
    .await
    .unwrap();
    let after_edit = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(after_edit.last_visit_date, Some(day(2024, 2, 1)));

    svc.delete_appointment(early).await.unwrap();
    let emptied = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(emptied.last_visit_date, None);
    assert_eq!(emptied.visit_count, Some(0));
}

#[tokio::test]
async fn test_reassigning_pet_moves_visit() {
    let svc = clinic().await;
    let (first, vet) = svc.sample_pet_and_vet("c1").await;
    let (second, _) = svc.sample_pet_and_vet("c2").await;

    let id = complete_on(&svc, first.pet_id, vet.veterinarian_id, at(2024, 5, 5)).await;
    svc.update_appointment(
        id,
        AppointmentUpdate {
            pet_id: Some(second.pet_id),
            ..AppointmentUpdate::default()
        },
    )
    .await
    .unwrap();

    let first = svc.get_pet(first.pet_id).await.unwrap();
    let second = svc.get_pet(second.pet_id).await.unwrap();
    assert_eq!((first.visit_count, first.last_visit_date), (Some(0), None));
    assert_eq!(
        (second.visit_count, second.last_visit_date),
        (Some(1), Some(day(2024, 5, 5)))
    );
}

#[tokio::test]
async fn test_negative_count_is_reported_and_rolled_back() {
    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("d").await;
    let id = complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;

    sqlx::query("UPDATE pets SET visit_count = 0 WHERE pet_id = ?1")
        .bind(pet.pet_id)
        .execute(svc.pool())
        .await
        .unwrap();

    let err = svc.delete_appointment(id).await.unwrap_err();
    match err {
        ClinicError::Metrics(MetricsError::InvariantViolation { drifts }) => {
            assert_eq!(drifts.len(), 1);
            assert_eq!(drifts[0].entity, EntityRef::pet(pet.pet_id));
            assert_eq!(drifts[0].stored.as_deref(), Some("0"));
            assert_eq!(drifts[0].expected.as_deref(), Some("1"));
        }
        other => panic!("expected invariant violation, got {other:?}"),
    }

    // The appointment and the vet total are untouched.
    assert!(svc.get_appointment(id).await.is_ok());
    let vet = svc.get_veterinarian(vet.veterinarian_id).await.unwrap();
    assert_eq!(vet.total_appointments, Some(1));

    let mut conn = svc.pool().acquire().await.unwrap();
    let entries = quarantined(&mut conn).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entity, EntityRef::pet(pet.pet_id));
}

#[tokio::test]
async fn test_verify_after_mutation_catches_drift() {
    let mut config = Config::for_test();
    config.metrics.verify_after_mutation = true;
    let svc = ClinicService::for_test(None, &config).await;
    let (pet, vet) = svc.sample_pet_and_vet("e").await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;

    sqlx::query("UPDATE pets SET visit_count = 5 WHERE pet_id = ?1")
        .bind(pet.pet_id)
        .execute(svc.pool())
        .await
        .unwrap();

    let second = svc
        .schedule_appointment(NewAppointment::scheduled(pet.pet_id, vet.veterinarian_id, at(2024, 4, 1)))
        .await
        .unwrap();
    let err = svc
        .complete_appointment(second.appointment_id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClinicError::Metrics(MetricsError::InvariantViolation { .. })
    ));

    let still = svc.get_appointment(second.appointment_id).await.unwrap();
    assert_eq!(still.status, crate::clinic::AppointmentStatus::Scheduled);
}

// ============================================================================
// Consistency, quarantine and repair
// ============================================================================

#[tokio::test]
async fn test_verify_quarantines_and_repair_releases() {
    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("f").await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;

    sqlx::query("UPDATE veterinarians SET total_appointments = 9")
        .execute(svc.pool())
        .await
        .unwrap();

    {
        let mut conn = svc.pool().acquire().await.unwrap();
        let drifts = check(&mut conn, None).await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].metric, "veterinarians.total_appointments");
        assert_eq!(drifts[0].stored.as_deref(), Some("9"));
        assert_eq!(drifts[0].expected.as_deref(), Some("1"));
    }

    let err = verify(svc.pool()).await.unwrap_err();
    assert!(matches!(err, MetricsError::InvariantViolation { .. }));

    let refused = svc
        .schedule_appointment(NewAppointment::scheduled(pet.pet_id, vet.veterinarian_id, at(2024, 4, 1)))
        .await
        .unwrap_err();
    assert!(matches!(
        refused,
        ClinicError::Metrics(MetricsError::Quarantined(entity)) if entity == EntityRef::veterinarian(vet.veterinarian_id)
    ));
    assert!(svc.list_appointments(0, 10).await.unwrap().len() == 1);

    let report = repair(svc.pool(), Some(EntityRef::veterinarian(vet.veterinarian_id)))
        .await
        .unwrap();
    assert_eq!(report, RepairReport { recomputed: 1, released: 1 });

    verify(svc.pool()).await.unwrap();
    svc.schedule_appointment(NewAppointment::scheduled(pet.pet_id, vet.veterinarian_id, at(2024, 4, 1)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recompute_matches_fresh_aggregates() {
    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("g").await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 6, 9)).await;
    let cancelled = svc
        .schedule_appointment(NewAppointment::scheduled(pet.pet_id, vet.veterinarian_id, at(2024, 7, 1)))
        .await
        .unwrap();
    svc.cancel_appointment(cancelled.appointment_id).await.unwrap();

    sqlx::query("UPDATE pets SET visit_count = 0, last_visit_date = NULL")
        .execute(svc.pool())
        .await
        .unwrap();

    let mut conn = svc.pool().acquire().await.unwrap();
    assert_eq!(check(&mut conn, None).await.unwrap().len(), 2);
    assert_eq!(recompute(&mut conn, EntityKind::Pet, None).await.unwrap(), 1);
    assert!(check(&mut conn, None).await.unwrap().is_empty());
    drop(conn);

    let pet = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(pet.visit_count, Some(2));
    assert_eq!(pet.last_visit_date, Some(day(2024, 6, 9)));
}

#[tokio::test]
async fn test_recompute_task_releases_quarantine() {
    use crate::migration::BackfillTask;

    let svc = clinic().await;
    let (pet, vet) = svc.sample_pet_and_vet("h").await;
    complete_on(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 3, 1)).await;

    sqlx::query("UPDATE pets SET visit_count = 4")
        .execute(svc.pool())
        .await
        .unwrap();
    assert!(verify(svc.pool()).await.is_err());

    let mut conn = svc.pool().acquire().await.unwrap();
    assert_eq!(quarantined(&mut conn).await.unwrap().len(), 1);
    let rows = RecomputeMetrics.run(&mut conn).await.unwrap();
    assert_eq!(rows, 2);
    assert!(quarantined(&mut conn).await.unwrap().is_empty());
    assert!(check(&mut conn, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_verify_and_repair_require_metric_fields() {
    let svc = ClinicService::for_test(Some(crate::clinic::revisions::INVOICES), &Config::for_test()).await;
    svc.sample_pet_and_vet("i").await;

    let err = verify(svc.pool()).await.unwrap_err();
    assert!(matches!(&err, MetricsError::MissingField(name) if name == "pets.visit_count"));
    let err = repair(svc.pool(), None).await.unwrap_err();
    assert!(matches!(err, MetricsError::MissingField(_)));

    let mut conn = svc.pool().acquire().await.unwrap();
    assert!(quarantined(&mut conn).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delta_for_missing_owner_is_refused() {
    let svc = clinic().await;
    let (pet, _) = svc.sample_pet_and_vet("j").await;

    let mut tx = crate::storage::begin_write(svc.pool()).await.unwrap();
    let err = MetricsMaintainer::new(false)
        .apply(&mut tx, &[MetricDelta::VisitCount { pet_id: 999, delta: 1 }])
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::MissingEntity(e) if e == EntityRef::pet(999)));

    MetricsMaintainer::new(false)
        .apply(&mut tx, &[MetricDelta::VisitCount { pet_id: pet.pet_id, delta: 1 }])
        .await
        .unwrap();
    tx.rollback().await.unwrap();
}
