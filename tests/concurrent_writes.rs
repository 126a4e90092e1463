//! Lifecycle operations from many tasks against one file-backed store.

mod common;

use std::sync::Arc;

use common::*;
use tokio::task::JoinSet;

use vetledger::clinic::{revisions, ClinicService, NewAppointment};
use vetledger::config::{Config, StorageConfig};
use vetledger::migration::Migrator;
use vetledger::{metrics, storage};

async fn file_service(dir: &tempfile::TempDir) -> ClinicService {
    let config = Config {
        storage: StorageConfig {
            path: dir.path().join("clinic.db").to_string_lossy().into_owned(),
            max_connections: 4,
            busy_timeout_secs: 5,
            ..StorageConfig::default()
        },
        ..Config::default()
    };
    let pool = storage::connect(&config.storage).await.unwrap();
    let migrator = Migrator::new(pool.clone(), revisions::catalog().unwrap())
        .await
        .unwrap();
    migrator.upgrade(None).await.unwrap();
    ClinicService::open(pool, &config).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lifecycle_calls_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(file_service(&dir).await);
    let owner = add_owner(&svc, "busy").await;
    let pet = add_pet(&svc, owner, "Rush").await;
    let vet = add_vet(&svc, "busy").await;

    let mut tasks = JoinSet::new();
    for i in 0..16u32 {
        let svc = Arc::clone(&svc);
        tasks.spawn(async move {
            let appt = svc
                .schedule_appointment(NewAppointment::scheduled(
                    pet.pet_id,
                    vet.veterinarian_id,
                    at(2024, 6, 1 + i, 9),
                ))
                .await?;
            if i % 2 == 0 {
                svc.complete_appointment(appt.appointment_id, None).await?;
            }
            Ok::<_, vetledger::clinic::ClinicError>(())
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined.unwrap() {
            failures.push(e.to_string());
        }
    }
    assert!(failures.is_empty(), "failed writes: {failures:?}");

    let pet = svc.get_pet(pet.pet_id).await.unwrap();
    assert_eq!(pet.visit_count, Some(8));
    let vet = svc.get_veterinarian(vet.veterinarian_id).await.unwrap();
    assert_eq!(vet.total_appointments, Some(16));

    let mut conn = svc.pool().acquire().await.unwrap();
    assert!(metrics::check(&mut conn, None).await.unwrap().is_empty());
}
