//! Restore round trips, backfill idempotence and step atomicity over the
//! clinic catalog.

mod common;

use common::*;

use vetledger::clinic::{revisions, seed, PetProfileUpdate, SeedPlan};
use vetledger::config::StorageConfig;
use vetledger::migration::{
    backup_name, Direction, MigrationError, Migrator, StepId, VersionToken,
};
use vetledger::{metrics, storage};

const CLINIC_TABLES: [&str; 8] = [
    "veterinarians",
    "owners",
    "pets",
    "appointments",
    "medical_records",
    "vaccines",
    "vaccination_records",
    "invoices",
];

#[tokio::test]
async fn test_profile_columns_survive_revert_window() {
    let migrator = migrated_to(revisions::PROFILES).await;
    let svc = service(&migrator).await;
    let owner = add_owner(&svc, "m3").await;

    let mut originals = Vec::new();
    for i in 0..5 {
        let pet = add_pet(&svc, owner, &format!("Original {i}")).await;
        let updated = svc
            .update_pet_profile(
                pet.pet_id,
                PetProfileUpdate {
                    microchip_number: Some(format!("CHIP-{i:03}")),
                    is_neutered: Some(i % 2 == 0),
                    blood_type: Some("A".into()),
                },
            )
            .await
            .unwrap();
        originals.push(updated);
    }
    drop(svc);

    let token = migrator
        .downgrade(&token(revisions::VACCINATIONS))
        .await
        .unwrap();
    assert_eq!(token, VersionToken::at(StepId::new(revisions::VACCINATIONS)));
    let backup = backup_name(&StepId::new(revisions::PROFILES), "pets");
    assert_eq!(count(migrator.pool(), &backup).await, 5);

    let during = service(&migrator).await;
    let newcomer = add_pet(&during, owner, "Newcomer").await;
    assert_eq!(newcomer.microchip_number, None);
    drop(during);

    migrator.upgrade(Some(&common::token(revisions::PROFILES))).await.unwrap();
    assert!(!table_exists(migrator.pool(), &backup).await);

    let svc = service(&migrator).await;
    for original in &originals {
        assert_eq!(&svc.get_pet(original.pet_id).await.unwrap(), original);
    }
    let newcomer = svc.get_pet(newcomer.pet_id).await.unwrap();
    assert_eq!(newcomer.microchip_number, None);
    assert_eq!(newcomer.blood_type, None);
    // Rows born in the window get the step's default backfill.
    assert_eq!(newcomer.is_neutered, Some(false));
}

#[tokio::test]
async fn test_full_catalog_round_trip_preserves_every_row() {
    let migrator = migrated_to(revisions::METRICS).await;
    let svc = service(&migrator).await;
    let plan = SeedPlan {
        seed: 11,
        veterinarians: 3,
        owners: 5,
        pets: 8,
        appointments: 30,
        anchor: day(2024, 9, 1),
    };
    seed(&svc, &plan).await.unwrap();
    drop(svc);

    let mut before = Vec::new();
    for table in CLINIC_TABLES {
        before.push(snapshot(migrator.pool(), table).await);
    }

    let base = migrator.downgrade(&VersionToken::base()).await.unwrap();
    assert!(base.is_base());
    for table in CLINIC_TABLES {
        assert!(!table_exists(migrator.pool(), table).await, "{table} still live");
    }

    let head = migrator.upgrade(None).await.unwrap();
    assert_eq!(head, token(revisions::METRICS));
    for (table, rows) in CLINIC_TABLES.iter().zip(&before) {
        assert_eq!(&snapshot(migrator.pool(), table).await, rows, "{table} changed");
    }

    metrics::verify(migrator.pool()).await.unwrap();

    let history = migrator.history().await.unwrap();
    assert_eq!(history.len(), 6 + 6 + 6);
    assert_eq!(history[6].direction, Direction::Backward);
    assert_eq!(history[6].step.as_str(), revisions::METRICS);
}

#[tokio::test]
async fn test_backfill_is_idempotent_across_reentry() {
    let migrator = migrated_to(revisions::BASE_SCHEMA).await;
    let svc = service(&migrator).await;
    let owner = add_owner(&svc, "bf").await;
    let pet = add_pet(&svc, owner, "Mochi").await;
    let vet = add_vet(&svc, "bf").await;
    for d in 1..=3 {
        complete(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 1, d, 9)).await;
    }
    cancel(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 1, 9, 9)).await;
    drop(svc);

    migrator.upgrade(Some(&token(revisions::INVOICES))).await.unwrap();
    let records = snapshot(migrator.pool(), "medical_records").await;
    let invoices = snapshot(migrator.pool(), "invoices").await;
    assert_eq!(records.len(), 3);
    assert_eq!(invoices.len(), 3);
    assert!(invoices.iter().all(|row| row.contains("'INV-HIST-")));
    assert!(invoices.iter().all(|row| row.contains("15000")));

    migrator.downgrade(&token(revisions::BASE_SCHEMA)).await.unwrap();
    migrator.upgrade(Some(&token(revisions::INVOICES))).await.unwrap();

    assert_eq!(snapshot(migrator.pool(), "medical_records").await, records);
    assert_eq!(snapshot(migrator.pool(), "invoices").await, invoices);
}

#[tokio::test]
async fn test_backfill_picks_up_rows_added_while_reverted() {
    let migrator = migrated_to(revisions::MEDICAL_RECORDS).await;
    let svc = service(&migrator).await;
    let owner = add_owner(&svc, "late").await;
    let pet = add_pet(&svc, owner, "Pip").await;
    let vet = add_vet(&svc, "late").await;
    complete(&svc, pet.pet_id, vet.veterinarian_id, at(2024, 2, 1, 9)).await;
    drop(svc);

    migrator.downgrade(&token(revisions::BASE_SCHEMA)).await.unwrap();
    let during = service(&migrator).await;
    complete(&during, pet.pet_id, vet.veterinarian_id, at(2024, 2, 2, 9)).await;
    drop(during);

    migrator.upgrade(Some(&token(revisions::MEDICAL_RECORDS))).await.unwrap();
    assert_eq!(count(migrator.pool(), "medical_records").await, 2);
}

#[tokio::test]
async fn test_reverting_empty_step_leaves_empty_backup() {
    let migrator = migrated_to(revisions::MEDICAL_RECORDS).await;
    assert_eq!(count(migrator.pool(), "medical_records").await, 0);

    migrator.downgrade(&token(revisions::BASE_SCHEMA)).await.unwrap();
    let backup = backup_name(&StepId::new(revisions::MEDICAL_RECORDS), "medical_records");
    assert!(table_exists(migrator.pool(), &backup).await);
    assert_eq!(count(migrator.pool(), &backup).await, 0);
}

#[tokio::test]
async fn test_collision_rolls_back_the_step() {
    let migrator = migrated_to(revisions::PROFILES).await;
    let backup = backup_name(&StepId::new(revisions::PROFILES), "pets");
    sqlx::query(&format!("CREATE TABLE {} (pet_id INTEGER)", storage::ident(&backup)))
        .execute(migrator.pool())
        .await
        .unwrap();

    let err = migrator
        .downgrade(&token(revisions::VACCINATIONS))
        .await
        .unwrap_err();
    assert_eq!(err.step().map(StepId::as_str), Some(revisions::PROFILES));
    match err {
        MigrationError::StepFailed { source, .. } => {
            assert!(matches!(*source, MigrationError::BackupCollision(_)));
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }

    assert_eq!(migrator.current().await.unwrap(), token(revisions::PROFILES));
    let mut conn = migrator.pool().acquire().await.unwrap();
    assert!(storage::column_exists(&mut conn, "owners", "emergency_contact").await.unwrap());
    assert!(storage::column_exists(&mut conn, "pets", "microchip_number").await.unwrap());
}

#[tokio::test]
async fn test_file_store_keeps_version_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        path: dir.path().join("clinic.db").to_string_lossy().into_owned(),
        ..StorageConfig::default()
    };

    {
        let pool = storage::connect(&config).await.unwrap();
        let migrator = Migrator::new(pool.clone(), revisions::catalog().unwrap())
            .await
            .unwrap();
        migrator.upgrade(Some(&token(revisions::VACCINATIONS))).await.unwrap();
        pool.close().await;
    }

    let pool = storage::connect(&config).await.unwrap();
    let migrator = Migrator::new(pool, revisions::catalog().unwrap())
        .await
        .unwrap();
    assert_eq!(migrator.current().await.unwrap(), token(revisions::VACCINATIONS));
    assert_eq!(migrator.upgrade(None).await.unwrap(), token(revisions::METRICS));
}
