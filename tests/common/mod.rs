//! Shared fixtures for integration tests.
//!
//! Every fixture works against a private in-memory store migrated with the
//! clinic catalog. The in-memory pool holds a single connection, so helpers
//! never keep a connection checked out across calls.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;

use vetledger::clinic::{
    revisions, ClinicService, NewAppointment, NewOwner, NewPet, NewVeterinarian, Pet, Veterinarian,
};
use vetledger::config::Config;
use vetledger::migration::{Migrator, StepId, VersionToken};
use vetledger::storage;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, hour: u32) -> NaiveDateTime {
    day(y, m, d).and_hms_opt(hour, 0, 0).unwrap()
}

pub fn token(id: &str) -> VersionToken {
    if id == "base" {
        VersionToken::base()
    } else {
        VersionToken::at(StepId::new(id))
    }
}

/// In-memory store with the clinic catalog attached, nothing applied.
pub async fn clinic_migrator() -> Migrator {
    let pool = storage::connect_in_memory().await.unwrap();
    Migrator::new(pool, revisions::catalog().unwrap()).await.unwrap()
}

/// In-memory store migrated to `target`.
pub async fn migrated_to(target: &str) -> Migrator {
    let migrator = clinic_migrator().await;
    migrator.upgrade(Some(&token(target))).await.unwrap();
    migrator
}

/// Service over the migrator's store at its current version.
pub async fn service(migrator: &Migrator) -> ClinicService {
    ClinicService::open(migrator.pool().clone(), &Config::for_test())
        .await
        .unwrap()
}

pub async fn add_owner(svc: &ClinicService, tag: &str) -> i64 {
    svc.create_owner(NewOwner {
        first_name: "Robin".into(),
        last_name: "Okafor".into(),
        email: format!("owner-{tag}@example.com"),
        ..NewOwner::default()
    })
    .await
    .unwrap()
    .owner_id
}

pub async fn add_pet(svc: &ClinicService, owner_id: i64, name: &str) -> Pet {
    svc.create_pet(NewPet {
        name: name.into(),
        species: "Cat".into(),
        owner_id,
        ..NewPet::default()
    })
    .await
    .unwrap()
}

pub async fn add_vet(svc: &ClinicService, tag: &str) -> Veterinarian {
    svc.create_veterinarian(NewVeterinarian {
        license_number: format!("LIC-{tag}"),
        first_name: "Jules".into(),
        last_name: "Tanaka".into(),
        email: format!("vet-{tag}@example.com"),
        ..NewVeterinarian::default()
    })
    .await
    .unwrap()
}

pub async fn complete(svc: &ClinicService, pet_id: i64, vet_id: i64, when: NaiveDateTime) -> i64 {
    let appt = svc
        .schedule_appointment(NewAppointment::scheduled(pet_id, vet_id, when))
        .await
        .unwrap();
    svc.complete_appointment(appt.appointment_id, None)
        .await
        .unwrap();
    appt.appointment_id
}

pub async fn cancel(svc: &ClinicService, pet_id: i64, vet_id: i64, when: NaiveDateTime) -> i64 {
    let appt = svc
        .schedule_appointment(NewAppointment::scheduled(pet_id, vet_id, when))
        .await
        .unwrap();
    svc.cancel_appointment(appt.appointment_id).await.unwrap();
    appt.appointment_id
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    storage::count_rows(&mut conn, table).await.unwrap()
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
    let mut conn = pool.acquire().await.unwrap();
    storage::table_exists(&mut conn, table).await.unwrap()
}

/// Every row of `table` rendered as SQL literals, ordered by the first column.
pub async fn snapshot(pool: &SqlitePool, table: &str) -> Vec<String> {
    let columns: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(pool)
            .await
            .unwrap();
    let rendered: Vec<String> = columns
        .iter()
        .map(|c| format!("quote({})", storage::ident(c)))
        .collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY 1",
        rendered.join(" || '|' || "),
        storage::ident(table)
    );
    sqlx::query_scalar(&sql).fetch_all(pool).await.unwrap()
}
