//! The clinic's migration steps, oldest first.

use std::sync::Arc;

use sea_query::{Alias, Expr, Func, Query, SelectStatement};

use crate::metrics::RecomputeMetrics;
use crate::migration::{
    Backfill, ColumnDefault, ColumnGroup, ColumnSpec, ColumnType, EnumSpec, ForeignKeySpec,
    IndexSpec, MigrationCatalog, MigrationStep, OnDelete, Result, TableSpec, Transform,
};
use crate::storage::schema::Appointments;

use super::models::{AppointmentStatus, PaymentMethod, PaymentStatus};

/// Veterinarians, owners, pets and appointments.
pub const BASE_SCHEMA: &str = "63590237cb51";
/// Medical records, backfilled from completed appointments.
pub const MEDICAL_RECORDS: &str = "4501f9a711d1";
/// Vaccines and vaccination records.
pub const VACCINATIONS: &str = "3c173f997576";
/// Owner contact and pet profile columns.
pub const PROFILES: &str = "b26d1d9b7890";
/// Invoices, backfilled from completed appointments.
pub const INVOICES: &str = "50a3c2e591e6";
/// Derived visit and appointment metrics.
pub const METRICS: &str = "b9d925015eb2";

pub const PRELIMINARY_DIAGNOSIS: &str = "Preliminary diagnosis based on completed appointment";
pub const UNSPECIFIED_TREATMENT: &str = "Initial treatment not specified";
/// Flat amount of backfilled historical invoices.
pub const HISTORICAL_INVOICE_CENTS: i64 = 15_000;

/// The full clinic catalog.
pub fn catalog() -> Result<MigrationCatalog> {
    MigrationCatalog::new(vec![
        base_schema(),
        medical_records(),
        vaccinations(),
        profiles(),
        invoices(),
        metrics(),
    ])
}

fn src() -> Alias {
    Alias::new("src")
}

fn completed_appointments() -> SelectStatement {
    Query::select()
        .from_as(Appointments::Table, src())
        .and_where(Expr::col((src(), Appointments::Status)).eq(AppointmentStatus::Completed.as_str()))
        .to_owned()
}

fn base_schema() -> MigrationStep {
    let statuses = AppointmentStatus::ALL.map(|s| s.as_str());

    MigrationStep::new(BASE_SCHEMA, None, "Base clinic schema")
        .with(Transform::CreateEnum(EnumSpec::new("appointment_status", &statuses)))
        .with(Transform::CreateTable(
            TableSpec::new("veterinarians")
                .column(ColumnSpec::id("veterinarian_id"))
                .column(ColumnSpec::new("license_number", ColumnType::VarChar(50)).not_null().unique())
                .column(ColumnSpec::new("first_name", ColumnType::VarChar(100)).not_null())
                .column(ColumnSpec::new("last_name", ColumnType::VarChar(100)).not_null())
                .column(ColumnSpec::new("email", ColumnType::VarChar(100)).not_null().unique())
                .column(ColumnSpec::new("phone", ColumnType::VarChar(50)))
                .column(ColumnSpec::new("specialization", ColumnType::VarChar(100)))
                .column(ColumnSpec::new("hire_date", ColumnType::Date)),
        ))
        .with(Transform::CreateTable(
            TableSpec::new("owners")
                .column(ColumnSpec::id("owner_id"))
                .column(ColumnSpec::new("first_name", ColumnType::VarChar(100)).not_null())
                .column(ColumnSpec::new("last_name", ColumnType::VarChar(100)).not_null())
                .column(ColumnSpec::new("email", ColumnType::VarChar(100)).not_null().unique())
                .column(ColumnSpec::new("phone", ColumnType::VarChar(50)))
                .column(ColumnSpec::new("address", ColumnType::Text)),
        ))
        .with(Transform::CreateTable(
            TableSpec::new("pets")
                .column(ColumnSpec::id("pet_id"))
                .column(ColumnSpec::new("name", ColumnType::VarChar(100)).not_null())
                .column(ColumnSpec::new("species", ColumnType::VarChar(50)).not_null())
                .column(ColumnSpec::new("breed", ColumnType::VarChar(100)))
                .column(ColumnSpec::new("birth_date", ColumnType::Date))
                .column(ColumnSpec::new("weight", ColumnType::Real))
                .column(ColumnSpec::new("owner_id", ColumnType::Integer).not_null())
                .foreign_key(ForeignKeySpec::new("owner_id", "owners", "owner_id")),
        ))
        .with(Transform::CreateTable(
            TableSpec::new("appointments")
                .column(ColumnSpec::id("appointment_id"))
                .column(ColumnSpec::new("pet_id", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("veterinarian_id", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("appointment_date", ColumnType::Timestamp).not_null())
                .column(ColumnSpec::new("reason", ColumnType::Text))
                .column(
                    ColumnSpec::new("status", ColumnType::Enum("appointment_status".into()))
                        .not_null()
                        .default(ColumnDefault::Text(AppointmentStatus::Scheduled.as_str().into())),
                )
                .column(ColumnSpec::new("notes", ColumnType::Text))
                .column(
                    ColumnSpec::new("created_at", ColumnType::Timestamp)
                        .default(ColumnDefault::CurrentTimestamp),
                )
                .foreign_key(ForeignKeySpec::new("pet_id", "pets", "pet_id"))
                .foreign_key(ForeignKeySpec::new(
                    "veterinarian_id",
                    "veterinarians",
                    "veterinarian_id",
                )),
        ))
        .with(Transform::CreateIndex(IndexSpec::new(
            "ix_appointments_pet_id",
            "appointments",
            &["pet_id"],
        )))
        .with(Transform::CreateIndex(IndexSpec::new(
            "ix_appointments_veterinarian_id",
            "appointments",
            &["veterinarian_id"],
        )))
}

fn medical_records() -> MigrationStep {
    let source = completed_appointments()
        .column((src(), Appointments::AppointmentId))
        .expr(Func::coalesce([
            Expr::col((src(), Appointments::Notes)).into(),
            Expr::val(PRELIMINARY_DIAGNOSIS).into(),
        ]))
        .expr(Expr::val(UNSPECIFIED_TREATMENT))
        .expr(Expr::cust("NULL"))
        .expr(Expr::val(false))
        .column((src(), Appointments::CreatedAt))
        .to_owned();

    MigrationStep::new(MEDICAL_RECORDS, Some(BASE_SCHEMA), "Medical records")
        .with(Transform::CreateTable(
            TableSpec::new("medical_records")
                .column(ColumnSpec::id("record_id"))
                .column(ColumnSpec::new("appointment_id", ColumnType::Integer).not_null().unique())
                .column(ColumnSpec::new("diagnosis", ColumnType::Text).not_null())
                .column(ColumnSpec::new("treatment", ColumnType::Text).not_null())
                .column(ColumnSpec::new("prescription", ColumnType::Text))
                .column(ColumnSpec::new("follow_up_required", ColumnType::Boolean))
                .column(
                    ColumnSpec::new("created_at", ColumnType::Timestamp)
                        .default(ColumnDefault::CurrentTimestamp),
                )
                .foreign_key(
                    ForeignKeySpec::new("appointment_id", "appointments", "appointment_id")
                        .on_delete(OnDelete::Cascade),
                ),
        ))
        .with(Transform::Backfill(Backfill::insert_missing(
            "medical records for completed appointments",
            "medical_records",
            "appointment_id",
            &[
                "appointment_id",
                "diagnosis",
                "treatment",
                "prescription",
                "follow_up_required",
                "created_at",
            ],
            source,
            Expr::col((src(), Appointments::AppointmentId)),
        )))
}

fn vaccinations() -> MigrationStep {
    MigrationStep::new(VACCINATIONS, Some(MEDICAL_RECORDS), "Vaccines and vaccination records")
        .with(Transform::CreateTable(
            TableSpec::new("vaccines")
                .column(ColumnSpec::id("vaccine_id"))
                .column(ColumnSpec::new("name", ColumnType::VarChar(200)).not_null().unique())
                .column(ColumnSpec::new("manufacturer", ColumnType::VarChar(200)))
                .column(ColumnSpec::new("species_applicable", ColumnType::VarChar(100))),
        ))
        .with(Transform::CreateTable(
            TableSpec::new("vaccination_records")
                .column(ColumnSpec::id("vaccination_id"))
                .column(ColumnSpec::new("pet_id", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("vaccine_id", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("veterinarian_id", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("vaccination_date", ColumnType::Date).not_null())
                .column(ColumnSpec::new("next_dose_date", ColumnType::Date))
                .column(ColumnSpec::new("batch_number", ColumnType::VarChar(50)))
                .foreign_key(
                    ForeignKeySpec::new("pet_id", "pets", "pet_id").on_delete(OnDelete::Cascade),
                )
                .foreign_key(ForeignKeySpec::new("vaccine_id", "vaccines", "vaccine_id"))
                .foreign_key(ForeignKeySpec::new(
                    "veterinarian_id",
                    "veterinarians",
                    "veterinarian_id",
                )),
        ))
}

fn profiles() -> MigrationStep {
    let methods = PaymentMethod::ALL.map(|m| m.as_str());

    MigrationStep::new(PROFILES, Some(VACCINATIONS), "Owner contact and pet profile")
        .with(Transform::CreateEnum(EnumSpec::new("payment_method_enum", &methods)))
        .with(Transform::AddColumns(
            ColumnGroup::new("owners", "owner_id")
                .column(ColumnSpec::new("emergency_contact", ColumnType::VarChar(50)))
                .column(ColumnSpec::new(
                    "preferred_payment_method",
                    ColumnType::Enum("payment_method_enum".into()),
                )),
        ))
        .with(Transform::AddColumns(
            ColumnGroup::new("pets", "pet_id")
                .column(ColumnSpec::new("microchip_number", ColumnType::VarChar(50)))
                .column(ColumnSpec::new("is_neutered", ColumnType::Boolean))
                .column(ColumnSpec::new("blood_type", ColumnType::VarChar(10))),
        ))
        .with(Transform::CreateIndex(
            IndexSpec::new("ix_pets_microchip_number", "pets", &["microchip_number"]).unique(),
        ))
        .with(Transform::Backfill(Backfill::fill_null(
            "pets default to not neutered",
            "pets",
            "is_neutered",
            Expr::val(false),
        )))
}

fn invoices() -> MigrationStep {
    let statuses = PaymentStatus::ALL.map(|s| s.as_str());
    let source = completed_appointments()
        .column((src(), Appointments::AppointmentId))
        .expr(Expr::cust(r#"'INV-HIST-' || "src"."appointment_id""#))
        .expr(Func::cust(Alias::new("date")).arg(Expr::col((src(), Appointments::AppointmentDate))))
        .expr(Expr::val(HISTORICAL_INVOICE_CENTS))
        .expr(Expr::val(0))
        .expr(Expr::val(HISTORICAL_INVOICE_CENTS))
        .expr(Expr::val(PaymentStatus::Paid.as_str()))
        .column((src(), Appointments::AppointmentDate))
        .to_owned();

    MigrationStep::new(INVOICES, Some(PROFILES), "Invoices")
        .with(Transform::CreateEnum(EnumSpec::new(
            "invoice_payment_status_enum",
            &statuses,
        )))
        .with(Transform::CreateTable(
            TableSpec::new("invoices")
                .column(ColumnSpec::id("invoice_id"))
                .column(ColumnSpec::new("appointment_id", ColumnType::Integer).unique())
                .column(ColumnSpec::new("invoice_number", ColumnType::VarChar(50)).not_null().unique())
                .column(ColumnSpec::new("issue_date", ColumnType::Date).not_null())
                .column(ColumnSpec::new("subtotal_cents", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("tax_cents", ColumnType::Integer).not_null())
                .column(ColumnSpec::new("total_cents", ColumnType::Integer).not_null())
                .column(
                    ColumnSpec::new(
                        "payment_status",
                        ColumnType::Enum("invoice_payment_status_enum".into()),
                    )
                    .not_null()
                    .default(ColumnDefault::Text(PaymentStatus::Pending.as_str().into())),
                )
                .column(ColumnSpec::new("payment_date", ColumnType::Timestamp))
                .foreign_key(
                    ForeignKeySpec::new("appointment_id", "appointments", "appointment_id")
                        .on_delete(OnDelete::SetNull),
                ),
        ))
        .with(Transform::Backfill(Backfill::insert_missing(
            "paid invoices for completed appointments",
            "invoices",
            "appointment_id",
            &[
                "appointment_id",
                "invoice_number",
                "issue_date",
                "subtotal_cents",
                "tax_cents",
                "total_cents",
                "payment_status",
                "payment_date",
            ],
            source,
            Expr::col((src(), Appointments::AppointmentId)),
        )))
}

fn metrics() -> MigrationStep {
    MigrationStep::new(METRICS, Some(INVOICES), "Visit and appointment metrics")
        .with(Transform::AddColumns(
            ColumnGroup::new("pets", "pet_id")
                .column(ColumnSpec::new("last_visit_date", ColumnType::Date))
                .column(
                    ColumnSpec::new("visit_count", ColumnType::Integer)
                        .not_null()
                        .default(ColumnDefault::Integer(0)),
                ),
        ))
        .with(Transform::AddColumns(
            ColumnGroup::new("veterinarians", "veterinarian_id")
                .column(ColumnSpec::new("consultation_fee_cents", ColumnType::Integer))
                .column(ColumnSpec::new("rating", ColumnType::Real))
                .column(
                    ColumnSpec::new("total_appointments", ColumnType::Integer)
                        .not_null()
                        .default(ColumnDefault::Integer(0)),
                ),
        ))
        .with(Transform::Backfill(Backfill::task(Arc::new(RecomputeMetrics))))
}
