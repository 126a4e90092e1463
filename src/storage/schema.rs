//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Clinic tables are created by migration steps (see `clinic::revisions`);
//! the bookkeeping tables below are created by `storage::bootstrap`.

use sea_query::Iden;

/// Ledger table name (single row, id = 1).
pub const LEDGER_TABLE: &str = "_schema_ledger";
/// Ledger history table name.
pub const LEDGER_HISTORY_TABLE: &str = "_schema_ledger_history";
/// Enum type catalog table name.
pub const ENUM_TYPES_TABLE: &str = "_enum_types";
/// Enum column usage table name.
pub const ENUM_USAGES_TABLE: &str = "_enum_usages";
/// Metric quarantine table name.
pub const QUARANTINE_TABLE: &str = "_metric_quarantine";

/// Current-step pointer. Created once, updated on every apply/revert, never deleted.
pub const CREATE_LEDGER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _schema_ledger (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version TEXT,
    updated_at TEXT NOT NULL
)
"#;

pub const SEED_LEDGER_ROW: &str = r#"
INSERT OR IGNORE INTO _schema_ledger (id, version, updated_at)
VALUES (1, NULL, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
"#;

pub const CREATE_LEDGER_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _schema_ledger_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    step_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    from_version TEXT,
    to_version TEXT,
    recorded_at TEXT NOT NULL
)
"#;

pub const CREATE_ENUM_TYPES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _enum_types (
    name TEXT PRIMARY KEY NOT NULL,
    labels TEXT NOT NULL
)
"#;

pub const CREATE_ENUM_USAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _enum_usages (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    enum_name TEXT NOT NULL,
    PRIMARY KEY (table_name, column_name)
)
"#;

pub const CREATE_QUARANTINE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _metric_quarantine (
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    detail TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    PRIMARY KEY (entity_kind, entity_id)
)
"#;

/// All bootstrap statements, in execution order.
pub fn bootstrap_statements() -> Vec<&'static str> {
    vec![
        CREATE_LEDGER_TABLE,
        SEED_LEDGER_ROW,
        CREATE_LEDGER_HISTORY_TABLE,
        CREATE_ENUM_TYPES_TABLE,
        CREATE_ENUM_USAGES_TABLE,
        CREATE_QUARANTINE_TABLE,
    ]
}

/// Ledger pointer.
#[derive(Iden)]
#[iden = "_schema_ledger"]
pub enum SchemaLedger {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "version"]
    Version,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Ledger history.
#[derive(Iden)]
#[iden = "_schema_ledger_history"]
pub enum LedgerHistory {
    Table,
    #[iden = "seq"]
    Seq,
    #[iden = "step_id"]
    StepId,
    #[iden = "direction"]
    Direction,
    #[iden = "from_version"]
    FromVersion,
    #[iden = "to_version"]
    ToVersion,
    #[iden = "recorded_at"]
    RecordedAt,
}

/// Enum type catalog.
#[derive(Iden)]
#[iden = "_enum_types"]
pub enum EnumTypes {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "labels"]
    Labels,
}

/// Enum column usages.
#[derive(Iden)]
#[iden = "_enum_usages"]
pub enum EnumUsages {
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "column_name"]
    ColumnName,
    #[iden = "enum_name"]
    EnumName,
}

/// Quarantined metric entities.
#[derive(Iden)]
#[iden = "_metric_quarantine"]
pub enum MetricQuarantine {
    Table,
    #[iden = "entity_kind"]
    EntityKind,
    #[iden = "entity_id"]
    EntityId,
    #[iden = "detail"]
    Detail,
    #[iden = "detected_at"]
    DetectedAt,
}

/// Veterinarians table schema.
#[derive(Iden)]
pub enum Veterinarians {
    Table,
    #[iden = "veterinarian_id"]
    VeterinarianId,
    #[iden = "license_number"]
    LicenseNumber,
    #[iden = "first_name"]
    FirstName,
    #[iden = "last_name"]
    LastName,
    #[iden = "email"]
    Email,
    #[iden = "phone"]
    Phone,
    #[iden = "specialization"]
    Specialization,
    #[iden = "hire_date"]
    HireDate,
    #[iden = "consultation_fee_cents"]
    ConsultationFeeCents,
    #[iden = "rating"]
    Rating,
    #[iden = "total_appointments"]
    TotalAppointments,
}

/// Owners table schema.
#[derive(Iden)]
pub enum Owners {
    Table,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "first_name"]
    FirstName,
    #[iden = "last_name"]
    LastName,
    #[iden = "email"]
    Email,
    #[iden = "phone"]
    Phone,
    #[iden = "address"]
    Address,
    #[iden = "emergency_contact"]
    EmergencyContact,
    #[iden = "preferred_payment_method"]
    PreferredPaymentMethod,
}

/// Pets table schema.
#[derive(Iden)]
pub enum Pets {
    Table,
    #[iden = "pet_id"]
    PetId,
    #[iden = "name"]
    Name,
    #[iden = "species"]
    Species,
    #[iden = "breed"]
    Breed,
    #[iden = "birth_date"]
    BirthDate,
    #[iden = "weight"]
    Weight,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "microchip_number"]
    MicrochipNumber,
    #[iden = "is_neutered"]
    IsNeutered,
    #[iden = "blood_type"]
    BloodType,
    #[iden = "last_visit_date"]
    LastVisitDate,
    #[iden = "visit_count"]
    VisitCount,
}

/// Appointments table schema.
#[derive(Iden)]
pub enum Appointments {
    Table,
    #[iden = "appointment_id"]
    AppointmentId,
    #[iden = "pet_id"]
    PetId,
    #[iden = "veterinarian_id"]
    VeterinarianId,
    #[iden = "appointment_date"]
    AppointmentDate,
    #[iden = "reason"]
    Reason,
    #[iden = "status"]
    Status,
    #[iden = "notes"]
    Notes,
    #[iden = "created_at"]
    CreatedAt,
}

/// Medical records table schema.
#[derive(Iden)]
pub enum MedicalRecords {
    Table,
    #[iden = "record_id"]
    RecordId,
    #[iden = "appointment_id"]
    AppointmentId,
    #[iden = "diagnosis"]
    Diagnosis,
    #[iden = "treatment"]
    Treatment,
    #[iden = "prescription"]
    Prescription,
    #[iden = "follow_up_required"]
    FollowUpRequired,
    #[iden = "created_at"]
    CreatedAt,
}

/// Vaccines table schema.
#[derive(Iden)]
pub enum Vaccines {
    Table,
    #[iden = "vaccine_id"]
    VaccineId,
    #[iden = "name"]
    Name,
    #[iden = "manufacturer"]
    Manufacturer,
    #[iden = "species_applicable"]
    SpeciesApplicable,
}

/// Vaccination records table schema.
#[derive(Iden)]
pub enum VaccinationRecords {
    Table,
    #[iden = "vaccination_id"]
    VaccinationId,
    #[iden = "pet_id"]
    PetId,
    #[iden = "vaccine_id"]
    VaccineId,
    #[iden = "veterinarian_id"]
    VeterinarianId,
    #[iden = "vaccination_date"]
    VaccinationDate,
    #[iden = "next_dose_date"]
    NextDoseDate,
    #[iden = "batch_number"]
    BatchNumber,
}

/// Invoices table schema.
#[derive(Iden)]
pub enum Invoices {
    Table,
    #[iden = "invoice_id"]
    InvoiceId,
    #[iden = "appointment_id"]
    AppointmentId,
    #[iden = "invoice_number"]
    InvoiceNumber,
    #[iden = "issue_date"]
    IssueDate,
    #[iden = "subtotal_cents"]
    SubtotalCents,
    #[iden = "tax_cents"]
    TaxCents,
    #[iden = "total_cents"]
    TotalCents,
    #[iden = "payment_status"]
    PaymentStatus,
    #[iden = "payment_date"]
    PaymentDate,
}
