//! Clinic records and their lifecycle enums.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::metrics::AppointmentFacts;

use super::{ClinicError, Result};

/// Lifecycle of an appointment. `Scheduled` is initial, the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }

    /// Only a scheduled appointment may move, and only into a terminal state.
    pub fn transition_to(self, next: AppointmentStatus) -> Result<AppointmentStatus> {
        if self.is_terminal() || !next.is_terminal() {
            return Err(ClinicError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        Ok(next)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ClinicError::InvalidInput(format!("unknown appointment status {s}")))
    }
}

/// Invoice payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Partial,
        PaymentStatus::Paid,
        PaymentStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ClinicError::InvalidInput(format!("unknown payment status {s}")))
    }
}

/// Owner's preferred payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Credit,
    Debit,
    Insurance,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Cash,
        PaymentMethod::Credit,
        PaymentMethod::Debit,
        PaymentMethod::Insurance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Insurance => "insurance",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| ClinicError::InvalidInput(format!("unknown payment method {s}")))
    }
}

/// Reads a column a later step adds; absent columns read as None.
fn optional<'r, T>(row: &'r SqliteRow, column: &str) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<Option<T>, _>(column).ok().flatten()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Veterinarian {
    pub veterinarian_id: i64,
    pub license_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub hire_date: Option<NaiveDate>,
    pub consultation_fee_cents: Option<i64>,
    pub rating: Option<f64>,
    pub total_appointments: Option<i64>,
}

impl Veterinarian {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            veterinarian_id: row.try_get("veterinarian_id")?,
            license_number: row.try_get("license_number")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            specialization: row.try_get("specialization")?,
            hire_date: row.try_get("hire_date")?,
            consultation_fee_cents: optional(row, "consultation_fee_cents"),
            rating: optional(row, "rating"),
            total_appointments: optional(row, "total_appointments"),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewVeterinarian {
    pub license_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub hire_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Owner {
    pub owner_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub preferred_payment_method: Option<PaymentMethod>,
}

impl Owner {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let method: Option<String> = optional(row, "preferred_payment_method");
        Ok(Self {
            owner_id: row.try_get("owner_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            address: row.try_get("address")?,
            emergency_contact: optional(row, "emergency_contact"),
            preferred_payment_method: method.as_deref().map(str::parse).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewOwner {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Contact fields introduced with the owner profile.
#[derive(Debug, Clone, Default)]
pub struct OwnerContactUpdate {
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub preferred_payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pet {
    pub pet_id: i64,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub weight: Option<f64>,
    pub owner_id: i64,
    pub microchip_number: Option<String>,
    pub is_neutered: Option<bool>,
    pub blood_type: Option<String>,
    pub last_visit_date: Option<NaiveDate>,
    pub visit_count: Option<i64>,
}

impl Pet {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            pet_id: row.try_get("pet_id")?,
            name: row.try_get("name")?,
            species: row.try_get("species")?,
            breed: row.try_get("breed")?,
            birth_date: row.try_get("birth_date")?,
            weight: row.try_get("weight")?,
            owner_id: row.try_get("owner_id")?,
            microchip_number: optional(row, "microchip_number"),
            is_neutered: optional(row, "is_neutered"),
            blood_type: optional(row, "blood_type"),
            last_visit_date: optional(row, "last_visit_date"),
            visit_count: optional(row, "visit_count"),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPet {
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub weight: Option<f64>,
    pub owner_id: i64,
}

/// Profile fields introduced with the pet profile step.
#[derive(Debug, Clone, Default)]
pub struct PetProfileUpdate {
    pub microchip_number: Option<String>,
    pub is_neutered: Option<bool>,
    pub blood_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub appointment_id: i64,
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub appointment_date: NaiveDateTime,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl Appointment {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            appointment_id: row.try_get("appointment_id")?,
            pet_id: row.try_get("pet_id")?,
            veterinarian_id: row.try_get("veterinarian_id")?,
            appointment_date: row.try_get("appointment_date")?,
            reason: row.try_get("reason")?,
            status: status.parse()?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// What the derived metrics see of this appointment.
    pub fn facts(&self) -> AppointmentFacts {
        AppointmentFacts {
            pet_id: self.pet_id,
            veterinarian_id: self.veterinarian_id,
            completed: self.status == AppointmentStatus::Completed,
            visit_date: self.appointment_date.date(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub appointment_date: NaiveDateTime,
    pub reason: Option<String>,
    /// Terminal statuses are accepted for historical imports.
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn scheduled(pet_id: i64, veterinarian_id: i64, appointment_date: NaiveDateTime) -> Self {
        Self {
            pet_id,
            veterinarian_id,
            appointment_date,
            reason: None,
            status: AppointmentStatus::Scheduled,
            notes: None,
        }
    }
}

/// Editable appointment fields; None leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AppointmentUpdate {
    pub pet_id: Option<i64>,
    pub veterinarian_id: Option<i64>,
    pub appointment_date: Option<NaiveDateTime>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedicalRecord {
    pub record_id: i64,
    pub appointment_id: i64,
    pub diagnosis: String,
    pub treatment: String,
    pub prescription: Option<String>,
    pub follow_up_required: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

impl MedicalRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            record_id: row.try_get("record_id")?,
            appointment_id: row.try_get("appointment_id")?,
            diagnosis: row.try_get("diagnosis")?,
            treatment: row.try_get("treatment")?,
            prescription: row.try_get("prescription")?,
            follow_up_required: row.try_get("follow_up_required")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewMedicalRecord {
    pub appointment_id: i64,
    pub diagnosis: String,
    pub treatment: String,
    pub prescription: Option<String>,
    pub follow_up_required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MedicalRecordUpdate {
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub follow_up_required: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vaccine {
    pub vaccine_id: i64,
    pub name: String,
    pub manufacturer: Option<String>,
    pub species_applicable: Option<String>,
}

impl Vaccine {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            vaccine_id: row.try_get("vaccine_id")?,
            name: row.try_get("name")?,
            manufacturer: row.try_get("manufacturer")?,
            species_applicable: row.try_get("species_applicable")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewVaccine {
    pub name: String,
    pub manufacturer: Option<String>,
    pub species_applicable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaccinationRecord {
    pub vaccination_id: i64,
    pub pet_id: i64,
    pub vaccine_id: i64,
    pub veterinarian_id: i64,
    pub vaccination_date: NaiveDate,
    pub next_dose_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
}

impl VaccinationRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            vaccination_id: row.try_get("vaccination_id")?,
            pet_id: row.try_get("pet_id")?,
            vaccine_id: row.try_get("vaccine_id")?,
            veterinarian_id: row.try_get("veterinarian_id")?,
            vaccination_date: row.try_get("vaccination_date")?,
            next_dose_date: row.try_get("next_dose_date")?,
            batch_number: row.try_get("batch_number")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewVaccinationRecord {
    pub pet_id: i64,
    pub vaccine_id: i64,
    pub veterinarian_id: i64,
    pub vaccination_date: NaiveDate,
    pub next_dose_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub invoice_id: i64,
    pub appointment_id: Option<i64>,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<NaiveDateTime>,
}

impl Invoice {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("payment_status")?;
        Ok(Self {
            invoice_id: row.try_get("invoice_id")?,
            appointment_id: row.try_get("appointment_id")?,
            invoice_number: row.try_get("invoice_number")?,
            issue_date: row.try_get("issue_date")?,
            subtotal_cents: row.try_get("subtotal_cents")?,
            tax_cents: row.try_get("tax_cents")?,
            total_cents: row.try_get("total_cents")?,
            payment_status: status.parse()?,
            payment_date: row.try_get("payment_date")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevenueReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_revenue_cents: i64,
    pub paid_invoices: i64,
}
