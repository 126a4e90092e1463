//! Medical records and vaccinations.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use tracing::info;

use crate::storage;
use crate::storage::schema::{Appointments, MedicalRecords, VaccinationRecords, Vaccines};

use super::appointments::{ensure_pet, ensure_veterinarian, fetch_appointment};
use super::models::{
    AppointmentStatus, MedicalRecord, MedicalRecordUpdate, NewMedicalRecord, NewVaccinationRecord,
    NewVaccine, VaccinationRecord, Vaccine,
};
use super::revisions;
use super::{ClinicError, ClinicService, Result};

impl ClinicService {
    // ========================================================================
    // Medical records
    // ========================================================================

    /// Record the outcome of a completed appointment. One record per appointment.
    pub async fn create_medical_record(&self, new: NewMedicalRecord) -> Result<MedicalRecord> {
        self.require(self.features.medical_records, "medical records", revisions::MEDICAL_RECORDS)?;

        let mut tx = storage::begin_write(&self.pool).await?;
        let appointment = fetch_appointment(&mut tx, new.appointment_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("appointment", new.appointment_id))?;
        if appointment.status != AppointmentStatus::Completed {
            return Err(ClinicError::InvalidInput(format!(
                "appointment {} is {}, not completed",
                appointment.appointment_id, appointment.status
            )));
        }

        let (sql, values) = Query::insert()
            .into_table(MedicalRecords::Table)
            .columns([
                MedicalRecords::AppointmentId,
                MedicalRecords::Diagnosis,
                MedicalRecords::Treatment,
                MedicalRecords::Prescription,
                MedicalRecords::FollowUpRequired,
            ])
            .values_panic([
                new.appointment_id.into(),
                new.diagnosis.into(),
                new.treatment.into(),
                new.prescription.into(),
                new.follow_up_required.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                ClinicError::from_write(
                    e,
                    &format!("medical record for appointment {}", new.appointment_id),
                )
            })?
            .last_insert_rowid();
        tx.commit().await?;

        info!(record = id, appointment = new.appointment_id, "Created medical record");
        self.get_medical_record(id).await
    }

    pub async fn get_medical_record(&self, record_id: i64) -> Result<MedicalRecord> {
        self.require(self.features.medical_records, "medical records", revisions::MEDICAL_RECORDS)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(MedicalRecords::Table)
            .and_where(Expr::col(MedicalRecords::RecordId).eq(record_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("medical record", record_id))?;
        MedicalRecord::from_row(&row)
    }

    pub async fn update_medical_record(
        &self,
        record_id: i64,
        changes: MedicalRecordUpdate,
    ) -> Result<MedicalRecord> {
        self.get_medical_record(record_id).await?;

        let mut update = Query::update();
        update
            .table(MedicalRecords::Table)
            .and_where(Expr::col(MedicalRecords::RecordId).eq(record_id));
        let mut changed = false;
        if let Some(diagnosis) = changes.diagnosis {
            update.value(MedicalRecords::Diagnosis, diagnosis);
            changed = true;
        }
        if let Some(treatment) = changes.treatment {
            update.value(MedicalRecords::Treatment, treatment);
            changed = true;
        }
        if let Some(prescription) = changes.prescription {
            update.value(MedicalRecords::Prescription, prescription);
            changed = true;
        }
        if let Some(follow_up) = changes.follow_up_required {
            update.value(MedicalRecords::FollowUpRequired, follow_up);
            changed = true;
        }
        if changed {
            let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
            sqlx::query_with(&sql, values).execute(&self.pool).await?;
        }
        self.get_medical_record(record_id).await
    }

    /// A pet's medical records, most recent appointment first.
    pub async fn pet_medical_history(&self, pet_id: i64) -> Result<Vec<MedicalRecord>> {
        self.require(self.features.medical_records, "medical records", revisions::MEDICAL_RECORDS)?;
        self.get_pet(pet_id).await?;

        let (sql, values) = Query::select()
            .column((MedicalRecords::Table, MedicalRecords::RecordId))
            .column((MedicalRecords::Table, MedicalRecords::AppointmentId))
            .column((MedicalRecords::Table, MedicalRecords::Diagnosis))
            .column((MedicalRecords::Table, MedicalRecords::Treatment))
            .column((MedicalRecords::Table, MedicalRecords::Prescription))
            .column((MedicalRecords::Table, MedicalRecords::FollowUpRequired))
            .column((MedicalRecords::Table, MedicalRecords::CreatedAt))
            .from(MedicalRecords::Table)
            .inner_join(
                Appointments::Table,
                Expr::col((Appointments::Table, Appointments::AppointmentId))
                    .equals((MedicalRecords::Table, MedicalRecords::AppointmentId)),
            )
            .and_where(Expr::col((Appointments::Table, Appointments::PetId)).eq(pet_id))
            .order_by((Appointments::Table, Appointments::AppointmentDate), Order::Desc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(MedicalRecord::from_row).collect()
    }

    // ========================================================================
    // Vaccines
    // ========================================================================

    pub async fn create_vaccine(&self, new: NewVaccine) -> Result<Vaccine> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        let what = format!("vaccine {}", new.name);

        let (sql, values) = Query::insert()
            .into_table(Vaccines::Table)
            .columns([
                Vaccines::Name,
                Vaccines::Manufacturer,
                Vaccines::SpeciesApplicable,
            ])
            .values_panic([
                new.name.into(),
                new.manufacturer.into(),
                new.species_applicable.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| ClinicError::from_write(e, &what))?
            .last_insert_rowid();
        self.get_vaccine(id).await
    }

    pub async fn get_vaccine(&self, vaccine_id: i64) -> Result<Vaccine> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Vaccines::Table)
            .and_where(Expr::col(Vaccines::VaccineId).eq(vaccine_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("vaccine", vaccine_id))?;
        Vaccine::from_row(&row)
    }

    pub async fn list_vaccines(&self) -> Result<Vec<Vaccine>> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Vaccines::Table)
            .order_by(Vaccines::Name, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Vaccine::from_row).collect()
    }

    // ========================================================================
    // Vaccination records
    // ========================================================================

    pub async fn record_vaccination(&self, new: NewVaccinationRecord) -> Result<VaccinationRecord> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        if new.next_dose_date.is_some_and(|next| next <= new.vaccination_date) {
            return Err(ClinicError::InvalidInput(
                "next dose must fall after the vaccination date".into(),
            ));
        }
        self.get_vaccine(new.vaccine_id).await?;

        let mut tx = storage::begin_write(&self.pool).await?;
        ensure_pet(&mut tx, new.pet_id).await?;
        ensure_veterinarian(&mut tx, new.veterinarian_id).await?;

        let (sql, values) = Query::insert()
            .into_table(VaccinationRecords::Table)
            .columns([
                VaccinationRecords::PetId,
                VaccinationRecords::VaccineId,
                VaccinationRecords::VeterinarianId,
                VaccinationRecords::VaccinationDate,
                VaccinationRecords::NextDoseDate,
                VaccinationRecords::BatchNumber,
            ])
            .values_panic([
                new.pet_id.into(),
                new.vaccine_id.into(),
                new.veterinarian_id.into(),
                new.vaccination_date.into(),
                new.next_dose_date.into(),
                new.batch_number.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        tx.commit().await?;

        info!(vaccination = id, pet = new.pet_id, vaccine = new.vaccine_id, "Recorded vaccination");
        self.get_vaccination(id).await
    }

    pub async fn get_vaccination(&self, vaccination_id: i64) -> Result<VaccinationRecord> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(VaccinationRecords::Table)
            .and_where(Expr::col(VaccinationRecords::VaccinationId).eq(vaccination_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("vaccination", vaccination_id))?;
        VaccinationRecord::from_row(&row)
    }

    /// A pet's vaccinations, most recent first.
    pub async fn pet_vaccinations(&self, pet_id: i64) -> Result<Vec<VaccinationRecord>> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        self.get_pet(pet_id).await?;

        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(VaccinationRecords::Table)
            .and_where(Expr::col(VaccinationRecords::PetId).eq(pet_id))
            .order_by(VaccinationRecords::VaccinationDate, Order::Desc)
            .order_by(VaccinationRecords::VaccinationId, Order::Desc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(VaccinationRecord::from_row).collect()
    }

    /// A pet's upcoming doses, soonest first.
    pub async fn pet_vaccination_schedule(&self, pet_id: i64) -> Result<Vec<VaccinationRecord>> {
        self.require(self.features.vaccinations, "vaccinations", revisions::VACCINATIONS)?;
        self.get_pet(pet_id).await?;

        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(VaccinationRecords::Table)
            .and_where(Expr::col(VaccinationRecords::PetId).eq(pet_id))
            .and_where(Expr::col(VaccinationRecords::NextDoseDate).is_not_null())
            .order_by(VaccinationRecords::NextDoseDate, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(VaccinationRecord::from_row).collect()
    }
}
