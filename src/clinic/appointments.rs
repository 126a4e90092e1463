//! Appointment lifecycle.

use chrono::NaiveDate;
use sea_query::{Alias, Expr, Func, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::SqliteConnection;
use tracing::info;

use crate::storage;
use crate::storage::schema::{Appointments, Pets, Veterinarians};

use super::models::{Appointment, AppointmentStatus, AppointmentUpdate, NewAppointment};
use super::{ClinicError, ClinicService, Result};

pub(crate) async fn fetch_appointment(
    conn: &mut SqliteConnection,
    appointment_id: i64,
) -> Result<Option<Appointment>> {
    let (sql, values) = Query::select()
        .expr(Expr::asterisk())
        .from(Appointments::Table)
        .and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id))
        .build_sqlx(SqliteQueryBuilder);

    let row = sqlx::query_with(&sql, values)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Appointment::from_row).transpose()
}

async fn require_appointment(conn: &mut SqliteConnection, appointment_id: i64) -> Result<Appointment> {
    fetch_appointment(conn, appointment_id)
        .await?
        .ok_or_else(|| ClinicError::not_found("appointment", appointment_id))
}

pub(crate) async fn ensure_pet(conn: &mut SqliteConnection, pet_id: i64) -> Result<()> {
    let (sql, values) = Query::select()
        .expr(Expr::col(Pets::PetId).count())
        .from(Pets::Table)
        .and_where(Expr::col(Pets::PetId).eq(pet_id))
        .build_sqlx(SqliteQueryBuilder);
    let count: i64 = sqlx::query_scalar_with(&sql, values).fetch_one(&mut *conn).await?;
    if count == 0 {
        return Err(ClinicError::not_found("pet", pet_id));
    }
    Ok(())
}

pub(crate) async fn ensure_veterinarian(conn: &mut SqliteConnection, veterinarian_id: i64) -> Result<()> {
    let (sql, values) = Query::select()
        .expr(Expr::col(Veterinarians::VeterinarianId).count())
        .from(Veterinarians::Table)
        .and_where(Expr::col(Veterinarians::VeterinarianId).eq(veterinarian_id))
        .build_sqlx(SqliteQueryBuilder);
    let count: i64 = sqlx::query_scalar_with(&sql, values).fetch_one(&mut *conn).await?;
    if count == 0 {
        return Err(ClinicError::not_found("veterinarian", veterinarian_id));
    }
    Ok(())
}

impl ClinicService {
    /// Book an appointment.
    ///
    /// A terminal status is accepted so historical visits can be imported;
    /// its metric contribution is applied immediately.
    pub async fn schedule_appointment(&self, new: NewAppointment) -> Result<Appointment> {
        let mut tx = storage::begin_write(&self.pool).await?;
        ensure_pet(&mut tx, new.pet_id).await?;
        ensure_veterinarian(&mut tx, new.veterinarian_id).await?;

        let (sql, values) = Query::insert()
            .into_table(Appointments::Table)
            .columns([
                Appointments::PetId,
                Appointments::VeterinarianId,
                Appointments::AppointmentDate,
                Appointments::Reason,
                Appointments::Status,
                Appointments::Notes,
            ])
            .values_panic([
                new.pet_id.into(),
                new.veterinarian_id.into(),
                new.appointment_date.into(),
                new.reason.into(),
                new.status.as_str().into(),
                new.notes.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let created = require_appointment(&mut tx, id).await?;
        self.commit_with_metrics(tx, None, Some(&created)).await?;

        info!(appointment = id, pet = created.pet_id, status = %created.status, "Scheduled appointment");
        Ok(created)
    }

    pub async fn complete_appointment(&self, appointment_id: i64, notes: Option<String>) -> Result<Appointment> {
        self.finish(appointment_id, AppointmentStatus::Completed, notes).await
    }

    /// Cancel, keeping the appointment as history.
    pub async fn cancel_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        self.finish(appointment_id, AppointmentStatus::Cancelled, None).await
    }

    pub async fn mark_no_show(&self, appointment_id: i64) -> Result<Appointment> {
        self.finish(appointment_id, AppointmentStatus::NoShow, None).await
    }

    async fn finish(
        &self,
        appointment_id: i64,
        next: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment> {
        let mut tx = storage::begin_write(&self.pool).await?;
        let old = require_appointment(&mut tx, appointment_id).await?;
        let status = old.status.transition_to(next)?;

        let mut update = Query::update();
        update
            .table(Appointments::Table)
            .value(Appointments::Status, status.as_str())
            .and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id));
        if let Some(notes) = notes {
            update.value(Appointments::Notes, notes);
        }
        let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *tx).await?;

        let new = require_appointment(&mut tx, appointment_id).await?;
        self.commit_with_metrics(tx, Some(&old), Some(&new)).await?;

        info!(appointment = appointment_id, from = %old.status, to = %new.status, "Appointment status changed");
        Ok(new)
    }

    /// Edit pet, veterinarian, date, reason or notes. Status is not editable here.
    pub async fn update_appointment(
        &self,
        appointment_id: i64,
        changes: AppointmentUpdate,
    ) -> Result<Appointment> {
        let mut tx = storage::begin_write(&self.pool).await?;
        let old = require_appointment(&mut tx, appointment_id).await?;

        let mut update = Query::update();
        update
            .table(Appointments::Table)
            .and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id));
        let mut changed = false;

        if let Some(pet_id) = changes.pet_id {
            ensure_pet(&mut tx, pet_id).await?;
            update.value(Appointments::PetId, pet_id);
            changed = true;
        }
        if let Some(veterinarian_id) = changes.veterinarian_id {
            ensure_veterinarian(&mut tx, veterinarian_id).await?;
            update.value(Appointments::VeterinarianId, veterinarian_id);
            changed = true;
        }
        if let Some(date) = changes.appointment_date {
            update.value(Appointments::AppointmentDate, date);
            changed = true;
        }
        if let Some(reason) = changes.reason {
            update.value(Appointments::Reason, reason);
            changed = true;
        }
        if let Some(notes) = changes.notes {
            update.value(Appointments::Notes, notes);
            changed = true;
        }
        if !changed {
            return Ok(old);
        }

        let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *tx).await?;

        let new = require_appointment(&mut tx, appointment_id).await?;
        self.commit_with_metrics(tx, Some(&old), Some(&new)).await?;
        Ok(new)
    }

    /// Delete an appointment in any state, withdrawing its metric contribution.
    pub async fn delete_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        let mut tx = storage::begin_write(&self.pool).await?;
        let old = require_appointment(&mut tx, appointment_id).await?;

        let (sql, values) = Query::delete()
            .from_table(Appointments::Table)
            .and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *tx).await?;

        self.commit_with_metrics(tx, Some(&old), None).await?;

        info!(appointment = appointment_id, status = %old.status, "Deleted appointment");
        Ok(old)
    }

    pub async fn get_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        let mut conn = self.pool.acquire().await?;
        require_appointment(&mut conn, appointment_id).await
    }

    /// Appointments, oldest first, paged.
    pub async fn list_appointments(&self, offset: u64, limit: u64) -> Result<Vec<Appointment>> {
        let mut query = Query::select();
        query
            .expr(Expr::asterisk())
            .from(Appointments::Table)
            .order_by(Appointments::AppointmentId, Order::Asc)
            .limit(limit)
            .offset(offset);
        self.fetch_appointments(query).await
    }

    /// Appointments in one status, by date.
    pub async fn appointments_by_status(&self, status: AppointmentStatus) -> Result<Vec<Appointment>> {
        let mut query = Query::select();
        query
            .expr(Expr::asterisk())
            .from(Appointments::Table)
            .and_where(Expr::col(Appointments::Status).eq(status.as_str()))
            .order_by(Appointments::AppointmentDate, Order::Asc);
        self.fetch_appointments(query).await
    }

    /// Appointments on one calendar day.
    pub async fn appointments_on(&self, day: NaiveDate) -> Result<Vec<Appointment>> {
        let mut query = Query::select();
        query
            .expr(Expr::asterisk())
            .from(Appointments::Table)
            .and_where(Expr::expr(on_day()).eq(day))
            .order_by(Appointments::AppointmentDate, Order::Asc);
        self.fetch_appointments(query).await
    }

    /// A veterinarian's appointments on one day, in time order.
    pub async fn veterinarian_schedule(
        &self,
        veterinarian_id: i64,
        day: NaiveDate,
    ) -> Result<Vec<Appointment>> {
        {
            let mut conn = self.pool.acquire().await?;
            ensure_veterinarian(&mut conn, veterinarian_id).await?;
        }
        let mut query = Query::select();
        query
            .expr(Expr::asterisk())
            .from(Appointments::Table)
            .and_where(Expr::col(Appointments::VeterinarianId).eq(veterinarian_id))
            .and_where(Expr::expr(on_day()).eq(day))
            .order_by(Appointments::AppointmentDate, Order::Asc);
        self.fetch_appointments(query).await
    }

    /// Every appointment of every pet of an owner.
    pub async fn owner_appointments(&self, owner_id: i64) -> Result<Vec<Appointment>> {
        self.get_owner(owner_id).await?;
        let mut query = Query::select();
        query
            .expr(Expr::asterisk())
            .from(Appointments::Table)
            .and_where(
                Expr::col(Appointments::PetId).in_subquery(
                    Query::select()
                        .column(Pets::PetId)
                        .from(Pets::Table)
                        .and_where(Expr::col(Pets::OwnerId).eq(owner_id))
                        .to_owned(),
                ),
            )
            .order_by(Appointments::AppointmentDate, Order::Asc);
        self.fetch_appointments(query).await
    }

    async fn fetch_appointments(&self, query: sea_query::SelectStatement) -> Result<Vec<Appointment>> {
        let (sql, values) = query.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Appointment::from_row).collect()
    }
}

fn on_day() -> sea_query::FunctionCall {
    Func::cust(Alias::new("date")).arg(Expr::col(Appointments::AppointmentDate))
}
