//! Veterinarians, owners and pets.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::SqliteConnection;
use tracing::info;

use crate::storage;
use crate::storage::schema::{Appointments, Owners, Pets, Veterinarians};

use super::models::{
    NewOwner, NewPet, NewVeterinarian, Owner, OwnerContactUpdate, Pet, PetProfileUpdate,
    Veterinarian,
};
use super::revisions;
use super::{ClinicError, ClinicService, Result};

async fn count_appointments(
    conn: &mut SqliteConnection,
    column: Appointments,
    id: i64,
) -> Result<i64> {
    let (sql, values) = Query::select()
        .expr(Expr::col(Appointments::AppointmentId).count())
        .from(Appointments::Table)
        .and_where(Expr::col(column).eq(id))
        .build_sqlx(SqliteQueryBuilder);
    Ok(sqlx::query_scalar_with(&sql, values).fetch_one(&mut *conn).await?)
}

impl ClinicService {
    // ========================================================================
    // Veterinarians
    // ========================================================================

    pub async fn create_veterinarian(&self, new: NewVeterinarian) -> Result<Veterinarian> {
        let (sql, values) = Query::insert()
            .into_table(Veterinarians::Table)
            .columns([
                Veterinarians::LicenseNumber,
                Veterinarians::FirstName,
                Veterinarians::LastName,
                Veterinarians::Email,
                Veterinarians::Phone,
                Veterinarians::Specialization,
                Veterinarians::HireDate,
            ])
            .values_panic([
                new.license_number.into(),
                new.first_name.into(),
                new.last_name.into(),
                new.email.into(),
                new.phone.into(),
                new.specialization.into(),
                new.hire_date.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| ClinicError::from_write(e, "veterinarian license or email"))?
            .last_insert_rowid();

        info!(veterinarian = id, "Created veterinarian");
        self.get_veterinarian(id).await
    }

    pub async fn get_veterinarian(&self, veterinarian_id: i64) -> Result<Veterinarian> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Veterinarians::Table)
            .and_where(Expr::col(Veterinarians::VeterinarianId).eq(veterinarian_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("veterinarian", veterinarian_id))?;
        Veterinarian::from_row(&row)
    }

    pub async fn list_veterinarians(&self, offset: u64, limit: u64) -> Result<Vec<Veterinarian>> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Veterinarians::Table)
            .order_by(Veterinarians::VeterinarianId, Order::Asc)
            .limit(limit)
            .offset(offset)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Veterinarian::from_row).collect()
    }

    /// Set consultation fee and rating. Rating is 0 to 5.
    pub async fn update_veterinarian_fee(
        &self,
        veterinarian_id: i64,
        consultation_fee_cents: Option<i64>,
        rating: Option<f64>,
    ) -> Result<Veterinarian> {
        self.require(self.features.metrics, "veterinarian fees and ratings", revisions::METRICS)?;
        if consultation_fee_cents.is_some_and(|fee| fee < 0) {
            return Err(ClinicError::InvalidInput("consultation fee cannot be negative".into()));
        }
        if rating.is_some_and(|r| !(0.0..=5.0).contains(&r)) {
            return Err(ClinicError::InvalidInput("rating must be between 0 and 5".into()));
        }

        let mut update = Query::update();
        update
            .table(Veterinarians::Table)
            .and_where(Expr::col(Veterinarians::VeterinarianId).eq(veterinarian_id));
        if let Some(fee) = consultation_fee_cents {
            update.value(Veterinarians::ConsultationFeeCents, fee);
        }
        if let Some(rating) = rating {
            update.value(Veterinarians::Rating, rating);
        }
        if consultation_fee_cents.is_some() || rating.is_some() {
            let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
            sqlx::query_with(&sql, values).execute(&self.pool).await?;
        }
        self.get_veterinarian(veterinarian_id).await
    }

    /// Delete a veterinarian with no appointments.
    pub async fn delete_veterinarian(&self, veterinarian_id: i64) -> Result<Veterinarian> {
        let existing = self.get_veterinarian(veterinarian_id).await?;
        let mut tx = storage::begin_write(&self.pool).await?;

        let appointments =
            count_appointments(&mut tx, Appointments::VeterinarianId, veterinarian_id).await?;
        if appointments > 0 {
            return Err(ClinicError::Conflict(format!(
                "veterinarian {veterinarian_id} has {appointments} appointments"
            )));
        }

        let (sql, values) = Query::delete()
            .from_table(Veterinarians::Table)
            .and_where(Expr::col(Veterinarians::VeterinarianId).eq(veterinarian_id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await
            .map_err(|e| ClinicError::from_write(e, "veterinarian"))?;
        tx.commit().await?;
        Ok(existing)
    }

    // ========================================================================
    // Owners
    // ========================================================================

    pub async fn create_owner(&self, new: NewOwner) -> Result<Owner> {
        let (sql, values) = Query::insert()
            .into_table(Owners::Table)
            .columns([
                Owners::FirstName,
                Owners::LastName,
                Owners::Email,
                Owners::Phone,
                Owners::Address,
            ])
            .values_panic([
                new.first_name.into(),
                new.last_name.into(),
                new.email.into(),
                new.phone.into(),
                new.address.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| ClinicError::from_write(e, "owner email"))?
            .last_insert_rowid();
        self.get_owner(id).await
    }

    pub async fn get_owner(&self, owner_id: i64) -> Result<Owner> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Owners::Table)
            .and_where(Expr::col(Owners::OwnerId).eq(owner_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("owner", owner_id))?;
        Owner::from_row(&row)
    }

    pub async fn list_owners(&self, offset: u64, limit: u64) -> Result<Vec<Owner>> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Owners::Table)
            .order_by(Owners::OwnerId, Order::Asc)
            .limit(limit)
            .offset(offset)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Owner::from_row).collect()
    }

    /// Update phone and address, plus the profile fields once they exist.
    pub async fn update_owner_contact(&self, owner_id: i64, changes: OwnerContactUpdate) -> Result<Owner> {
        let profile_change =
            changes.emergency_contact.is_some() || changes.preferred_payment_method.is_some();
        if profile_change {
            self.require(self.features.profiles, "owner profile", revisions::PROFILES)?;
        }
        self.get_owner(owner_id).await?;

        let mut update = Query::update();
        update
            .table(Owners::Table)
            .and_where(Expr::col(Owners::OwnerId).eq(owner_id));
        let mut changed = false;
        if let Some(phone) = changes.phone {
            update.value(Owners::Phone, phone);
            changed = true;
        }
        if let Some(address) = changes.address {
            update.value(Owners::Address, address);
            changed = true;
        }
        if let Some(contact) = changes.emergency_contact {
            update.value(Owners::EmergencyContact, contact);
            changed = true;
        }
        if let Some(method) = changes.preferred_payment_method {
            update.value(Owners::PreferredPaymentMethod, method.as_str());
            changed = true;
        }
        if changed {
            let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
            sqlx::query_with(&sql, values).execute(&self.pool).await?;
        }
        self.get_owner(owner_id).await
    }

    /// Delete an owner with no pets.
    pub async fn delete_owner(&self, owner_id: i64) -> Result<Owner> {
        let existing = self.get_owner(owner_id).await?;
        let pets = self.owner_pets(owner_id).await?;
        if !pets.is_empty() {
            return Err(ClinicError::Conflict(format!(
                "owner {owner_id} still has {} pets",
                pets.len()
            )));
        }

        let (sql, values) = Query::delete()
            .from_table(Owners::Table)
            .and_where(Expr::col(Owners::OwnerId).eq(owner_id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await
            .map_err(|e| ClinicError::from_write(e, "owner"))?;
        Ok(existing)
    }

    // ========================================================================
    // Pets
    // ========================================================================

    pub async fn create_pet(&self, new: NewPet) -> Result<Pet> {
        self.get_owner(new.owner_id).await?;

        let mut insert = Query::insert();
        insert.into_table(Pets::Table);
        if self.features.profiles {
            insert
                .columns([
                    Pets::Name,
                    Pets::Species,
                    Pets::Breed,
                    Pets::BirthDate,
                    Pets::Weight,
                    Pets::OwnerId,
                    Pets::IsNeutered,
                ])
                .values_panic([
                    new.name.into(),
                    new.species.into(),
                    new.breed.into(),
                    new.birth_date.into(),
                    new.weight.into(),
                    new.owner_id.into(),
                    false.into(),
                ]);
        } else {
            insert
                .columns([
                    Pets::Name,
                    Pets::Species,
                    Pets::Breed,
                    Pets::BirthDate,
                    Pets::Weight,
                    Pets::OwnerId,
                ])
                .values_panic([
                    new.name.into(),
                    new.species.into(),
                    new.breed.into(),
                    new.birth_date.into(),
                    new.weight.into(),
                    new.owner_id.into(),
                ]);
        }

        let (sql, values) = insert.build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.get_pet(id).await
    }

    pub async fn get_pet(&self, pet_id: i64) -> Result<Pet> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Pets::Table)
            .and_where(Expr::col(Pets::PetId).eq(pet_id))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClinicError::not_found("pet", pet_id))?;
        Pet::from_row(&row)
    }

    pub async fn list_pets(&self, offset: u64, limit: u64) -> Result<Vec<Pet>> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Pets::Table)
            .order_by(Pets::PetId, Order::Asc)
            .limit(limit)
            .offset(offset)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Pet::from_row).collect()
    }

    pub async fn owner_pets(&self, owner_id: i64) -> Result<Vec<Pet>> {
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Pets::Table)
            .and_where(Expr::col(Pets::OwnerId).eq(owner_id))
            .order_by(Pets::PetId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Pet::from_row).collect()
    }

    /// Update microchip, neutered flag and blood type.
    pub async fn update_pet_profile(&self, pet_id: i64, changes: PetProfileUpdate) -> Result<Pet> {
        self.require(self.features.profiles, "pet profile", revisions::PROFILES)?;
        self.get_pet(pet_id).await?;

        let mut update = Query::update();
        update
            .table(Pets::Table)
            .and_where(Expr::col(Pets::PetId).eq(pet_id));
        let mut changed = false;
        if let Some(microchip) = changes.microchip_number {
            update.value(Pets::MicrochipNumber, microchip);
            changed = true;
        }
        if let Some(neutered) = changes.is_neutered {
            update.value(Pets::IsNeutered, neutered);
            changed = true;
        }
        if let Some(blood_type) = changes.blood_type {
            update.value(Pets::BloodType, blood_type);
            changed = true;
        }
        if changed {
            let (sql, values) = update.build_sqlx(SqliteQueryBuilder);
            sqlx::query_with(&sql, values)
                .execute(&self.pool)
                .await
                .map_err(|e| ClinicError::from_write(e, "microchip number"))?;
        }
        self.get_pet(pet_id).await
    }

    /// Delete a pet with no appointments. Vaccination records go with it.
    pub async fn delete_pet(&self, pet_id: i64) -> Result<Pet> {
        let existing = self.get_pet(pet_id).await?;
        let mut tx = storage::begin_write(&self.pool).await?;

        let appointments = count_appointments(&mut tx, Appointments::PetId, pet_id).await?;
        if appointments > 0 {
            return Err(ClinicError::Conflict(format!(
                "pet {pet_id} has {appointments} appointments"
            )));
        }

        let (sql, values) = Query::delete()
            .from_table(Pets::Table)
            .and_where(Expr::col(Pets::PetId).eq(pet_id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await
            .map_err(|e| ClinicError::from_write(e, "pet"))?;
        tx.commit().await?;
        Ok(existing)
    }
}
