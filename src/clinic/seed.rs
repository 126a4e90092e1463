//! Deterministic sample data, generated through the lifecycle operations so
//! derived metrics are maintained exactly as in production.

use chrono::{Days, NaiveDate, NaiveTime, Utc};
use rand::prelude::*;
use serde::Serialize;
use tracing::info;

use super::models::{
    AppointmentStatus, NewAppointment, NewMedicalRecord, NewOwner, NewPet, NewVaccinationRecord,
    NewVaccine, NewVeterinarian,
};
use super::{ClinicService, Result};

const FIRST_NAMES: [&str; 12] = [
    "Avery", "Blake", "Casey", "Drew", "Emerson", "Finley", "Harper", "Jordan", "Kendall",
    "Morgan", "Quinn", "Rowan",
];
const LAST_NAMES: [&str; 10] = [
    "Alvarez", "Brooks", "Chen", "Dubois", "Eriksen", "Fischer", "Garcia", "Haddad", "Ito",
    "Kowalski",
];
const SPECIALIZATIONS: [&str; 5] = [
    "General Practice",
    "Surgery",
    "Dermatology",
    "Cardiology",
    "Dentistry",
];
const SPECIES: [(&str, &[&str]); 4] = [
    ("Dog", &["Labrador", "Beagle", "Poodle", "Mixed"]),
    ("Cat", &["Siamese", "Maine Coon", "Domestic Shorthair"]),
    ("Rabbit", &["Lop", "Rex"]),
    ("Bird", &["Parakeet", "Cockatiel"]),
];
const PET_NAMES: [&str; 10] = [
    "Biscuit", "Clover", "Ginger", "Juniper", "Maple", "Nova", "Olive", "Pepper", "Scout", "Willow",
];
const REASONS: [&str; 5] = [
    "Annual checkup",
    "Vaccination",
    "Limping",
    "Skin irritation",
    "Dental cleaning",
];
const VACCINES: [(&str, &str); 3] = [
    ("Rabies", "Dog"),
    ("DHPP", "Dog"),
    ("FVRCP", "Cat"),
];

/// How much sample data to create.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub seed: u64,
    pub veterinarians: usize,
    pub owners: usize,
    pub pets: usize,
    pub appointments: usize,
    /// Appointments fall within the year before this date.
    pub anchor: NaiveDate,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            seed: 42,
            veterinarians: 10,
            owners: 20,
            pets: 30,
            appointments: 50,
            anchor: Utc::now().date_naive(),
        }
    }
}

/// What a seeding run created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub veterinarians: usize,
    pub owners: usize,
    pub pets: usize,
    pub appointments: usize,
    pub completed: usize,
    pub medical_records: usize,
    pub invoices: usize,
    pub vaccinations: usize,
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.random_range(0..items.len())]
}

/// Populate the store. The same plan always produces the same records.
pub async fn seed(service: &ClinicService, plan: &SeedPlan) -> Result<SeedSummary> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let features = service.features();
    let mut summary = SeedSummary::default();

    let mut veterinarian_ids = Vec::with_capacity(plan.veterinarians);
    for i in 0..plan.veterinarians {
        let vet = service
            .create_veterinarian(NewVeterinarian {
                license_number: format!("VET-{:04}-{}", i + 1, plan.seed),
                first_name: pick(&mut rng, &FIRST_NAMES).to_string(),
                last_name: pick(&mut rng, &LAST_NAMES).to_string(),
                email: format!("vet{}.{}@clinic.example", i + 1, plan.seed),
                phone: Some(format!("555-01{:02}", i % 100)),
                specialization: Some(pick(&mut rng, &SPECIALIZATIONS).to_string()),
                hire_date: plan.anchor.checked_sub_days(Days::new(rng.random_range(100..3650))),
            })
            .await?;
        if features.metrics {
            service
                .update_veterinarian_fee(
                    vet.veterinarian_id,
                    Some(rng.random_range(50..=150) * 100),
                    Some(f64::from(rng.random_range(30..=50_u8)) / 10.0),
                )
                .await?;
        }
        veterinarian_ids.push(vet.veterinarian_id);
    }
    summary.veterinarians = veterinarian_ids.len();

    let mut owner_ids = Vec::with_capacity(plan.owners);
    for i in 0..plan.owners {
        let owner = service
            .create_owner(NewOwner {
                first_name: pick(&mut rng, &FIRST_NAMES).to_string(),
                last_name: pick(&mut rng, &LAST_NAMES).to_string(),
                email: format!("owner{}.{}@clinic.example", i + 1, plan.seed),
                phone: Some(format!("555-02{:02}", i % 100)),
                address: Some(format!("{} Elm Street", rng.random_range(1..999))),
            })
            .await?;
        owner_ids.push(owner.owner_id);
    }
    summary.owners = owner_ids.len();

    let mut pets = Vec::with_capacity(plan.pets);
    if !owner_ids.is_empty() {
        for _ in 0..plan.pets {
            let (species, breeds) = *pick(&mut rng, &SPECIES);
            let pet = service
                .create_pet(NewPet {
                    name: pick(&mut rng, &PET_NAMES).to_string(),
                    species: species.to_string(),
                    breed: Some(pick(&mut rng, breeds).to_string()),
                    birth_date: plan.anchor.checked_sub_days(Days::new(rng.random_range(180..5000))),
                    weight: Some(f64::from(rng.random_range(5..400_u16)) / 10.0),
                    owner_id: *pick(&mut rng, &owner_ids),
                })
                .await?;
            pets.push(pet);
        }
    }
    summary.pets = pets.len();

    if !pets.is_empty() && !veterinarian_ids.is_empty() {
        for _ in 0..plan.appointments {
            let pet_id = pick(&mut rng, &pets).pet_id;
            let veterinarian_id = *pick(&mut rng, &veterinarian_ids);
            let day = plan
                .anchor
                .checked_sub_days(Days::new(rng.random_range(0..365)))
                .unwrap_or(plan.anchor);
            let time = NaiveTime::from_hms_opt(rng.random_range(8..18), 0, 0).unwrap_or_default();

            let mut new = NewAppointment::scheduled(pet_id, veterinarian_id, day.and_time(time));
            new.reason = Some(pick(&mut rng, &REASONS).to_string());
            let appointment = service.schedule_appointment(new).await?;
            summary.appointments += 1;

            let id = appointment.appointment_id;
            let outcome = match rng.random_range(0..20) {
                0..=9 => AppointmentStatus::Completed,
                10..=14 => AppointmentStatus::Scheduled,
                15..=17 => AppointmentStatus::Cancelled,
                _ => AppointmentStatus::NoShow,
            };
            match outcome {
                AppointmentStatus::Completed => {
                    service.complete_appointment(id, Some("Seen".into())).await?;
                    summary.completed += 1;
                    if features.medical_records {
                        service
                            .create_medical_record(NewMedicalRecord {
                                appointment_id: id,
                                diagnosis: "Healthy".into(),
                                treatment: "None required".into(),
                                prescription: None,
                                follow_up_required: rng.random_bool(0.2),
                            })
                            .await?;
                        summary.medical_records += 1;
                    }
                    if features.invoices {
                        let subtotal = rng.random_range(40..=300) * 100;
                        let invoice = service
                            .create_invoice(id, day, subtotal, subtotal / 10)
                            .await?;
                        if rng.random_bool(0.7) {
                            service
                                .pay_invoice_at(invoice.invoice_id, day.and_time(time))
                                .await?;
                        }
                        summary.invoices += 1;
                    }
                }
                AppointmentStatus::Cancelled => {
                    service.cancel_appointment(id).await?;
                }
                AppointmentStatus::NoShow => {
                    service.mark_no_show(id).await?;
                }
                AppointmentStatus::Scheduled => {}
            }
        }
    }

    if features.vaccinations && !pets.is_empty() && !veterinarian_ids.is_empty() {
        let mut vaccines = Vec::with_capacity(VACCINES.len());
        for (name, species) in VACCINES {
            let vaccine = service
                .create_vaccine(NewVaccine {
                    name: format!("{name} ({})", plan.seed),
                    manufacturer: Some("Zoetis".into()),
                    species_applicable: Some(species.into()),
                })
                .await?;
            vaccines.push(vaccine);
        }

        for pet in &pets {
            let Some(vaccine) = vaccines
                .iter()
                .find(|v| v.species_applicable.as_deref() == Some(pet.species.as_str()))
            else {
                continue;
            };
            let given = plan
                .anchor
                .checked_sub_days(Days::new(rng.random_range(300..400)))
                .unwrap_or(plan.anchor);
            service
                .record_vaccination(NewVaccinationRecord {
                    pet_id: pet.pet_id,
                    vaccine_id: vaccine.vaccine_id,
                    veterinarian_id: *pick(&mut rng, &veterinarian_ids),
                    vaccination_date: given,
                    next_dose_date: given.checked_add_days(Days::new(365)),
                    batch_number: Some(format!("B{}", rng.random_range(1000..9999))),
                })
                .await?;
            summary.vaccinations += 1;
        }
    }

    info!(seed = plan.seed, ?summary, "Seeded clinic data");
    Ok(summary)
}
