//! Pure appointment transition to metric deltas.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::EntityRef;

/// What the metrics need to know about one appointment version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentFacts {
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub completed: bool,
    pub visit_date: NaiveDate,
}

/// Minimal adjustment to stored metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetricDelta {
    TotalAppointments { veterinarian_id: i64, delta: i64 },
    VisitCount { pet_id: i64, delta: i64 },
    /// A completed visit on `date` no longer counts.
    LastVisitRetracted { pet_id: i64, date: NaiveDate },
    /// A completed visit on `date` now counts.
    LastVisitObserved { pet_id: i64, date: NaiveDate },
}

impl MetricDelta {
    pub fn entity(&self) -> EntityRef {
        match *self {
            MetricDelta::TotalAppointments {
                veterinarian_id, ..
            } => EntityRef::veterinarian(veterinarian_id),
            MetricDelta::VisitCount { pet_id, .. }
            | MetricDelta::LastVisitRetracted { pet_id, .. }
            | MetricDelta::LastVisitObserved { pet_id, .. } => EntityRef::pet(pet_id),
        }
    }
}

/// Deltas implied by an appointment moving from `old` to `new`.
///
/// `None` on the left is a create, on the right a delete. The old version's
/// contribution is withdrawn and the new one's added; contributions that
/// cancel out are dropped. Output is ordered counts first, then
/// retractions, then observations.
pub fn transition(
    old: Option<&AppointmentFacts>,
    new: Option<&AppointmentFacts>,
) -> Vec<MetricDelta> {
    let mut totals: BTreeMap<i64, i64> = BTreeMap::new();
    let mut visits: BTreeMap<i64, i64> = BTreeMap::new();
    let mut retracted: Vec<(i64, NaiveDate)> = Vec::new();
    let mut observed: Vec<(i64, NaiveDate)> = Vec::new();

    if let Some(old) = old {
        *totals.entry(old.veterinarian_id).or_default() -= 1;
        if old.completed {
            *visits.entry(old.pet_id).or_default() -= 1;
            retracted.push((old.pet_id, old.visit_date));
        }
    }
    if let Some(new) = new {
        *totals.entry(new.veterinarian_id).or_default() += 1;
        if new.completed {
            *visits.entry(new.pet_id).or_default() += 1;
            let visit = (new.pet_id, new.visit_date);
            match retracted.iter().position(|r| *r == visit) {
                Some(i) => {
                    retracted.remove(i);
                }
                None => observed.push(visit),
            }
        }
    }

    let mut deltas = Vec::new();
    deltas.extend(
        totals
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|(veterinarian_id, delta)| MetricDelta::TotalAppointments {
                veterinarian_id,
                delta,
            }),
    );
    deltas.extend(
        visits
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|(pet_id, delta)| MetricDelta::VisitCount { pet_id, delta }),
    );
    deltas.extend(
        retracted
            .into_iter()
            .map(|(pet_id, date)| MetricDelta::LastVisitRetracted { pet_id, date }),
    );
    deltas.extend(
        observed
            .into_iter()
            .map(|(pet_id, date)| MetricDelta::LastVisitObserved { pet_id, date }),
    );
    deltas
}
