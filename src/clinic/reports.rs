//! Read-only reports over current records and stored metrics.

use chrono::{Days, NaiveDate};
use sea_query::{Alias, Expr, Func, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;

use crate::storage::schema::{Invoices, VaccinationRecords, Veterinarians};

use super::models::{PaymentStatus, RevenueReport, VaccinationRecord, Veterinarian};
use super::revisions;
use super::{ClinicError, ClinicService, Result};

impl ClinicService {
    /// Paid invoice totals whose payment date falls in `[start, end]`.
    pub async fn revenue(&self, start: NaiveDate, end: NaiveDate) -> Result<RevenueReport> {
        self.require(self.features.invoices, "revenue report", revisions::INVOICES)?;
        if start > end {
            return Err(ClinicError::InvalidInput(format!(
                "revenue window starts {start} after it ends {end}"
            )));
        }

        let (sql, values) = Query::select()
            .expr(Func::coalesce([
                Expr::col(Invoices::TotalCents).sum(),
                Expr::val(0).into(),
            ]))
            .expr(Expr::col(Invoices::InvoiceId).count())
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::PaymentStatus).eq(PaymentStatus::Paid.as_str()))
            .and_where(
                Expr::expr(Func::cust(Alias::new("date")).arg(Expr::col(Invoices::PaymentDate)))
                    .between(start, end),
            )
            .build_sqlx(SqliteQueryBuilder);
        let (total_revenue_cents, paid_invoices): (i64, i64) =
            sqlx::query_as_with(&sql, values).fetch_one(&self.pool).await?;

        Ok(RevenueReport {
            start_date: start,
            end_date: end,
            total_revenue_cents,
            paid_invoices,
        })
    }

    /// Veterinarians ranked by stored appointment total.
    pub async fn popular_veterinarians(&self, limit: Option<u32>) -> Result<Vec<Veterinarian>> {
        self.require(self.features.metrics, "veterinarian ranking", revisions::METRICS)?;
        let limit = limit.unwrap_or(self.reports.popular_veterinarians_limit);

        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Veterinarians::Table)
            .order_by(Veterinarians::TotalAppointments, Order::Desc)
            .order_by(Veterinarians::VeterinarianId, Order::Asc)
            .limit(u64::from(limit))
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Veterinarian::from_row).collect()
    }

    /// Doses due between `today` and `today + days`, inclusive, soonest first.
    pub async fn vaccination_alerts(
        &self,
        today: NaiveDate,
        days: Option<u32>,
    ) -> Result<Vec<VaccinationRecord>> {
        self.require(self.features.vaccinations, "vaccination alerts", revisions::VACCINATIONS)?;
        let days = days.unwrap_or(self.reports.vaccination_alert_days);
        let until = today
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| ClinicError::InvalidInput(format!("{days} days from {today} is out of range")))?;

        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(VaccinationRecords::Table)
            .and_where(Expr::col(VaccinationRecords::NextDoseDate).between(today, until))
            .order_by(VaccinationRecords::NextDoseDate, Order::Asc)
            .order_by(VaccinationRecords::VaccinationId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(VaccinationRecord::from_row).collect()
    }
}
