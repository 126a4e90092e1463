//! Invoices.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::SqliteConnection;
use tracing::info;

use crate::storage;
use crate::storage::schema::Invoices;

use super::appointments::fetch_appointment;
use super::models::{AppointmentStatus, Invoice, PaymentStatus};
use super::revisions;
use super::{ClinicError, ClinicService, Result};

/// Invoice number for an appointment.
pub(crate) fn invoice_number(appointment_id: i64) -> String {
    format!("INV-{appointment_id}")
}

async fn fetch_invoice(conn: &mut SqliteConnection, invoice_id: i64) -> Result<Invoice> {
    let (sql, values) = Query::select()
        .expr(Expr::asterisk())
        .from(Invoices::Table)
        .and_where(Expr::col(Invoices::InvoiceId).eq(invoice_id))
        .build_sqlx(SqliteQueryBuilder);
    let row = sqlx::query_with(&sql, values)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ClinicError::not_found("invoice", invoice_id))?;
    Invoice::from_row(&row)
}

impl ClinicService {
    /// Bill a completed appointment. At most one invoice per appointment.
    pub async fn create_invoice(
        &self,
        appointment_id: i64,
        issue_date: NaiveDate,
        subtotal_cents: i64,
        tax_cents: i64,
    ) -> Result<Invoice> {
        self.require(self.features.invoices, "invoices", revisions::INVOICES)?;
        if subtotal_cents < 0 || tax_cents < 0 {
            return Err(ClinicError::InvalidInput("invoice amounts cannot be negative".into()));
        }
        let total_cents = subtotal_cents
            .checked_add(tax_cents)
            .ok_or_else(|| ClinicError::InvalidInput("invoice total overflows".into()))?;

        let mut tx = storage::begin_write(&self.pool).await?;
        let appointment = fetch_appointment(&mut tx, appointment_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("appointment", appointment_id))?;
        if appointment.status != AppointmentStatus::Completed {
            return Err(ClinicError::InvalidInput(format!(
                "appointment {appointment_id} is {}, only completed appointments are billed",
                appointment.status
            )));
        }

        let (sql, values) = Query::insert()
            .into_table(Invoices::Table)
            .columns([
                Invoices::AppointmentId,
                Invoices::InvoiceNumber,
                Invoices::IssueDate,
                Invoices::SubtotalCents,
                Invoices::TaxCents,
                Invoices::TotalCents,
                Invoices::PaymentStatus,
            ])
            .values_panic([
                appointment_id.into(),
                invoice_number(appointment_id).into(),
                issue_date.into(),
                subtotal_cents.into(),
                tax_cents.into(),
                total_cents.into(),
                PaymentStatus::Pending.as_str().into(),
            ])
            .build_sqlx(SqliteQueryBuilder);
        let id = sqlx::query_with(&sql, values)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                ClinicError::from_write(e, &format!("invoice for appointment {appointment_id}"))
            })?
            .last_insert_rowid();
        let invoice = fetch_invoice(&mut tx, id).await?;
        tx.commit().await?;

        info!(invoice = id, appointment = appointment_id, total_cents = invoice.total_cents, "Created invoice");
        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: i64) -> Result<Invoice> {
        self.require(self.features.invoices, "invoices", revisions::INVOICES)?;
        let mut conn = self.pool.acquire().await?;
        fetch_invoice(&mut conn, invoice_id).await
    }

    pub async fn list_invoices(&self, offset: u64, limit: u64) -> Result<Vec<Invoice>> {
        self.require(self.features.invoices, "invoices", revisions::INVOICES)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Invoices::Table)
            .order_by(Invoices::InvoiceId, Order::Asc)
            .limit(limit)
            .offset(offset)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Invoice::from_row).collect()
    }

    /// Invoices not yet paid, oldest first.
    pub async fn list_unpaid_invoices(&self) -> Result<Vec<Invoice>> {
        self.require(self.features.invoices, "invoices", revisions::INVOICES)?;
        let (sql, values) = Query::select()
            .expr(Expr::asterisk())
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::PaymentStatus).ne(PaymentStatus::Paid.as_str()))
            .order_by(Invoices::IssueDate, Order::Asc)
            .order_by(Invoices::InvoiceId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Invoice::from_row).collect()
    }

    /// Mark an invoice paid now.
    pub async fn pay_invoice(&self, invoice_id: i64) -> Result<Invoice> {
        self.pay_invoice_at(invoice_id, Utc::now().naive_utc()).await
    }

    /// Mark an invoice paid at a given time.
    pub async fn pay_invoice_at(&self, invoice_id: i64, paid_at: NaiveDateTime) -> Result<Invoice> {
        self.require(self.features.invoices, "invoices", revisions::INVOICES)?;

        let mut tx = storage::begin_write(&self.pool).await?;
        let invoice = fetch_invoice(&mut tx, invoice_id).await?;
        if invoice.payment_status == PaymentStatus::Paid {
            return Err(ClinicError::AlreadyPaid(invoice_id));
        }

        let (sql, values) = Query::update()
            .table(Invoices::Table)
            .value(Invoices::PaymentStatus, PaymentStatus::Paid.as_str())
            .value(Invoices::PaymentDate, paid_at)
            .and_where(Expr::col(Invoices::InvoiceId).eq(invoice_id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *tx).await?;
        let paid = fetch_invoice(&mut tx, invoice_id).await?;
        tx.commit().await?;

        info!(invoice = invoice_id, total_cents = paid.total_cents, "Invoice paid");
        Ok(paid)
    }
}
