// Service requests and their initial payments.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::model::{InitialPayment, PaymentStatus, RequestStatus, ServiceRequest};

const REQUEST_COLUMNS: &str = "request_id, post_id, user_id, target_user_id, request_type, status,
    request_content, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "initial_payment_id, post_id, user_id, request_id, amount, status,
    transaction_id, payment_method, created_at, updated_at";

fn map_request(row: &Row<'_>) -> rusqlite::Result<ServiceRequest> {
    Ok(ServiceRequest {
        request_id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        target_user_id: row.get(3)?,
        request_type: row.get(4)?,
        status: row.get(5)?,
        request_content: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_payment(row: &Row<'_>) -> rusqlite::Result<InitialPayment> {
    Ok(InitialPayment {
        initial_payment_id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        request_id: row.get(3)?,
        amount: row.get(4)?,
        status: row.get(5)?,
        transaction_id: row.get(6)?,
        payment_method: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// A request row and its first payment row, written together.
#[derive(Debug, Clone)]
pub struct NewRequest<'a> {
    pub post_id: i64,
    pub user_id: i64,
    pub target_user_id: i64,
    pub request_type: &'a str,
    pub request_content: Option<&'a str>,
    pub amount: i64,
    pub payment_method: &'a str,
    pub now: DateTime<Utc>,
}

impl Database {
    /// Insert the request and its pending payment in one transaction.
    pub fn insert_request_with_payment(
        &self,
        new: &NewRequest<'_>,
    ) -> Result<(ServiceRequest, InitialPayment)> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let request = tx
            .query_row(
                &format!(
                    "INSERT INTO requests (post_id, user_id, target_user_id, request_type, status,
                        request_content, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     RETURNING {REQUEST_COLUMNS}"
                ),
                params![
                    new.post_id,
                    new.user_id,
                    new.target_user_id,
                    new.request_type,
                    RequestStatus::Pending,
                    new.request_content,
                    new.now,
                ],
                map_request,
            )
            .context("failed to insert request")?;

        let payment = tx
            .query_row(
                &format!(
                    "INSERT INTO initial_payments (post_id, user_id, request_id, amount, status,
                        transaction_id, payment_method, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)
                     RETURNING {PAYMENT_COLUMNS}"
                ),
                params![
                    new.post_id,
                    new.user_id,
                    request.request_id,
                    new.amount,
                    PaymentStatus::Pending,
                    new.payment_method,
                    new.now,
                ],
                map_payment,
            )
            .context("failed to insert initial payment")?;

        tx.commit().context("failed to commit request")?;
        Ok((request, payment))
    }

    pub fn get_request(&self, request_id: i64) -> Result<Option<ServiceRequest>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE request_id = ?1"),
            params![request_id],
            map_request,
        )
        .optional()
        .context("failed to load request")
    }

    pub fn set_request_status(
        &self,
        request_id: i64,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE requests SET status = ?2, updated_at = ?3 WHERE request_id = ?1",
            params![request_id, status, now],
        )
        .context("failed to update request status")?;
        Ok(())
    }

    /// Requests where the user is either the initiator or the target.
    pub fn requests_involving(&self, user_id: i64) -> Result<Vec<ServiceRequest>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM requests
                 WHERE user_id = ?1 OR target_user_id = ?1 ORDER BY request_id"
            ))
            .context("failed to prepare requests_involving query")?;
        let requests = stmt
            .query_map(params![user_id], map_request)
            .context("failed to query requests")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map request rows")?;
        Ok(requests)
    }

    pub fn payments_for_request(&self, request_id: i64) -> Result<Vec<InitialPayment>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM initial_payments
                 WHERE request_id = ?1 ORDER BY initial_payment_id"
            ))
            .context("failed to prepare payments_for_request query")?;
        let payments = stmt
            .query_map(params![request_id], map_payment)
            .context("failed to query payments")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map payment rows")?;
        Ok(payments)
    }

    pub fn get_payment(&self, payment_id: i64) -> Result<Option<InitialPayment>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM initial_payments WHERE initial_payment_id = ?1"),
            params![payment_id],
            map_payment,
        )
        .optional()
        .context("failed to load payment")
    }

    /// The payment on `request_id` whose payer is `payer_id`.
    pub fn find_payment(&self, request_id: i64, payer_id: i64) -> Result<Option<InitialPayment>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PAYMENT_COLUMNS} FROM initial_payments
                 WHERE request_id = ?1 AND user_id = ?2
                 ORDER BY initial_payment_id LIMIT 1"
            ),
            params![request_id, payer_id],
            map_payment,
        )
        .optional()
        .context("failed to find payment")
    }

    pub fn find_payment_by_transaction(&self, transaction_id: &str) -> Result<Option<InitialPayment>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM initial_payments WHERE transaction_id = ?1"),
            params![transaction_id],
            map_payment,
        )
        .optional()
        .context("failed to find payment by transaction")
    }

    pub fn set_payment_transaction(
        &self,
        payment_id: i64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE initial_payments SET transaction_id = ?2, updated_at = ?3
             WHERE initial_payment_id = ?1",
            params![payment_id, transaction_id, now],
        )
        .context("failed to store transaction id")?;
        Ok(())
    }

    /// Persist a status and amount change that the caller already checked.
    pub fn update_payment(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<InitialPayment> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "UPDATE initial_payments SET status = ?2, amount = ?3, updated_at = ?4
                 WHERE initial_payment_id = ?1
                 RETURNING {PAYMENT_COLUMNS}"
            ),
            params![payment_id, status, amount, now],
            map_payment,
        )
        .context("failed to update payment")
    }
}
