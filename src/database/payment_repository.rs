//! Postgres-backed [`PaymentStore`].
//!
//! Every status mutation is a single `UPDATE` whose `WHERE` clause encodes
//! the legal predecessor state; the affected-row count is the compare-and-set
//! result. No row locks and no transactions on the hot paths.

use crate::database::error::DatabaseError;
use crate::database::payment_store::{
    NewPaymentRecord, PaymentRecord, PaymentStatus, PaymentStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, transaction_code, user_id, amount, status, payment_method, \
     description, idempotency_key, payment_intent_id, reference_number, payer_email, \
     paid_at, created_at, updated_at";

/// Raw row shape; `status` stays a string at the SQL boundary and is parsed
/// into the domain enum on the way out.
#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    transaction_code: String,
    user_id: Option<Uuid>,
    amount: Decimal,
    status: String,
    payment_method: String,
    description: Option<String>,
    idempotency_key: Option<String>,
    payment_intent_id: Option<String>,
    reference_number: Option<String>,
    payer_email: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_db_status(&row.status).ok_or(DatabaseError::Query {
            message: format!("payment {} has unknown status '{}'", row.id, row.status),
        })?;
        Ok(PaymentRecord {
            id: row.id,
            transaction_code: row.transaction_code,
            user_id: row.user_id,
            amount: row.amount,
            status,
            payment_method: row.payment_method,
            description: row.description,
            idempotency_key: row.idempotency_key,
            payment_intent_id: row.payment_intent_id,
            reference_number: row.reference_number,
            payer_email: row.payer_email,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, new: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError> {
        let paid_at = if new.status == PaymentStatus::Paid {
            Some(Utc::now())
        } else {
            None
        };
        let sql = format!(
            "INSERT INTO payments (id, transaction_code, user_id, amount, status, \
             payment_method, description, idempotency_key, payment_intent_id, payer_email, paid_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.transaction_code)
            .bind(new.user_id)
            .bind(new.amount)
            .bind(new.status.as_str())
            .bind(&new.payment_method)
            .bind(&new.description)
            .bind(&new.idempotency_key)
            .bind(&new.payment_intent_id)
            .bind(&new.payer_email)
            .bind(paid_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        PaymentRecord::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payments WHERE payment_intent_id = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payments WHERE reference_number = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payments WHERE idempotency_key = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_recent_unmatched_pending(
        &self,
        window: Duration,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM payments \
             WHERE status = 'pending' AND payment_intent_id IS NULL AND created_at >= $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(cutoff(window))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_pending_with_intent(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM payments \
             WHERE status = 'pending' AND payment_intent_id IS NOT NULL AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(cutoff(min_age))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn claim_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET payment_intent_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' AND payment_intent_id IS NULL",
        )
        .bind(id)
        .bind(intent_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
        reference: Option<&str>,
        method: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'paid', paid_at = $2, \
             reference_number = COALESCE($3, reference_number), \
             payment_method = COALESCE($4, payment_method), \
             updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(paid_at)
        .bind(reference)
        .bind(method)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'cancelled', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        reference: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'refunded', \
             reference_number = COALESCE($2, reference_number), \
             updated_at = NOW() \
             WHERE id = $1 AND status = 'paid'",
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_reference(&self, id: Uuid, reference: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET reference_number = $2, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('failed', 'cancelled', 'refunded')",
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_stale(
        &self,
        max_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        // The outer status predicate repeats the inner one so a record that
        // transitions between the SELECT and the UPDATE is left alone.
        let sql = format!(
            "UPDATE payments SET status = 'failed', updated_at = NOW() \
             WHERE status = 'pending' AND id IN ( \
                 SELECT id FROM payments \
                 WHERE status = 'pending' AND created_at < $1 \
                 ORDER BY created_at ASC LIMIT $2) \
             RETURNING {RECORD_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(cutoff(max_age))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}
