use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ExcursionStore, InscriptionStore, PaymentStore, PaymentUpdate, StoreError};
use crate::inscriptions::{plan_transition, InscriptionError, StatusChange, TransitionPlan};
use crate::ledger::{ExcursionMutation, LedgerError};
use crate::models::{Excursion, Inscription, Payment, PaymentStatus};

const UNIQUE_VIOLATION: &str = "23505";
const LIVE_INSCRIPTION_INDEX: &str = "inscriptions_live_customer_excursion";
const EXTERNAL_ID_INDEX: &str = "payments_external_id_key";
const ACTIVE_PAYMENT_INDEX: &str = "payments_one_active_per_inscription";

const EXCURSION_COLUMNS: &str = "id, organizer_id, title, seats_total, seats_occupied, \
     departure_at, price, accepts_pix, accepts_card, status, created_at, updated_at";

const INSCRIPTION_COLUMNS: &str =
    "id, excursion_id, customer_id, amount_due, payment_status, customer_notes, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, inscription_id, method, external_id, amount, status, \
     installments, expires_at, qr_code, qr_code_base64, ticket_url, notes, processed_at, \
     created_at, updated_at";

/// PostgreSQL backend. Every contended write runs in its own transaction
/// holding `SELECT ... FOR UPDATE` on the one row it changes.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_excursion(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Excursion>, StoreError> {
        let sql = format!("SELECT {EXCURSION_COLUMNS} FROM excursions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ExcursionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Excursion::try_from).transpose()
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            db.constraint()
        }
        _ => None,
    }
}

#[derive(Debug, FromRow)]
struct ExcursionRow {
    id: Uuid,
    organizer_id: Uuid,
    title: String,
    seats_total: i32,
    seats_occupied: i32,
    departure_at: DateTime<Utc>,
    price: Decimal,
    accepts_pix: bool,
    accepts_card: bool,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExcursionRow> for Excursion {
    type Error = StoreError;

    fn try_from(row: ExcursionRow) -> Result<Self, Self::Error> {
        Ok(Excursion {
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            seats_total: row.seats_total,
            seats_occupied: row.seats_occupied,
            departure_at: row.departure_at,
            price: row.price,
            accepts_pix: row.accepts_pix,
            accepts_card: row.accepts_card,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct InscriptionRow {
    id: Uuid,
    excursion_id: Uuid,
    customer_id: Uuid,
    amount_due: Decimal,
    payment_status: String,
    customer_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InscriptionRow> for Inscription {
    type Error = StoreError;

    fn try_from(row: InscriptionRow) -> Result<Self, Self::Error> {
        Ok(Inscription {
            id: row.id,
            excursion_id: row.excursion_id,
            customer_id: row.customer_id,
            amount_due: row.amount_due,
            payment_status: row.payment_status.parse()?,
            customer_notes: row.customer_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    inscription_id: Uuid,
    method: String,
    external_id: String,
    amount: Decimal,
    status: String,
    installments: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
    ticket_url: Option<String>,
    notes: String,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            inscription_id: row.inscription_id,
            method: row.method.parse()?,
            external_id: row.external_id,
            amount: row.amount,
            status: row.status.parse()?,
            installments: row.installments,
            expires_at: row.expires_at,
            qr_code: row.qr_code,
            qr_code_base64: row.qr_code_base64,
            ticket_url: row.ticket_url,
            notes: row.notes,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn payments_from(rows: Vec<PaymentRow>) -> Result<Vec<Payment>, StoreError> {
    rows.into_iter().map(Payment::try_from).collect()
}

#[async_trait]
impl ExcursionStore for PgStore {
    async fn insert_excursion(&self, excursion: &Excursion) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO excursions ({EXCURSION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(excursion.id)
        .bind(excursion.organizer_id)
        .bind(&excursion.title)
        .bind(excursion.seats_total)
        .bind(excursion.seats_occupied)
        .bind(excursion.departure_at)
        .bind(excursion.price)
        .bind(excursion.accepts_pix)
        .bind(excursion.accepts_card)
        .bind(excursion.status.as_str())
        .bind(excursion.created_at)
        .bind(excursion.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_excursion(&self, id: Uuid) -> Result<Option<Excursion>, StoreError> {
        let sql = format!("SELECT {EXCURSION_COLUMNS} FROM excursions WHERE id = $1");
        let row = sqlx::query_as::<_, ExcursionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Excursion::try_from).transpose()
    }

    async fn modify_excursion(
        &self,
        id: Uuid,
        mutation: &ExcursionMutation,
        now: DateTime<Utc>,
    ) -> Result<Excursion, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let mut excursion = Self::lock_excursion(&mut tx, id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;

        // Dropping `tx` on error rolls back and releases the lock.
        mutation.apply(&mut excursion, now)?;

        sqlx::query(
            "UPDATE excursions SET title = $2, seats_total = $3, seats_occupied = $4, price = $5, \
             accepts_pix = $6, accepts_card = $7, status = $8, updated_at = $9 WHERE id = $1",
        )
        .bind(id)
        .bind(&excursion.title)
        .bind(excursion.seats_total)
        .bind(excursion.seats_occupied)
        .bind(excursion.price)
        .bind(excursion.accepts_pix)
        .bind(excursion.accepts_card)
        .bind(excursion.status.as_str())
        .bind(excursion.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(excursion)
    }
}

#[async_trait]
impl InscriptionStore for PgStore {
    async fn insert_inscription(&self, inscription: &Inscription) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO inscriptions ({INSCRIPTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(inscription.id)
        .bind(inscription.excursion_id)
        .bind(inscription.customer_id)
        .bind(inscription.amount_due)
        .bind(inscription.payment_status.as_str())
        .bind(&inscription.customer_notes)
        .bind(inscription.created_at)
        .bind(inscription.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violated_constraint(&e) == Some(LIVE_INSCRIPTION_INDEX) => {
                Err(StoreError::DuplicateInscription)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_inscription(&self, id: Uuid) -> Result<Option<Inscription>, StoreError> {
        let sql = format!("SELECT {INSCRIPTION_COLUMNS} FROM inscriptions WHERE id = $1");
        let row = sqlx::query_as::<_, InscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Inscription::try_from).transpose()
    }

    async fn list_inscriptions_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Inscription>, StoreError> {
        let sql = format!(
            "SELECT {INSCRIPTION_COLUMNS} FROM inscriptions WHERE customer_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, InscriptionRow>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Inscription::try_from).collect()
    }

    async fn transition_inscription(
        &self,
        id: Uuid,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InscriptionError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let sql = format!("SELECT {INSCRIPTION_COLUMNS} FROM inscriptions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, InscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let mut inscription = row
            .map(Inscription::try_from)
            .transpose()?
            .ok_or(InscriptionError::NotFound(id))?;

        let previous = inscription.payment_status;
        let plan = plan_transition(previous, to)?;

        if let TransitionPlan::Apply(_) = plan {
            sqlx::query("UPDATE inscriptions SET payment_status = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(to.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
            inscription.payment_status = to;
            inscription.updated_at = now;
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(StatusChange {
            inscription,
            previous,
            plan,
        })
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(payment.id)
        .bind(payment.inscription_id)
        .bind(payment.method.as_str())
        .bind(&payment.external_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.installments)
        .bind(payment.expires_at)
        .bind(&payment.qr_code)
        .bind(&payment.qr_code_base64)
        .bind(&payment.ticket_url)
        .bind(&payment.notes)
        .bind(payment.processed_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violated_constraint(&e) == Some(EXTERNAL_ID_INDEX) => {
                Err(StoreError::DuplicateExternalId(payment.external_id.clone()))
            }
            Err(e) if violated_constraint(&e) == Some(ACTIVE_PAYMENT_INDEX) => {
                Err(StoreError::ActivePaymentExists(payment.inscription_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_id = $1");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_active_payment(
        &self,
        inscription_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE inscription_id = $1 AND status IN ('PENDING', 'PROCESSING')"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(inscription_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_approved_payment(
        &self,
        inscription_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE inscription_id = $1 AND status = 'APPROVED' \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(inscription_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_expired_pix(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE method = 'PIX' AND status = 'PENDING' AND expires_at <= $1 \
             ORDER BY expires_at"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        payments_from(rows)
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentUpdate, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        let mut payment: Payment = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::Missing {
                entity: "payment",
                id: id.to_string(),
            })?
            .try_into()?;

        let previous = payment.status;
        if !payment.advance(to, reason, now) {
            return Ok(PaymentUpdate::Unchanged(payment));
        }

        sqlx::query(
            "UPDATE payments SET status = $2, notes = $3, processed_at = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(payment.status.as_str())
        .bind(&payment.notes)
        .bind(payment.processed_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PaymentUpdate::Applied { previous, payment })
    }
}
