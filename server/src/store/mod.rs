//! Persistence seams for the booking core.
//!
//! Every write that touches contended state (occupancy, inscription status,
//! payment status) is a single call that locks one row, evaluates the domain
//! rule against the locked value and commits. Callers never read-modify-write
//! across two calls.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::inscriptions::{InscriptionError, StatusChange};
use crate::ledger::{ExcursionMutation, LedgerError};
use crate::models::{Excursion, Inscription, ParseEnumError, Payment, PaymentStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a live inscription already exists for this customer and excursion")]
    DuplicateInscription,

    #[error("gateway payment id '{0}' is already recorded")]
    DuplicateExternalId(String),

    #[error("inscription {0} already has a payment in progress")]
    ActivePaymentExists(Uuid),

    #[error("{entity} {id} not found")]
    Missing { entity: &'static str, id: String },

    #[error("corrupt row: {0}")]
    Corrupt(#[from] ParseEnumError),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a locked payment status write.
#[derive(Debug, Clone)]
pub enum PaymentUpdate {
    Applied {
        previous: PaymentStatus,
        payment: Payment,
    },
    Unchanged(Payment),
}

#[async_trait]
pub trait ExcursionStore: Send + Sync {
    async fn insert_excursion(&self, excursion: &Excursion) -> Result<(), StoreError>;

    async fn get_excursion(&self, id: Uuid) -> Result<Option<Excursion>, StoreError>;

    /// Applies `mutation` under an exclusive lock on the excursion row.
    /// A failed mutation leaves the stored row untouched.
    async fn modify_excursion(
        &self,
        id: Uuid,
        mutation: &ExcursionMutation,
        now: DateTime<Utc>,
    ) -> Result<Excursion, LedgerError>;
}

#[async_trait]
pub trait InscriptionStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateInscription`] when the customer already
    /// holds a non-cancelled inscription on the same excursion.
    async fn insert_inscription(&self, inscription: &Inscription) -> Result<(), StoreError>;

    async fn get_inscription(&self, id: Uuid) -> Result<Option<Inscription>, StoreError>;

    async fn list_inscriptions_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Inscription>, StoreError>;

    /// Evaluates the payment-status state machine against the locked row.
    async fn transition_inscription(
        &self,
        id: Uuid,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InscriptionError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails when the external id is already known or the inscription already
    /// has a non-terminal payment.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    async fn find_active_payment(&self, inscription_id: Uuid)
        -> Result<Option<Payment>, StoreError>;

    /// Most recent APPROVED payment recorded for the inscription, if any.
    async fn find_approved_payment(
        &self,
        inscription_id: Uuid,
    ) -> Result<Option<Payment>, StoreError>;

    /// PIX payments still pending whose `expires_at` is at or before `now`.
    async fn list_expired_pix(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, StoreError>;

    async fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentUpdate, StoreError>;
}

/// The three store seams backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub excursions: Arc<dyn ExcursionStore>,
    pub inscriptions: Arc<dyn InscriptionStore>,
    pub payments: Arc<dyn PaymentStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ExcursionStore + InscriptionStore + PaymentStore + 'static,
    {
        Self {
            excursions: backend.clone(),
            inscriptions: backend.clone(),
            payments: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}
