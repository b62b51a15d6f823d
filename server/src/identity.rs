//! Customer identity and booking permission.
//!
//! Roles, companies and login live outside this service; the core only needs
//! to resolve a payer and ask whether a booking is allowed.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::Customer;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("customer {0} not found")]
    UnknownCustomer(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_customer(&self, id: Uuid) -> Result<Customer, IdentityError>;

    async fn is_booking_allowed(
        &self,
        customer_id: Uuid,
        excursion_id: Uuid,
    ) -> Result<bool, IdentityError>;
}

/// Reads customers from the `customers` table.
#[derive(Clone)]
pub struct PgCustomerDirectory {
    pool: PgPool,
}

impl PgCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgCustomerDirectory {
    async fn resolve_customer(&self, id: Uuid) -> Result<Customer, IdentityError> {
        sqlx::query_as::<_, Customer>(
            "SELECT id, name, email, document, booking_blocked FROM customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(IdentityError::UnknownCustomer(id))
    }

    async fn is_booking_allowed(
        &self,
        customer_id: Uuid,
        excursion_id: Uuid,
    ) -> Result<bool, IdentityError> {
        let customer = self.resolve_customer(customer_id).await?;
        if customer.booking_blocked {
            return Ok(false);
        }

        let banned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM customer_excursion_bans \
             WHERE customer_id = $1 AND excursion_id = $2)",
        )
        .bind(customer_id)
        .bind(excursion_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(!banned)
    }
}

/// Customer directory held in memory, with per-excursion bans.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    customers: DashMap<Uuid, Customer>,
    banned: DashSet<(Uuid, Uuid)>,
    admit_unknown: bool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for a standalone in-memory deployment: an unknown caller is
    /// registered on first sight with a placeholder profile.
    pub fn admitting_unknown() -> Self {
        Self {
            admit_unknown: true,
            ..Self::default()
        }
    }

    pub fn register(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn ban(&self, customer_id: Uuid, excursion_id: Uuid) {
        self.banned.insert((customer_id, excursion_id));
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn resolve_customer(&self, id: Uuid) -> Result<Customer, IdentityError> {
        if let Some(customer) = self.customers.get(&id) {
            return Ok(customer.value().clone());
        }
        if !self.admit_unknown {
            return Err(IdentityError::UnknownCustomer(id));
        }

        let customer = self
            .customers
            .entry(id)
            .or_insert_with(|| {
                debug!(customer_id = %id, "Registering unknown caller");
                Customer::new(
                    id,
                    format!("Customer {}", id.simple()),
                    format!("{id}@customers.invalid"),
                )
            })
            .value()
            .clone();
        Ok(customer)
    }

    async fn is_booking_allowed(
        &self,
        customer_id: Uuid,
        excursion_id: Uuid,
    ) -> Result<bool, IdentityError> {
        let customer = self.resolve_customer(customer_id).await?;
        Ok(!customer.booking_blocked && !self.banned.contains(&(customer_id, excursion_id)))
    }
}
