//! Inscription manager: bookings against the excursion ledger.
//!
//! Booking is reserve-then-persist. The seat is claimed first because it is the
//! contended resource; if the inscription cannot be stored afterwards the seat
//! is handed back before the error is returned.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::identity::{IdentityError, IdentityProvider};
use crate::ledger::{ExcursionLedger, LedgerError};
use crate::models::{Inscription, PaymentStatus};
use crate::notifications::{Notification, NotificationQueue};
use crate::store::{InscriptionStore, StoreError};

#[derive(Debug, Error)]
pub enum InscriptionError {
    #[error("inscription {0} not found")]
    NotFound(Uuid),

    #[error("customer already holds a booking on this excursion")]
    Duplicate,

    #[error("customer {0} is not allowed to book this excursion")]
    Forbidden(Uuid),

    #[error("invalid payment status transition from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Seat consequence of a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatEffect {
    Keep,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    Apply(SeatEffect),
    /// The inscription is already settled (or already at the target); nothing to do.
    AlreadySettled,
}

/// The inscription payment-status state machine.
///
/// | from                | to                   | effect  |
/// |---------------------|----------------------|---------|
/// | PENDING             | PROCESSING           | keep    |
/// | PENDING, PROCESSING | APPROVED             | keep    |
/// | PENDING, PROCESSING | REJECTED, CANCELLED  | release |
/// | APPROVED            | REFUNDED             | release |
/// | terminal            | anything else        | no-op   |
pub fn plan_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<TransitionPlan, InscriptionError> {
    use PaymentStatus::*;

    if from == to {
        return Ok(TransitionPlan::AlreadySettled);
    }

    match (from, to) {
        (Pending, Processing) | (Pending | Processing, Approved) => {
            Ok(TransitionPlan::Apply(SeatEffect::Keep))
        }
        (Pending | Processing, Rejected | Cancelled) | (Approved, Refunded) => {
            Ok(TransitionPlan::Apply(SeatEffect::Release))
        }
        (from, _) if from.is_terminal() => Ok(TransitionPlan::AlreadySettled),
        (from, to) => Err(InscriptionError::InvalidTransition { from, to }),
    }
}

/// Result of a locked inscription status write.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub inscription: Inscription,
    pub previous: PaymentStatus,
    pub plan: TransitionPlan,
}

pub struct InscriptionManager {
    ledger: Arc<ExcursionLedger>,
    store: Arc<dyn InscriptionStore>,
    identity: Arc<dyn IdentityProvider>,
    notifications: NotificationQueue,
    clock: Arc<dyn Clock>,
}

impl InscriptionManager {
    pub fn new(
        ledger: Arc<ExcursionLedger>,
        store: Arc<dyn InscriptionStore>,
        identity: Arc<dyn IdentityProvider>,
        notifications: NotificationQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            store,
            identity,
            notifications,
            clock,
        }
    }

    pub async fn create_inscription(
        &self,
        excursion_id: Uuid,
        customer_id: Uuid,
        customer_notes: Option<String>,
    ) -> Result<Inscription, InscriptionError> {
        if !self
            .identity
            .is_booking_allowed(customer_id, excursion_id)
            .await?
        {
            return Err(InscriptionError::Forbidden(customer_id));
        }

        let reservation = self.ledger.reserve_seat(excursion_id).await?;

        let now = self.clock.now();
        let inscription = Inscription {
            id: Uuid::new_v4(),
            excursion_id,
            customer_id,
            amount_due: reservation.price,
            payment_status: PaymentStatus::Pending,
            customer_notes,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert_inscription(&inscription).await {
            self.compensate_reservation(excursion_id, &e).await;
            return Err(match e {
                StoreError::DuplicateInscription => InscriptionError::Duplicate,
                other => InscriptionError::Store(other),
            });
        }

        info!(
            inscription_id = %inscription.id,
            excursion_id = %excursion_id,
            customer_id = %customer_id,
            seats_occupied = reservation.seats_occupied,
            seats_total = reservation.seats_total,
            "Inscription created"
        );

        self.notifications.enqueue(Notification::InscriptionCreated {
            inscription_id: inscription.id,
            customer_id,
            excursion_id,
            excursion_title: reservation.title,
            amount_due: inscription.amount_due,
        });

        Ok(inscription)
    }

    async fn compensate_reservation(&self, excursion_id: Uuid, cause: &StoreError) {
        warn!(excursion_id = %excursion_id, error = %cause, "Inscription not stored, releasing held seat");
        if let Err(e) = self.ledger.release_seat(excursion_id).await {
            error!(
                alert = true,
                excursion_id = %excursion_id,
                error = %e,
                "Failed to release seat after inscription persistence failure"
            );
        }
    }

    /// Drives the inscription through the payment-status state machine.
    ///
    /// Invalid transitions are logged and returned as
    /// [`InscriptionError::InvalidTransition`]; reconciliation callers treat
    /// them as already handled.
    pub async fn apply_payment_status(
        &self,
        inscription_id: Uuid,
        status: PaymentStatus,
    ) -> Result<StatusChange, InscriptionError> {
        let now = self.clock.now();
        let change = match self
            .store
            .transition_inscription(inscription_id, status, now)
            .await
        {
            Ok(change) => change,
            Err(InscriptionError::InvalidTransition { from, to }) => {
                warn!(inscription_id = %inscription_id, from = %from, to = %to, "Rejected inscription status transition");
                return Err(InscriptionError::InvalidTransition { from, to });
            }
            Err(e) => return Err(e),
        };

        let inscription = &change.inscription;
        match change.plan {
            TransitionPlan::AlreadySettled => {
                debug!(
                    inscription_id = %inscription_id,
                    current = %change.previous,
                    requested = %status,
                    "Inscription already settled, ignoring status"
                );
            }
            TransitionPlan::Apply(effect) => {
                info!(
                    inscription_id = %inscription_id,
                    from = %change.previous,
                    to = %inscription.payment_status,
                    "Inscription payment status changed"
                );

                if effect == SeatEffect::Release {
                    if let Err(e) = self.ledger.release_seat(inscription.excursion_id).await {
                        error!(
                            alert = true,
                            inscription_id = %inscription_id,
                            excursion_id = %inscription.excursion_id,
                            error = %e,
                            "Failed to release seat for settled inscription"
                        );
                    }
                    self.notifications.enqueue(Notification::SeatReleased {
                        inscription_id,
                        customer_id: inscription.customer_id,
                        excursion_id: inscription.excursion_id,
                        status: inscription.payment_status,
                    });
                }

                if inscription.payment_status == PaymentStatus::Approved {
                    self.notifications.enqueue(Notification::PaymentApproved {
                        inscription_id,
                        customer_id: inscription.customer_id,
                        excursion_id: inscription.excursion_id,
                        amount: inscription.amount_due,
                    });
                }
            }
        }

        Ok(change)
    }

    pub async fn get_inscription(&self, id: Uuid) -> Result<Inscription, InscriptionError> {
        self.store
            .get_inscription(id)
            .await?
            .ok_or(InscriptionError::NotFound(id))
    }

    /// Someone else's inscription is reported as not found.
    pub async fn get_for_customer(
        &self,
        id: Uuid,
        customer_id: Uuid,
    ) -> Result<Inscription, InscriptionError> {
        let inscription = self.get_inscription(id).await?;
        if inscription.customer_id != customer_id {
            return Err(InscriptionError::NotFound(id));
        }
        Ok(inscription)
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Inscription>, InscriptionError> {
        Ok(self.store.list_inscriptions_by_customer(customer_id).await?)
    }
}
