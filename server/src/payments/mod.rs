//! Payment orchestrator: gateway charges for inscriptions.
//!
//! A charge is only requested after every local check has passed. When the
//! gateway cannot be reached, or the resulting payment cannot be recorded, the
//! inscription is cancelled so its held seat does not leak.

mod card;
mod sweeper;

pub use card::{detect_brand, CardDetails, ValidatedCard, MAX_INSTALLMENTS};
pub use sweeper::spawn_expiry_sweeper;

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::gateway::{
    map_gateway_status, with_retry, ChargeMethod, ChargeRequest, GatewayError, GatewayPayment,
    Payer, PaymentGateway, RetryPolicy,
};
use crate::identity::{IdentityError, IdentityProvider};
use crate::inscriptions::{InscriptionError, InscriptionManager};
use crate::ledger::{ExcursionLedger, LedgerError};
use crate::models::{Customer, Excursion, Inscription, Payment, PaymentMethod, PaymentStatus};
use crate::store::{PaymentStore, PaymentUpdate, StoreError};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),

    #[error("payment {0} not found")]
    NotFound(Uuid),

    #[error("inscription does not belong to this customer")]
    Forbidden,

    #[error("{0}")]
    NotPayable(String),

    #[error("this excursion does not accept {0} payments")]
    MethodNotAccepted(PaymentMethod),

    #[error("inscription {0} already has a payment in progress")]
    InProgress(Uuid),

    #[error("payment gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Inscription(#[from] InscriptionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub pix_expiry: Duration,
    pub notification_url: String,
    pub retry: RetryPolicy,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            pix_expiry: Duration::minutes(30),
            notification_url: "http://localhost:3001/webhook/mercadopago".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counts from one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySweep {
    pub examined: usize,
    pub cancelled: usize,
    pub settled_by_gateway: usize,
}

/// Everything a charge needs, loaded and checked before the gateway is called.
struct Checkout {
    inscription: Inscription,
    excursion: Excursion,
    customer: Customer,
}

pub struct PaymentOrchestrator {
    inscriptions: Arc<InscriptionManager>,
    ledger: Arc<ExcursionLedger>,
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    settings: PaymentSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        inscriptions: Arc<InscriptionManager>,
        ledger: Arc<ExcursionLedger>,
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            inscriptions,
            ledger,
            store,
            gateway,
            identity,
            clock,
            settings,
        }
    }

    pub async fn create_pix_payment(
        &self,
        inscription_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Payment, PaymentError> {
        let checkout = self
            .checkout(inscription_id, customer_id, PaymentMethod::Pix)
            .await?;

        let request = self.charge_request(&checkout, ChargeMethod::Pix);
        let charge = self.charge(&checkout.inscription, &request).await?;

        let now = self.clock.now();
        let payment = Payment {
            id: Uuid::new_v4(),
            inscription_id,
            method: PaymentMethod::Pix,
            external_id: charge.id,
            amount: checkout.inscription.amount_due,
            status: map_gateway_status(&charge.status),
            installments: None,
            expires_at: Some(now + self.settings.pix_expiry),
            qr_code: charge.qr_code,
            qr_code_base64: charge.qr_code_base64,
            ticket_url: charge.ticket_url,
            notes: "PIX payment created".to_string(),
            processed_at: None,
            created_at: now,
            updated_at: now,
        };

        let payment = self.persist(&checkout.inscription, payment).await?;

        // A charge the gateway settled or refused on creation gets no webhook
        // worth waiting for.
        if payment.status != PaymentStatus::Pending {
            info!(
                payment_id = %payment.id,
                inscription_id = %inscription_id,
                status = %payment.status,
                "PIX charge not pending on creation"
            );
            self.drive_inscription(&payment).await?;
        }

        Ok(payment)
    }

    /// Card fields are validated before anything is read or charged. A card
    /// approved on the spot settles the inscription without waiting for a
    /// webhook; a declined card leaves the inscription pending for another attempt.
    pub async fn create_card_payment(
        &self,
        inscription_id: Uuid,
        customer_id: Uuid,
        card: CardDetails,
    ) -> Result<Payment, PaymentError> {
        let card = card.validate(self.clock.now())?;

        let checkout = self
            .checkout(inscription_id, customer_id, PaymentMethod::Card)
            .await?;

        let method = ChargeMethod::Card {
            brand: card.brand.to_string(),
            token: card.token.clone(),
            installments: card.installments,
        };
        let request = self.charge_request(&checkout, method);
        let charge = self.charge(&checkout.inscription, &request).await?;

        let now = self.clock.now();
        let status = map_gateway_status(&charge.status);
        let payment = Payment {
            id: Uuid::new_v4(),
            inscription_id,
            method: PaymentMethod::Card,
            external_id: charge.id,
            amount: checkout.inscription.amount_due,
            status,
            installments: Some(i32::from(card.installments)),
            expires_at: None,
            qr_code: None,
            qr_code_base64: None,
            ticket_url: None,
            notes: format!(
                "card payment {}x {} ending {}",
                card.installments, card.brand, card.last_four
            ),
            processed_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let payment = self.persist(&checkout.inscription, payment).await?;

        match status {
            PaymentStatus::Approved | PaymentStatus::Processing => {
                self.drive_inscription(&payment).await?;
            }
            PaymentStatus::Rejected | PaymentStatus::Cancelled => {
                info!(
                    payment_id = %payment.id,
                    inscription_id = %inscription_id,
                    status = %status,
                    "Card declined, inscription stays pending"
                );
            }
            _ => {}
        }

        Ok(payment)
    }

    pub async fn get_payment(&self, id: Uuid, customer_id: Uuid) -> Result<Payment, PaymentError> {
        let payment = self
            .store
            .get_payment(id)
            .await?
            .ok_or(PaymentError::NotFound(id))?;

        let inscription = self.inscriptions.get_inscription(payment.inscription_id).await?;
        if inscription.customer_id != customer_id {
            return Err(PaymentError::NotFound(id));
        }
        Ok(payment)
    }

    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        Ok(self.store.find_payment_by_external_id(external_id).await?)
    }

    /// Records a status observed at the gateway and carries the payment's
    /// status over to its inscription.
    ///
    /// Repeated statuses and moves out of a final status leave the payment
    /// alone. The inscription is still brought in line with it, so a
    /// redelivered notification repairs an inscription write that failed
    /// after the payment write landed.
    pub async fn record_gateway_status(
        &self,
        payment: &Payment,
        status: PaymentStatus,
        reason: &str,
    ) -> Result<PaymentUpdate, PaymentError> {
        if !payment.status.can_move_to(status) {
            self.resync_inscription(payment).await?;
            return Ok(PaymentUpdate::Unchanged(payment.clone()));
        }

        let now = self.clock.now();
        let update = self
            .store
            .transition_payment(payment.id, status, reason, now)
            .await?;

        if let PaymentUpdate::Applied { previous, payment } = &update {
            info!(
                payment_id = %payment.id,
                external_id = %payment.external_id,
                from = %previous,
                to = %payment.status,
                reason,
                "Payment status changed"
            );
            self.drive_inscription(payment).await?;
        }
        if let PaymentUpdate::Unchanged(payment) = &update {
            self.resync_inscription(payment).await?;
        }

        Ok(update)
    }

    /// Re-applies a payment's own status to its inscription.
    ///
    /// Pending payments have nothing to carry over, and neither does a payment
    /// superseded by a newer open one. A declined card on an inscription that
    /// is still pending stays declined without touching the inscription.
    pub(crate) async fn resync_inscription(&self, payment: &Payment) -> Result<(), PaymentError> {
        if payment.status == PaymentStatus::Pending {
            return Ok(());
        }

        if let Some(active) = self.store.find_active_payment(payment.inscription_id).await? {
            if active.id != payment.id {
                return Ok(());
            }
        }

        if payment.method == PaymentMethod::Card
            && matches!(payment.status, PaymentStatus::Rejected | PaymentStatus::Cancelled)
        {
            let inscription = self.inscriptions.get_inscription(payment.inscription_id).await?;
            if inscription.payment_status == PaymentStatus::Pending {
                return Ok(());
            }
        }

        self.drive_inscription(payment).await
    }

    /// Cancels PIX payments whose window has passed without settlement.
    ///
    /// The gateway is asked first: a charge that settled while its webhook was
    /// still in flight is recorded with the gateway's status instead.
    pub async fn expire_stale_pix_payments(&self) -> Result<ExpirySweep, PaymentError> {
        let now = self.clock.now();
        let stale = self.store.list_expired_pix(now).await?;
        let mut sweep = ExpirySweep {
            examined: stale.len(),
            ..Default::default()
        };

        for payment in stale {
            let observed = match self.query_gateway(&payment.external_id).await {
                Ok(charge) => map_gateway_status(&charge.status),
                Err(e) => {
                    warn!(
                        payment_id = %payment.id,
                        external_id = %payment.external_id,
                        error = %e,
                        "Gateway unavailable during expiry, cancelling"
                    );
                    PaymentStatus::Pending
                }
            };

            let (target, reason) = match observed {
                PaymentStatus::Pending => (PaymentStatus::Cancelled, "by PIX expiry"),
                other => (other, "by gateway status at PIX expiry"),
            };

            match self.record_gateway_status(&payment, target, reason).await {
                Ok(PaymentUpdate::Applied { .. }) if target == PaymentStatus::Cancelled => {
                    sweep.cancelled += 1;
                }
                Ok(PaymentUpdate::Applied { .. }) => sweep.settled_by_gateway += 1,
                Ok(PaymentUpdate::Unchanged(_)) => {}
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "Failed to expire PIX payment");
                }
            }
        }

        Ok(sweep)
    }

    pub(crate) async fn query_gateway(
        &self,
        external_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let gateway = &self.gateway;
        with_retry(&self.settings.retry, "get_payment", move || {
            gateway.get_payment(external_id)
        })
        .await
    }

    async fn checkout(
        &self,
        inscription_id: Uuid,
        customer_id: Uuid,
        method: PaymentMethod,
    ) -> Result<Checkout, PaymentError> {
        let inscription = self.inscriptions.get_inscription(inscription_id).await?;
        if inscription.customer_id != customer_id {
            return Err(PaymentError::Forbidden);
        }

        match inscription.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Approved => {
                return Err(PaymentError::NotPayable(
                    "payment already approved for this inscription".to_string(),
                ))
            }
            other => {
                return Err(PaymentError::NotPayable(format!(
                    "inscription is {other} and cannot be paid"
                )))
            }
        }

        if let Some(approved) = self.store.find_approved_payment(inscription_id).await? {
            warn!(
                payment_id = %approved.id,
                inscription_id = %inscription_id,
                "Inscription still pending behind an approved payment, settling it"
            );
            self.drive_inscription(&approved).await?;
            return Err(PaymentError::NotPayable(
                "payment already approved for this inscription".to_string(),
            ));
        }

        if let Some(active) = self.store.find_active_payment(inscription_id).await? {
            debug!(payment_id = %active.id, "Inscription already has an open payment");
            return Err(PaymentError::InProgress(inscription_id));
        }

        let excursion = self.ledger.get_excursion(inscription.excursion_id).await?;
        if !excursion.status.is_open() {
            return Err(PaymentError::NotPayable(format!(
                "excursion is {}",
                excursion.status
            )));
        }
        if excursion.has_departed(self.clock.now()) {
            return Err(PaymentError::NotPayable(
                "excursion has already departed".to_string(),
            ));
        }

        let accepted = match method {
            PaymentMethod::Pix => excursion.accepts_pix,
            PaymentMethod::Card => excursion.accepts_card,
        };
        if !accepted {
            return Err(PaymentError::MethodNotAccepted(method));
        }

        let customer = self.identity.resolve_customer(customer_id).await?;

        Ok(Checkout {
            inscription,
            excursion,
            customer,
        })
    }

    fn charge_request(&self, checkout: &Checkout, method: ChargeMethod) -> ChargeRequest {
        ChargeRequest {
            idempotency_key: Uuid::new_v4().to_string(),
            amount: checkout.inscription.amount_due,
            description: format!("Excursão: {}", checkout.excursion.title),
            method,
            payer: Payer {
                email: checkout.customer.email.clone(),
                first_name: checkout.customer.first_name().to_string(),
                document: checkout.customer.document.clone(),
            },
            external_reference: checkout.inscription.id.to_string(),
            notification_url: self.settings.notification_url.clone(),
        }
    }

    async fn charge(
        &self,
        inscription: &Inscription,
        request: &ChargeRequest,
    ) -> Result<GatewayPayment, PaymentError> {
        let gateway = &self.gateway;
        let result = with_retry(&self.settings.retry, "create_payment", move || {
            gateway.create_payment(request)
        })
        .await;

        match result {
            Ok(charge) => Ok(charge),
            Err(e) if e.is_transient() => {
                error!(
                    inscription_id = %inscription.id,
                    error = %e,
                    "Gateway unavailable after retries, releasing held seat"
                );
                self.abandon(inscription.id).await;
                Err(PaymentError::Gateway(e))
            }
            Err(e) => {
                warn!(inscription_id = %inscription.id, error = %e, "Gateway refused charge");
                Err(PaymentError::Gateway(e))
            }
        }
    }

    async fn persist(
        &self,
        inscription: &Inscription,
        payment: Payment,
    ) -> Result<Payment, PaymentError> {
        match self.store.insert_payment(&payment).await {
            Ok(()) => {
                info!(
                    payment_id = %payment.id,
                    inscription_id = %inscription.id,
                    external_id = %payment.external_id,
                    method = %payment.method,
                    status = %payment.status,
                    "Payment recorded"
                );
                Ok(payment)
            }
            Err(StoreError::ActivePaymentExists(id)) => {
                warn!(
                    inscription_id = %id,
                    external_id = %payment.external_id,
                    "Concurrent payment attempt lost the race; gateway charge left unrecorded"
                );
                Err(PaymentError::InProgress(id))
            }
            Err(StoreError::DuplicateExternalId(external_id)) => {
                error!(
                    alert = true,
                    external_id = %external_id,
                    inscription_id = %inscription.id,
                    "Gateway reused a payment id already recorded locally"
                );
                Err(StoreError::DuplicateExternalId(external_id).into())
            }
            Err(e) => {
                error!(
                    inscription_id = %inscription.id,
                    external_id = %payment.external_id,
                    error = %e,
                    "Payment not recorded, releasing held seat"
                );
                self.abandon(inscription.id).await;
                Err(e.into())
            }
        }
    }

    async fn drive_inscription(&self, payment: &Payment) -> Result<(), PaymentError> {
        match self
            .inscriptions
            .apply_payment_status(payment.inscription_id, payment.status)
            .await
        {
            Ok(_) | Err(InscriptionError::InvalidTransition { .. }) => Ok(()),
            Err(e) => {
                error!(
                    alert = true,
                    payment_id = %payment.id,
                    inscription_id = %payment.inscription_id,
                    error = %e,
                    "Payment moved but inscription was not updated"
                );
                Err(e.into())
            }
        }
    }

    async fn abandon(&self, inscription_id: Uuid) {
        if let Err(e) = self
            .inscriptions
            .apply_payment_status(inscription_id, PaymentStatus::Cancelled)
            .await
        {
            error!(
                alert = true,
                inscription_id = %inscription_id,
                error = %e,
                "Failed to cancel inscription after payment failure"
            );
        }
    }
}
