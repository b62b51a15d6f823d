//! In-process gateway for development and tests.
//!
//! Charges are kept in memory. PIX charges start `pending` unless told
//! otherwise; card charges answer with a configurable status. Statuses can be changed afterwards to play the
//! part of the gateway settling a payment, and transient failures can be
//! injected.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::info;

use super::{ChargeMethod, ChargeRequest, GatewayError, GatewayPayment, PaymentGateway};

#[derive(Debug)]
pub struct MockGateway {
    payments: DashMap<String, GatewayPayment>,
    idempotency: DashMap<String, String>,
    next_id: AtomicU64,
    pix_status: RwLock<String>,
    card_status: RwLock<String>,
    failures_remaining: AtomicUsize,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            payments: DashMap::new(),
            idempotency: DashMap::new(),
            next_id: AtomicU64::new(1_000_000),
            pix_status: RwLock::new("pending".to_string()),
            card_status: RwLock::new("approved".to_string()),
            failures_remaining: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Status returned for new PIX charges.
    pub fn set_pix_status(&self, status: &str) {
        if let Ok(mut current) = self.pix_status.write() {
            *current = status.to_string();
        }
    }

    /// Status returned for new card charges.
    pub fn set_card_status(&self, status: &str) {
        if let Ok(mut current) = self.card_status.write() {
            *current = status.to_string();
        }
    }

    /// Settles (or otherwise moves) a charge on the gateway side.
    pub fn set_status(&self, external_id: &str, status: &str) {
        if let Some(mut payment) = self.payments.get_mut(external_id) {
            payment.status = status.to_string();
        }
    }

    /// The next `count` calls fail with a timeout.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn simulate_network(&self) -> Result<(), GatewayError> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(GatewayError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network()?;

        if let Some(existing) = self.idempotency.get(&request.idempotency_key) {
            if let Some(payment) = self.payments.get(existing.value()) {
                return Ok(payment.clone());
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let payment = match &request.method {
            ChargeMethod::Pix => GatewayPayment {
                id: id.clone(),
                status: self
                    .pix_status
                    .read()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "pending".to_string()),
                status_detail: Some("pending_waiting_transfer".to_string()),
                qr_code: Some(format!("00020126580014br.gov.bcb.pix{id}")),
                qr_code_base64: Some("iVBORw0KGgoAAAANSUhEUg==".to_string()),
                ticket_url: Some(format!("https://gateway.invalid/payments/{id}/ticket")),
            },
            ChargeMethod::Card { .. } => GatewayPayment {
                id: id.clone(),
                status: self
                    .card_status
                    .read()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "approved".to_string()),
                status_detail: None,
                qr_code: None,
                qr_code_base64: None,
                ticket_url: None,
            },
        };

        self.idempotency
            .insert(request.idempotency_key.clone(), id.clone());
        self.payments.insert(id.clone(), payment.clone());
        info!(external_id = %id, status = %payment.status, "Mock gateway charge created");
        Ok(payment)
    }

    async fn get_payment(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network()?;

        self.payments
            .get(external_id)
            .map(|p| p.clone())
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: format!("payment {external_id} not found"),
            })
    }
}
