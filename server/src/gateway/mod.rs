//! Payment gateway client seam.
//!
//! The gateway is the source of truth for settlement. The core creates charges
//! through it, re-queries it on every webhook, and translates its status
//! vocabulary with [`map_gateway_status`].

mod mercadopago;
pub mod mock;
mod retry;

pub use mercadopago::MercadoPagoGateway;
pub use mock::MockGateway;
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::models::PaymentStatus;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Network failures, timeouts, throttling and 5xx answers are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout => true,
            GatewayError::Transport(e) => !e.is_decode() && !e.is_builder(),
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payer {
    pub email: String,
    pub first_name: String,
    pub document: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeMethod {
    Pix,
    Card {
        brand: String,
        token: String,
        installments: u8,
    },
}

/// A charge request as the core sees it; each gateway adapter maps it to its wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Stable across retries of the same attempt so the gateway can deduplicate.
    pub idempotency_key: String,
    pub amount: Decimal,
    pub description: String,
    pub method: ChargeMethod,
    pub payer: Payer,
    pub external_reference: String,
    pub notification_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError>;

    async fn get_payment(&self, external_id: &str) -> Result<GatewayPayment, GatewayError>;
}

/// Translates gateway status strings. Unknown values are logged and held as
/// pending so the event is never dropped.
pub fn map_gateway_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "approved" => PaymentStatus::Approved,
        "pending" => PaymentStatus::Pending,
        "in_process" => PaymentStatus::Processing,
        "rejected" => PaymentStatus::Rejected,
        "cancelled" => PaymentStatus::Cancelled,
        "refunded" => PaymentStatus::Refunded,
        "charged_back" => PaymentStatus::Cancelled,
        other => {
            warn!(gateway_status = %other, "Unknown gateway payment status, treating as pending");
            PaymentStatus::Pending
        }
    }
}
