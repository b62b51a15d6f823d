//! Webhook reconciler: turns gateway notifications into local state changes.
//!
//! The notification body is only used to find out *which* payment changed. The
//! status is always read back from the gateway, and the write goes through the
//! same guarded transition as every other status change. Notifications for the
//! same payment are processed one at a time.

mod notification;

pub use notification::{extract_payment_id, extract_payment_id_from_query};

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::gateway::map_gateway_status;
use crate::models::PaymentStatus;
use crate::payments::PaymentOrchestrator;
use crate::store::PaymentUpdate;

/// What happened to one notification. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Ack {
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    Unchanged {
        status: PaymentStatus,
    },
    UnknownPayment,
    /// Processing failed on our side. A later delivery for the payment, or the
    /// next payment attempt on its inscription, brings the inscription in line.
    Failed,
}

pub struct WebhookReconciler {
    payments: Arc<PaymentOrchestrator>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl WebhookReconciler {
    pub fn new(payments: Arc<PaymentOrchestrator>) -> Self {
        Self {
            payments,
            in_flight: DashMap::new(),
        }
    }

    /// Reconciles one gateway payment. Never fails: anomalies are logged and
    /// folded into the returned [`Ack`].
    pub async fn handle_webhook(&self, external_id: &str) -> Ack {
        let lock = self
            .in_flight
            .entry(external_id.to_string())
            .or_default()
            .clone();

        let ack = {
            let _guard = lock.lock().await;
            self.reconcile(external_id).await
        };

        drop(lock);
        self.in_flight
            .remove_if(external_id, |_, lock| Arc::strong_count(lock) == 1);

        ack
    }

    async fn reconcile(&self, external_id: &str) -> Ack {
        let payment = match self.payments.find_by_external_id(external_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(external_id, "Webhook for unknown payment, acknowledging");
                return Ack::UnknownPayment;
            }
            Err(e) => {
                error!(external_id, error = %e, "Failed to load payment for webhook");
                return Ack::Failed;
            }
        };

        if payment.status.is_terminal() && payment.status != PaymentStatus::Approved {
            debug!(
                external_id,
                status = %payment.status,
                "Payment already final, skipping gateway query"
            );
            if let Err(e) = self.payments.resync_inscription(&payment).await {
                error!(external_id, error = %e, "Failed to bring inscription in line with final payment");
                return Ack::Failed;
            }
            return Ack::Unchanged {
                status: payment.status,
            };
        }

        let charge = match self.payments.query_gateway(external_id).await {
            Ok(charge) => charge,
            Err(e) => {
                warn!(external_id, error = %e, "Gateway query failed during reconciliation");
                return Ack::Failed;
            }
        };
        let observed = map_gateway_status(&charge.status);

        match self
            .payments
            .record_gateway_status(&payment, observed, "via webhook")
            .await
        {
            Ok(PaymentUpdate::Applied { previous, payment }) => {
                info!(
                    external_id,
                    inscription_id = %payment.inscription_id,
                    from = %previous,
                    to = %payment.status,
                    "Webhook reconciled"
                );
                Ack::Applied {
                    from: previous,
                    to: payment.status,
                }
            }
            Ok(PaymentUpdate::Unchanged(payment)) => {
                debug!(
                    external_id,
                    status = %payment.status,
                    gateway_status = %charge.status,
                    "Webhook brought no change"
                );
                Ack::Unchanged {
                    status: payment.status,
                }
            }
            Err(e) => {
                error!(external_id, error = %e, "Failed to apply webhook status");
                Ack::Failed
            }
        }
    }

    #[cfg(test)]
    fn tracked_payments(&self) -> usize {
        self.in_flight.len()
    }
}
