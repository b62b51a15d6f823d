//! Side-effect dispatch for booking and payment events.
//!
//! Producers enqueue without waiting; a single dispatcher task drains the queue
//! and hands each event to a [`Notifier`]. A full queue drops the event with a
//! warning rather than stalling the booking or webhook path.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    InscriptionCreated {
        inscription_id: Uuid,
        customer_id: Uuid,
        excursion_id: Uuid,
        excursion_title: String,
        amount_due: Decimal,
    },
    PaymentApproved {
        inscription_id: Uuid,
        customer_id: Uuid,
        excursion_id: Uuid,
        amount: Decimal,
    },
    SeatReleased {
        inscription_id: Uuid,
        customer_id: Uuid,
        excursion_id: Uuid,
        status: PaymentStatus,
    },
}

impl Notification {
    pub fn customer_id(&self) -> Uuid {
        match self {
            Notification::InscriptionCreated { customer_id, .. }
            | Notification::PaymentApproved { customer_id, .. }
            | Notification::SeatReleased { customer_id, .. } => *customer_id,
        }
    }
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Email and push delivery plug in here.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification).map_err(|e| NotifyError(e.to_string()))?;
        info!(customer_id = %notification.customer_id(), payload = %payload, "Notification dispatched");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!(error = %e, "Notification queue rejected event");
        }
    }
}

/// Drains the queue until every sender is gone.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Err(e) = notifier.deliver(&notification).await {
                warn!(customer_id = %notification.customer_id(), error = %e, "Notification not delivered");
            }
        }
        info!("Notification dispatcher stopped");
    })
}
