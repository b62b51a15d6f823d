//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::clock::Clock;
use crate::gateway::PaymentGateway;
use crate::identity::IdentityProvider;
use crate::inscriptions::InscriptionManager;
use crate::ledger::ExcursionLedger;
use crate::notifications::NotificationQueue;
use crate::payments::{PaymentOrchestrator, PaymentSettings};
use crate::store::Stores;
use crate::webhooks::WebhookReconciler;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<ExcursionLedger>,
    pub inscriptions: Arc<InscriptionManager>,
    pub payments: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookReconciler>,
}

impl AppState {
    /// Wires the four core components on top of one set of stores.
    pub fn assemble(
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
        notifications: NotificationQueue,
        clock: Arc<dyn Clock>,
        settings: PaymentSettings,
    ) -> Self {
        let ledger = Arc::new(ExcursionLedger::new(stores.excursions, clock.clone()));

        let inscriptions = Arc::new(InscriptionManager::new(
            ledger.clone(),
            stores.inscriptions,
            identity.clone(),
            notifications,
            clock.clone(),
        ));

        let payments = Arc::new(PaymentOrchestrator::new(
            inscriptions.clone(),
            ledger.clone(),
            stores.payments,
            gateway,
            identity,
            clock,
            settings,
        ));

        let webhooks = Arc::new(WebhookReconciler::new(payments.clone()));

        Self {
            ledger,
            inscriptions,
            payments,
            webhooks,
        }
    }
}
