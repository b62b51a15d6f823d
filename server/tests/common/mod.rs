#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use tourapp_server::clock::ManualClock;
use tourapp_server::gateway::{MockGateway, RetryPolicy};
use tourapp_server::identity::InMemoryDirectory;
use tourapp_server::models::{Customer, Excursion, ExcursionStatus, NewExcursion};
use tourapp_server::notifications::{Notification, NotificationQueue};
use tourapp_server::payments::{CardDetails, PaymentSettings};
use tourapp_server::state::AppState;
use tourapp_server::store::Stores;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub directory: Arc<InMemoryDirectory>,
    pub clock: Arc<ManualClock>,
    pub notifications: mpsc::Receiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    pub fn with_stores(stores: Stores) -> Self {
        let gateway = Arc::new(MockGateway::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (queue, notifications) = NotificationQueue::channel(64);

        let settings = PaymentSettings {
            pix_expiry: Duration::minutes(30),
            notification_url: "http://localhost:3001/webhook/mercadopago".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: std::time::Duration::from_millis(1),
                call_timeout: std::time::Duration::from_secs(2),
            },
        };

        let state = AppState::assemble(
            stores,
            gateway.clone(),
            directory.clone(),
            queue,
            clock.clone(),
            settings,
        );

        Self {
            state,
            gateway,
            directory,
            clock,
            notifications,
        }
    }

    pub fn customer(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        self.directory.register(Customer::new(id, name, email));
        id
    }

    pub async fn excursion(&self, seats: i32) -> Excursion {
        self.excursion_with(seats, true, true).await
    }

    pub async fn excursion_with(&self, seats: i32, accepts_pix: bool, accepts_card: bool) -> Excursion {
        let ledger = &self.state.ledger;
        let draft = ledger
            .create_excursion(
                Uuid::new_v4(),
                NewExcursion {
                    title: "Serra da Canastra".to_string(),
                    seats_total: seats,
                    departure_at: start_time() + Duration::days(10),
                    price: Decimal::new(25000, 2),
                    accepts_pix,
                    accepts_card,
                },
            )
            .await
            .unwrap();
        let active = ledger
            .change_status(draft.id, ExcursionStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, ExcursionStatus::Active);
        active
    }

    pub async fn occupancy(&self, excursion_id: Uuid) -> (i32, ExcursionStatus) {
        let excursion = self.state.ledger.get_excursion(excursion_id).await.unwrap();
        (excursion.seats_occupied, excursion.status)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            seen.push(n);
        }
        seen
    }
}

pub fn valid_card() -> CardDetails {
    CardDetails {
        holder_name: "ANA SOUZA".to_string(),
        number: "4235 6477 2802 5682".to_string(),
        expiry_month: 11,
        expiry_year: 2030,
        cvv: "123".to_string(),
        installments: 2,
        token: "card-token-1".to_string(),
    }
}
