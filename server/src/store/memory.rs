use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ExcursionStore, InscriptionStore, PaymentStore, PaymentUpdate, StoreError};
use crate::inscriptions::{plan_transition, InscriptionError, StatusChange, TransitionPlan};
use crate::ledger::{ExcursionMutation, LedgerError};
use crate::models::{Excursion, Inscription, Payment, PaymentMethod, PaymentStatus};

/// Process-local backend. A `get_mut` on a DashMap entry holds that entry's
/// shard write lock, which stands in for the row lock of the SQL backend.
///
/// Index maps are never locked while another map's lock is held on the insert
/// paths, so lock order is always record map first, then index map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    excursions: DashMap<Uuid, Excursion>,
    inscriptions: DashMap<Uuid, Inscription>,
    /// (customer, excursion) -> the inscription currently holding that slot
    live_pairs: DashMap<(Uuid, Uuid), Uuid>,
    payments: DashMap<Uuid, Payment>,
    by_external_id: DashMap<String, Uuid>,
    /// inscription -> its PENDING or PROCESSING payment
    active_payments: DashMap<Uuid, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExcursionStore for MemoryStore {
    async fn insert_excursion(&self, excursion: &Excursion) -> Result<(), StoreError> {
        self.excursions.insert(excursion.id, excursion.clone());
        Ok(())
    }

    async fn get_excursion(&self, id: Uuid) -> Result<Option<Excursion>, StoreError> {
        Ok(self.excursions.get(&id).map(|e| e.value().clone()))
    }

    async fn modify_excursion(
        &self,
        id: Uuid,
        mutation: &ExcursionMutation,
        now: DateTime<Utc>,
    ) -> Result<Excursion, LedgerError> {
        let mut entry = self
            .excursions
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;

        let mut next = entry.value().clone();
        mutation.apply(&mut next, now)?;
        *entry = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl InscriptionStore for MemoryStore {
    async fn insert_inscription(&self, inscription: &Inscription) -> Result<(), StoreError> {
        match self
            .live_pairs
            .entry((inscription.customer_id, inscription.excursion_id))
        {
            Entry::Occupied(_) => return Err(StoreError::DuplicateInscription),
            Entry::Vacant(slot) => {
                slot.insert(inscription.id);
            }
        }

        self.inscriptions.insert(inscription.id, inscription.clone());
        Ok(())
    }

    async fn get_inscription(&self, id: Uuid) -> Result<Option<Inscription>, StoreError> {
        Ok(self.inscriptions.get(&id).map(|i| i.value().clone()))
    }

    async fn list_inscriptions_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Inscription>, StoreError> {
        let mut found: Vec<Inscription> = self
            .inscriptions
            .iter()
            .filter(|i| i.customer_id == customer_id)
            .map(|i| i.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn transition_inscription(
        &self,
        id: Uuid,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InscriptionError> {
        let mut entry = self
            .inscriptions
            .get_mut(&id)
            .ok_or(InscriptionError::NotFound(id))?;

        let previous = entry.payment_status;
        let plan = plan_transition(previous, to)?;
        if let TransitionPlan::Apply(_) = plan {
            entry.payment_status = to;
            entry.updated_at = now;
        }
        let inscription = entry.value().clone();
        drop(entry);

        if !inscription.holds_booking_slot() {
            self.live_pairs.remove_if(
                &(inscription.customer_id, inscription.excursion_id),
                |_, holder| *holder == id,
            );
        }

        Ok(StatusChange {
            inscription,
            previous,
            plan,
        })
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let active = !payment.status.is_terminal();
        if active {
            match self.active_payments.entry(payment.inscription_id) {
                Entry::Occupied(_) => {
                    return Err(StoreError::ActivePaymentExists(payment.inscription_id))
                }
                Entry::Vacant(slot) => {
                    slot.insert(payment.id);
                }
            }
        }

        let duplicate = match self.by_external_id.entry(payment.external_id.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(payment.id);
                false
            }
        };
        if duplicate {
            if active {
                self.active_payments
                    .remove_if(&payment.inscription_id, |_, holder| *holder == payment.id);
            }
            return Err(StoreError::DuplicateExternalId(payment.external_id.clone()));
        }

        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.get(&id).map(|p| p.value().clone()))
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let id = match self.by_external_id.get(external_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_payment(id).await
    }

    async fn find_active_payment(
        &self,
        inscription_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let id = match self.active_payments.get(&inscription_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_payment(id).await
    }

    async fn find_approved_payment(
        &self,
        inscription_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .payments
            .iter()
            .filter(|p| p.inscription_id == inscription_id && p.status == PaymentStatus::Approved)
            .max_by_key(|p| p.created_at)
            .map(|p| p.value().clone()))
    }

    async fn list_expired_pix(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, StoreError> {
        let mut expired: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| {
                p.method == PaymentMethod::Pix
                    && p.status == PaymentStatus::Pending
                    && p.is_expired(now)
            })
            .map(|p| p.value().clone())
            .collect();
        expired.sort_by_key(|p| p.expires_at);
        Ok(expired)
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentUpdate, StoreError> {
        let mut entry = self.payments.get_mut(&id).ok_or_else(|| StoreError::Missing {
            entity: "payment",
            id: id.to_string(),
        })?;

        let previous = entry.status;
        if !entry.advance(to, reason, now) {
            return Ok(PaymentUpdate::Unchanged(entry.value().clone()));
        }
        let payment = entry.value().clone();
        drop(entry);

        if payment.status.is_terminal() {
            self.active_payments
                .remove_if(&payment.inscription_id, |_, holder| *holder == id);
        }

        Ok(PaymentUpdate::Applied { previous, payment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExcursionStatus;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn excursion(total: i32) -> Excursion {
        let now = Utc::now();
        Excursion {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Lençóis Maranhenses".to_string(),
            seats_total: total,
            seats_occupied: 0,
            departure_at: now + Duration::days(5),
            price: Decimal::new(48000, 2),
            accepts_pix: true,
            accepts_card: true,
            status: ExcursionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn inscription(customer_id: Uuid, excursion_id: Uuid) -> Inscription {
        let now = Utc::now();
        Inscription {
            id: Uuid::new_v4(),
            excursion_id,
            customer_id,
            amount_due: Decimal::new(48000, 2),
            payment_status: PaymentStatus::Pending,
            customer_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn pix(inscription_id: Uuid, external_id: &str, expires_at: DateTime<Utc>) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            inscription_id,
            method: PaymentMethod::Pix,
            external_id: external_id.to_string(),
            amount: Decimal::new(48000, 2),
            status: PaymentStatus::Pending,
            installments: None,
            expires_at: Some(expires_at),
            qr_code: None,
            qr_code_base64: None,
            ticket_url: None,
            notes: "PIX payment created".to_string(),
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_row_untouched() {
        let store = MemoryStore::new();
        let mut full = excursion(1);
        full.seats_occupied = 1;
        full.status = ExcursionStatus::Full;
        store.insert_excursion(&full).await.unwrap();

        let err = store
            .modify_excursion(full.id, &ExcursionMutation::Reserve, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoCapacity(_)));

        let stored = store.get_excursion(full.id).await.unwrap().unwrap();
        assert_eq!(stored, full);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let trip = excursion(5);
        store.insert_excursion(&trip).await.unwrap();
        let id = trip.id;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .modify_excursion(id, &ExcursionMutation::Reserve, Utc::now())
                    .await
                    .is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        let stored = store.get_excursion(trip.id).await.unwrap().unwrap();
        assert_eq!(granted, 5);
        assert_eq!(stored.seats_occupied, 5);
        assert_eq!(stored.status, ExcursionStatus::Full);
    }

    #[tokio::test]
    async fn test_cancelled_inscription_frees_the_pair() {
        let store = MemoryStore::new();
        let (customer, trip) = (Uuid::new_v4(), Uuid::new_v4());
        let first = inscription(customer, trip);
        store.insert_inscription(&first).await.unwrap();

        assert!(matches!(
            store.insert_inscription(&inscription(customer, trip)).await,
            Err(StoreError::DuplicateInscription)
        ));

        store
            .transition_inscription(first.id, PaymentStatus::Cancelled, Utc::now())
            .await
            .unwrap();
        store
            .insert_inscription(&inscription(customer, trip))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_inscription_keeps_the_pair() {
        let store = MemoryStore::new();
        let (customer, trip) = (Uuid::new_v4(), Uuid::new_v4());
        let first = inscription(customer, trip);
        store.insert_inscription(&first).await.unwrap();
        store
            .transition_inscription(first.id, PaymentStatus::Rejected, Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            store.insert_inscription(&inscription(customer, trip)).await,
            Err(StoreError::DuplicateInscription)
        ));
    }

    #[tokio::test]
    async fn test_one_active_payment_per_inscription() {
        let store = MemoryStore::new();
        let inscription_id = Uuid::new_v4();
        let later = Utc::now() + Duration::minutes(30);
        let first = pix(inscription_id, "100", later);
        store.insert_payment(&first).await.unwrap();

        assert!(matches!(
            store.insert_payment(&pix(inscription_id, "101", later)).await,
            Err(StoreError::ActivePaymentExists(_))
        ));

        store
            .transition_payment(first.id, PaymentStatus::Rejected, "via webhook", Utc::now())
            .await
            .unwrap();
        store
            .insert_payment(&pix(inscription_id, "101", later))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_refused() {
        let store = MemoryStore::new();
        let later = Utc::now() + Duration::minutes(30);
        store
            .insert_payment(&pix(Uuid::new_v4(), "200", later))
            .await
            .unwrap();

        let other_inscription = Uuid::new_v4();
        assert!(matches!(
            store.insert_payment(&pix(other_inscription, "200", later)).await,
            Err(StoreError::DuplicateExternalId(id)) if id == "200"
        ));
        assert!(store
            .find_active_payment(other_inscription)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_pix_listing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stale = pix(Uuid::new_v4(), "300", now - Duration::minutes(1));
        let fresh = pix(Uuid::new_v4(), "301", now + Duration::minutes(10));
        store.insert_payment(&stale).await.unwrap();
        store.insert_payment(&fresh).await.unwrap();

        let expired = store.list_expired_pix(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_payment_transition_is_idempotent() {
        let store = MemoryStore::new();
        let payment = pix(Uuid::new_v4(), "400", Utc::now() + Duration::minutes(30));
        store.insert_payment(&payment).await.unwrap();

        let first = store
            .transition_payment(payment.id, PaymentStatus::Approved, "via webhook", Utc::now())
            .await
            .unwrap();
        let second = store
            .transition_payment(payment.id, PaymentStatus::Approved, "via webhook", Utc::now())
            .await
            .unwrap();

        assert!(matches!(first, PaymentUpdate::Applied { previous: PaymentStatus::Pending, .. }));
        assert!(matches!(second, PaymentUpdate::Unchanged(p) if p.status == PaymentStatus::Approved));
    }
}
