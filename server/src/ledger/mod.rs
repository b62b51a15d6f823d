//! Excursion ledger: seat occupancy and excursion lifecycle.
//!
//! The ledger is the only writer of `seats_occupied` and `status`. Each
//! operation becomes one [`ExcursionMutation`] evaluated by the store under a
//! row lock, so concurrent reservations on the same excursion are serialized
//! while different excursions never contend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::ExcursionCache;
use crate::clock::Clock;
use crate::models::{Excursion, ExcursionStatus, ExcursionUpdate, NewExcursion};
use crate::store::{ExcursionStore, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("excursion {0} not found")]
    NotFound(Uuid),

    #[error("excursion {0} has no seats left")]
    NoCapacity(Uuid),

    #[error("excursion {id} is not open for booking: {reason}")]
    NotBookable { id: Uuid, reason: String },

    #[error("cannot move excursion from {from} to {to}")]
    InvalidStatusChange {
        from: ExcursionStatus,
        to: ExcursionStatus,
    },

    #[error("cannot activate an excursion whose departure is in the past")]
    DepartureInPast,

    #[error("{0}")]
    Invalid(String),

    #[error("occupancy integrity violated on excursion {id}: {detail}")]
    Integrity { id: Uuid, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A single ledger write, evaluated against the locked excursion row.
#[derive(Debug, Clone)]
pub enum ExcursionMutation {
    Reserve,
    Release,
    ChangeStatus(ExcursionStatus),
    Update(ExcursionUpdate),
}

impl ExcursionMutation {
    pub fn apply(&self, excursion: &mut Excursion, now: DateTime<Utc>) -> Result<(), LedgerError> {
        match self {
            ExcursionMutation::Reserve => reserve(excursion, now)?,
            ExcursionMutation::Release => release(excursion)?,
            ExcursionMutation::ChangeStatus(to) => change_status(excursion, *to, now)?,
            ExcursionMutation::Update(update) => update_details(excursion, update)?,
        }
        excursion.updated_at = now;
        check_occupancy(excursion)
    }
}

fn reserve(excursion: &mut Excursion, now: DateTime<Utc>) -> Result<(), LedgerError> {
    match excursion.status {
        ExcursionStatus::Active => {}
        ExcursionStatus::Full => return Err(LedgerError::NoCapacity(excursion.id)),
        other => {
            return Err(LedgerError::NotBookable {
                id: excursion.id,
                reason: format!("status is {other}"),
            })
        }
    }

    if excursion.has_departed(now) {
        return Err(LedgerError::NotBookable {
            id: excursion.id,
            reason: "excursion has already departed".to_string(),
        });
    }

    if excursion.seats_occupied >= excursion.seats_total {
        return Err(LedgerError::NoCapacity(excursion.id));
    }

    excursion.seats_occupied += 1;
    if excursion.seats_occupied == excursion.seats_total {
        excursion.status = ExcursionStatus::Full;
    }
    Ok(())
}

fn release(excursion: &mut Excursion) -> Result<(), LedgerError> {
    if excursion.seats_occupied <= 0 {
        return Err(LedgerError::Integrity {
            id: excursion.id,
            detail: "release requested with no occupied seats".to_string(),
        });
    }

    excursion.seats_occupied -= 1;
    if excursion.status == ExcursionStatus::Full {
        excursion.status = ExcursionStatus::Active;
    }
    Ok(())
}

fn change_status(
    excursion: &mut Excursion,
    to: ExcursionStatus,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    use ExcursionStatus::*;

    let from = excursion.status;
    if from == to {
        return Ok(());
    }

    let allowed = matches!(
        (from, to),
        (Draft, Active) | (Draft, Cancelled) | (Active | Full, Cancelled | Finished)
    );
    if !allowed {
        return Err(LedgerError::InvalidStatusChange { from, to });
    }

    if to == Active {
        if excursion.has_departed(now) {
            return Err(LedgerError::DepartureInPast);
        }
        // A drafted excursion can only be full if it was already at capacity.
        excursion.status = if excursion.seats_occupied == excursion.seats_total {
            Full
        } else {
            Active
        };
        return Ok(());
    }

    excursion.status = to;
    Ok(())
}

fn update_details(excursion: &mut Excursion, update: &ExcursionUpdate) -> Result<(), LedgerError> {
    if excursion.status.is_closed() {
        return Err(LedgerError::Invalid(format!(
            "excursion is {} and can no longer be edited",
            excursion.status
        )));
    }

    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(LedgerError::Invalid("title must not be empty".to_string()));
        }
        excursion.title = title.trim().to_string();
    }

    if let Some(price) = update.price {
        validate_price(price)?;
        excursion.price = price;
    }

    if let Some(seats_total) = update.seats_total {
        if seats_total < excursion.seats_total {
            return Err(LedgerError::Invalid(format!(
                "seat total can only increase (currently {}, requested {})",
                excursion.seats_total, seats_total
            )));
        }
        excursion.seats_total = seats_total;
        if excursion.status == ExcursionStatus::Full
            && excursion.seats_occupied < excursion.seats_total
        {
            excursion.status = ExcursionStatus::Active;
        }
    }

    if let Some(accepts_pix) = update.accepts_pix {
        excursion.accepts_pix = accepts_pix;
    }
    if let Some(accepts_card) = update.accepts_card {
        excursion.accepts_card = accepts_card;
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), LedgerError> {
    if price <= Decimal::ZERO {
        return Err(LedgerError::Invalid("price must be positive".to_string()));
    }
    Ok(())
}

fn check_occupancy(excursion: &Excursion) -> Result<(), LedgerError> {
    if excursion.seats_occupied < 0 || excursion.seats_occupied > excursion.seats_total {
        return Err(LedgerError::Integrity {
            id: excursion.id,
            detail: format!(
                "occupied {} outside 0..={}",
                excursion.seats_occupied, excursion.seats_total
            ),
        });
    }
    Ok(())
}

/// A seat held on an excursion, with the terms it was held at.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub excursion_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub seats_occupied: i32,
    pub seats_total: i32,
    pub status: ExcursionStatus,
}

impl From<&Excursion> for Reservation {
    fn from(excursion: &Excursion) -> Self {
        Self {
            excursion_id: excursion.id,
            title: excursion.title.clone(),
            price: excursion.price,
            seats_occupied: excursion.seats_occupied,
            seats_total: excursion.seats_total,
            status: excursion.status,
        }
    }
}

pub struct ExcursionLedger {
    store: Arc<dyn ExcursionStore>,
    cache: ExcursionCache,
    clock: Arc<dyn Clock>,
}

impl ExcursionLedger {
    pub fn new(store: Arc<dyn ExcursionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: ExcursionCache::new(),
            clock,
        }
    }

    pub async fn create_excursion(
        &self,
        organizer_id: Uuid,
        input: NewExcursion,
    ) -> Result<Excursion, LedgerError> {
        let now = self.clock.now();

        if input.title.trim().is_empty() {
            return Err(LedgerError::Invalid("title must not be empty".to_string()));
        }
        if input.seats_total <= 0 {
            return Err(LedgerError::Invalid("seat total must be positive".to_string()));
        }
        validate_price(input.price)?;
        if input.departure_at <= now {
            return Err(LedgerError::DepartureInPast);
        }

        let excursion = Excursion {
            id: Uuid::new_v4(),
            organizer_id,
            title: input.title.trim().to_string(),
            seats_total: input.seats_total,
            seats_occupied: 0,
            departure_at: input.departure_at,
            price: input.price,
            accepts_pix: input.accepts_pix,
            accepts_card: input.accepts_card,
            status: ExcursionStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_excursion(&excursion).await?;

        info!(excursion_id = %excursion.id, organizer_id = %organizer_id, seats = excursion.seats_total, "Excursion created");
        Ok(excursion)
    }

    pub async fn get_excursion(&self, id: Uuid) -> Result<Excursion, LedgerError> {
        if let Some(excursion) = self.cache.get(&id) {
            return Ok(excursion);
        }

        let generation = self.cache.generation(&id);
        let excursion = self
            .store
            .get_excursion(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if !self.cache.put(excursion.clone(), generation) {
            debug!(excursion_id = %id, "Excursion changed during read, not caching");
        }
        Ok(excursion)
    }

    /// Claims one seat. Capacity exhaustion is reported as
    /// [`LedgerError::NoCapacity`], distinct from a missing or closed excursion.
    pub async fn reserve_seat(&self, id: Uuid) -> Result<Reservation, LedgerError> {
        let excursion = self.mutate(id, ExcursionMutation::Reserve).await?;

        debug!(
            excursion_id = %id,
            occupied = excursion.seats_occupied,
            total = excursion.seats_total,
            status = %excursion.status,
            "Seat reserved"
        );
        Ok(Reservation::from(&excursion))
    }

    pub async fn release_seat(&self, id: Uuid) -> Result<Excursion, LedgerError> {
        let excursion = self
            .mutate(id, ExcursionMutation::Release)
            .await
            .inspect_err(|e| {
                if matches!(e, LedgerError::Integrity { .. }) {
                    error!(alert = true, excursion_id = %id, error = %e, "Seat release violated occupancy");
                }
            })?;

        debug!(
            excursion_id = %id,
            occupied = excursion.seats_occupied,
            total = excursion.seats_total,
            status = %excursion.status,
            "Seat released"
        );
        Ok(excursion)
    }

    pub async fn change_status(
        &self,
        id: Uuid,
        status: ExcursionStatus,
    ) -> Result<Excursion, LedgerError> {
        let excursion = self.mutate(id, ExcursionMutation::ChangeStatus(status)).await?;
        info!(excursion_id = %id, status = %excursion.status, "Excursion status changed");
        Ok(excursion)
    }

    pub async fn update_excursion(
        &self,
        id: Uuid,
        update: ExcursionUpdate,
    ) -> Result<Excursion, LedgerError> {
        let excursion = self.mutate(id, ExcursionMutation::Update(update)).await?;
        info!(excursion_id = %id, "Excursion updated");
        Ok(excursion)
    }

    async fn mutate(
        &self,
        id: Uuid,
        mutation: ExcursionMutation,
    ) -> Result<Excursion, LedgerError> {
        let now = self.clock.now();
        let result = self.store.modify_excursion(id, &mutation, now).await;
        self.cache.invalidate(&id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn excursion(total: i32, occupied: i32, status: ExcursionStatus) -> Excursion {
        let now = Utc::now();
        Excursion {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Chapada Diamantina".to_string(),
            seats_total: total,
            seats_occupied: occupied,
            departure_at: now + Duration::days(10),
            price: Decimal::new(35000, 2),
            accepts_pix: true,
            accepts_card: true,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reserving_last_seat_marks_full() {
        let mut trip = excursion(2, 1, ExcursionStatus::Active);
        ExcursionMutation::Reserve.apply(&mut trip, Utc::now()).unwrap();

        assert_eq!(trip.seats_occupied, 2);
        assert_eq!(trip.status, ExcursionStatus::Full);
    }

    #[test]
    fn test_full_excursion_reports_no_capacity() {
        let mut trip = excursion(1, 1, ExcursionStatus::Full);
        let err = ExcursionMutation::Reserve.apply(&mut trip, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::NoCapacity(_)));
    }

    #[test]
    fn test_draft_excursion_is_not_bookable() {
        let mut trip = excursion(10, 0, ExcursionStatus::Draft);
        let err = ExcursionMutation::Reserve.apply(&mut trip, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::NotBookable { .. }));
        assert_eq!(trip.seats_occupied, 0);
    }

    #[test]
    fn test_departed_excursion_is_not_bookable() {
        let mut trip = excursion(10, 0, ExcursionStatus::Active);
        let later = trip.departure_at + Duration::hours(1);
        let err = ExcursionMutation::Reserve.apply(&mut trip, later).unwrap_err();
        assert!(matches!(err, LedgerError::NotBookable { .. }));
    }

    #[test]
    fn test_release_reopens_full_excursion() {
        let mut trip = excursion(3, 3, ExcursionStatus::Full);
        ExcursionMutation::Release.apply(&mut trip, Utc::now()).unwrap();

        assert_eq!(trip.seats_occupied, 2);
        assert_eq!(trip.status, ExcursionStatus::Active);
    }

    #[test]
    fn test_release_on_empty_excursion_is_integrity_violation() {
        let mut trip = excursion(3, 0, ExcursionStatus::Active);
        let err = ExcursionMutation::Release.apply(&mut trip, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Integrity { .. }));
    }

    #[test]
    fn test_activation_rejected_after_departure() {
        let mut trip = excursion(3, 0, ExcursionStatus::Draft);
        trip.departure_at = Utc::now() - Duration::days(1);
        let err = ExcursionMutation::ChangeStatus(ExcursionStatus::Active)
            .apply(&mut trip, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::DepartureInPast));
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let mut trip = excursion(3, 0, ExcursionStatus::Cancelled);
        let err = ExcursionMutation::ChangeStatus(ExcursionStatus::Active)
            .apply(&mut trip, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatusChange { .. }));

        let mut trip = excursion(3, 1, ExcursionStatus::Active);
        let err = ExcursionMutation::ChangeStatus(ExcursionStatus::Draft)
            .apply(&mut trip, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatusChange { .. }));
    }

    #[test]
    fn test_full_cannot_be_set_by_organizer() {
        let mut trip = excursion(3, 1, ExcursionStatus::Active);
        assert!(ExcursionMutation::ChangeStatus(ExcursionStatus::Full)
            .apply(&mut trip, Utc::now())
            .is_err());
    }

    #[test]
    fn test_seat_total_only_grows() {
        let mut trip = excursion(4, 4, ExcursionStatus::Full);
        let shrink = ExcursionUpdate {
            seats_total: Some(3),
            ..Default::default()
        };
        assert!(ExcursionMutation::Update(shrink).apply(&mut trip, Utc::now()).is_err());

        let grow = ExcursionUpdate {
            seats_total: Some(6),
            ..Default::default()
        };
        ExcursionMutation::Update(grow).apply(&mut trip, Utc::now()).unwrap();
        assert_eq!(trip.seats_total, 6);
        assert_eq!(trip.status, ExcursionStatus::Active);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve,
        Release,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Reserve), Just(Op::Release)]
    }

    proptest! {
        #[test]
        fn occupancy_stays_within_bounds(total in 1i32..20, ops in proptest::collection::vec(op(), 0..200)) {
            let mut trip = excursion(total, 0, ExcursionStatus::Active);
            let now = Utc::now();

            for op in ops {
                let mut next = trip.clone();
                let mutation = match op {
                    Op::Reserve => ExcursionMutation::Reserve,
                    Op::Release => ExcursionMutation::Release,
                };
                if mutation.apply(&mut next, now).is_ok() {
                    trip = next;
                }

                prop_assert!(trip.seats_occupied >= 0);
                prop_assert!(trip.seats_occupied <= trip.seats_total);
                prop_assert_eq!(
                    trip.status == ExcursionStatus::Full,
                    trip.seats_occupied == trip.seats_total
                );
            }
        }
    }

    struct SlowReads {
        inner: Arc<crate::store::MemoryStore>,
    }

    #[async_trait::async_trait]
    impl ExcursionStore for SlowReads {
        async fn insert_excursion(&self, excursion: &Excursion) -> Result<(), StoreError> {
            self.inner.insert_excursion(excursion).await
        }

        async fn get_excursion(&self, id: Uuid) -> Result<Option<Excursion>, StoreError> {
            let row = self.inner.get_excursion(id).await;
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            row
        }

        async fn modify_excursion(
            &self,
            id: Uuid,
            mutation: &ExcursionMutation,
            now: DateTime<Utc>,
        ) -> Result<Excursion, LedgerError> {
            self.inner.modify_excursion(id, mutation, now).await
        }
    }

    #[tokio::test]
    async fn test_read_overlapping_a_status_change_is_not_cached() {
        let ledger = Arc::new(ExcursionLedger::new(
            Arc::new(SlowReads {
                inner: Arc::new(crate::store::MemoryStore::new()),
            }),
            Arc::new(crate::clock::SystemClock),
        ));
        let draft = ledger
            .create_excursion(
                Uuid::new_v4(),
                NewExcursion {
                    title: "Lençóis Maranhenses".to_string(),
                    seats_total: 12,
                    departure_at: Utc::now() + Duration::days(20),
                    price: Decimal::new(48000, 2),
                    accepts_pix: true,
                    accepts_card: true,
                },
            )
            .await
            .unwrap();
        let id = ledger
            .change_status(draft.id, ExcursionStatus::Active)
            .await
            .unwrap()
            .id;

        let reader = Arc::clone(&ledger);
        let slow_read = tokio::spawn(async move { reader.get_excursion(id).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ledger
            .change_status(id, ExcursionStatus::Cancelled)
            .await
            .unwrap();

        let seen = slow_read.await.unwrap().unwrap();
        assert_eq!(seen.status, ExcursionStatus::Active);
        assert_eq!(
            ledger.get_excursion(id).await.unwrap().status,
            ExcursionStatus::Cancelled
        );
    }
}
