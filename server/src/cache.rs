//! Read-through cache for excursion lookups.
//!
//! Every entry carries a generation that the ledger bumps on each excursion
//! mutation. A reader takes the generation before going to the store and may
//! only fill the slot if it is unchanged, so a row read before a mutation
//! committed can never be cached after it. Seat reservation never reads from here.

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::Excursion;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    excursion: Option<Excursion>,
}

#[derive(Debug, Default)]
pub struct ExcursionCache {
    entries: DashMap<Uuid, Slot>,
}

impl ExcursionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Excursion> {
        self.entries
            .get(id)
            .and_then(|slot| slot.excursion.clone())
    }

    /// Generation to hand back to [`ExcursionCache::put`] after a store read.
    pub fn generation(&self, id: &Uuid) -> u64 {
        self.entries.get(id).map_or(0, |slot| slot.generation)
    }

    /// Caches `excursion` unless the entry was invalidated since `generation`
    /// was taken. Returns whether the row was kept.
    pub fn put(&self, excursion: Excursion, generation: u64) -> bool {
        let mut slot = self.entries.entry(excursion.id).or_default();
        if slot.generation != generation {
            return false;
        }
        slot.excursion = Some(excursion);
        true
    }

    pub fn invalidate(&self, id: &Uuid) {
        let mut slot = self.entries.entry(*id).or_default();
        slot.generation += 1;
        slot.excursion = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExcursionStatus;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn excursion() -> Excursion {
        let now = Utc::now();
        Excursion {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Ilha do Mel".to_string(),
            seats_total: 10,
            seats_occupied: 0,
            departure_at: now,
            price: Decimal::new(12000, 2),
            accepts_pix: true,
            accepts_card: false,
            status: ExcursionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let excursion = excursion();
        let cache = ExcursionCache::new();
        assert!(cache.put(excursion.clone(), cache.generation(&excursion.id)));
        assert_eq!(cache.get(&excursion.id), Some(excursion.clone()));

        cache.invalidate(&excursion.id);
        assert!(cache.get(&excursion.id).is_none());
    }

    #[test]
    fn test_read_taken_before_invalidation_is_not_cached() {
        let excursion = excursion();
        let cache = ExcursionCache::new();

        let seen = cache.generation(&excursion.id);
        cache.invalidate(&excursion.id);

        assert!(!cache.put(excursion.clone(), seen));
        assert!(cache.get(&excursion.id).is_none());

        let fresh = cache.generation(&excursion.id);
        assert!(cache.put(excursion.clone(), fresh));
        assert_eq!(cache.get(&excursion.id), Some(excursion));
    }
}
