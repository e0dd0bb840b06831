//! In-memory reference implementation of [`StateEntityStore`].
//!
//! Entities live in a shared `DashMap`. Several store handles can point at the
//! same map with different lease holders, which is how concurrent workers of one
//! process are modeled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{StateEntityStore, StoreError};
use crate::core_types::{EntityId, Millis};
use crate::entity::{Clock, Lease, StatefulEntity, SystemClock};

/// Default lease duration when none is configured.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredEntity<P> {
    entity: StatefulEntity<P>,
    lease: Option<Lease>,
}

impl<P> StoredEntity<P> {
    /// A live lease blocks everyone, its own holder included, so the loop never
    /// fetches an entity twice before saving it.
    fn is_leasable(&self, now: Millis) -> bool {
        self.lease.as_ref().is_none_or(|lease| lease.is_expired(now))
    }
}

pub struct InMemoryEntityStore<P> {
    entries: Arc<DashMap<EntityId, StoredEntity<P>>>,
    holder: String,
    lease_duration_ms: Millis,
    clock: Arc<dyn Clock>,
}

impl<P> InMemoryEntityStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a store with a random holder token and the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_LEASE_DURATION)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, lease_duration: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            holder: uuid::Uuid::new_v4().to_string(),
            lease_duration_ms: Millis::try_from(lease_duration.as_millis()).unwrap_or(Millis::MAX),
            clock,
        }
    }

    /// Another handle on the same entities, leasing under `holder`.
    pub fn with_holder(&self, holder: impl Into<String>) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            holder: holder.into(),
            lease_duration_ms: self.lease_duration_ms,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current lease on an entity, if any (expired leases included).
    pub fn lease_of(&self, id: &str) -> Option<Lease> {
        self.entries.get(id).and_then(|e| e.lease.clone())
    }

    /// Remove an entity. Refused while someone holds a live lease on it.
    pub fn delete(&self, id: &str) -> Result<StatefulEntity<P>, StoreError> {
        let now = self.clock.millis();
        if let Some(entry) = self.entries.get(id)
            && let Some(lease) = &entry.lease
            && !lease.is_expired(now)
        {
            return Err(StoreError::LeasedByOther {
                id: id.to_string(),
                holder: lease.holder.clone(),
            });
        }
        self.entries
            .remove(id)
            .map(|(_, stored)| stored.entity)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

impl<P> Default for InMemoryEntityStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P> StateEntityStore<P> for InMemoryEntityStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn create(&self, entity: StatefulEntity<P>) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(entity.id().to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(entity.id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(StoredEntity {
                    entity,
                    lease: None,
                });
                Ok(())
            }
        }
    }

    async fn find(&self, id: &str) -> Result<Option<StatefulEntity<P>>, StoreError> {
        Ok(self.entries.get(id).map(|e| e.entity.clone()))
    }

    async fn next_for_state(
        &self,
        state: i32,
        max: usize,
    ) -> Result<Vec<StatefulEntity<P>>, StoreError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.millis();

        // Snapshot candidates first; the shard read locks are released before
        // any entry is locked for writing.
        let mut candidates: Vec<(Millis, EntityId)> = self
            .entries
            .iter()
            .filter(|e| e.entity.state() == state && e.is_leasable(now))
            .map(|e| (e.entity.state_timestamp(), e.key().clone()))
            .collect();
        candidates.sort();

        let mut leased = Vec::with_capacity(max.min(candidates.len()));
        for (_, id) in candidates {
            if leased.len() >= max {
                break;
            }
            let Some(mut entry) = self.entries.get_mut(&id) else {
                continue;
            };
            // Re-check under the entry lock: another worker may have leased or
            // moved it since the snapshot.
            if entry.entity.state() != state || !entry.is_leasable(now) {
                continue;
            }
            entry.lease = Some(Lease::new(
                self.holder.clone(),
                now,
                self.lease_duration_ms,
            ));
            leased.push(entry.entity.clone());
        }

        if !leased.is_empty() {
            debug!(
                state = state,
                count = leased.len(),
                holder = %self.holder,
                "Leased entities"
            );
        }
        Ok(leased)
    }

    async fn save(&self, entity: &StatefulEntity<P>) -> Result<StatefulEntity<P>, StoreError> {
        let now = self.clock.millis();
        let mut entry = self
            .entries
            .get_mut(entity.id())
            .ok_or_else(|| StoreError::NotFound(entity.id().to_string()))?;

        if let Some(lease) = &entry.lease
            && !lease.is_expired(now)
            && !lease.is_held_by(&self.holder)
        {
            return Err(StoreError::LeasedByOther {
                id: entity.id().to_string(),
                holder: lease.holder.clone(),
            });
        }

        let stored_version = entry.entity.version();
        if stored_version != entity.version() {
            return Err(StoreError::ConcurrentModification {
                id: entity.id().to_string(),
                expected: entity.version(),
                actual: stored_version,
            });
        }

        let saved = entity.clone().with_version(stored_version + 1);
        entry.entity = saved.clone();
        entry.lease = None;
        Ok(saved)
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry
            .lease
            .as_ref()
            .is_some_and(|lease| lease.is_held_by(&self.holder))
        {
            entry.lease = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ManualClock;

    const INITIAL: i32 = 100;
    const REQUESTED: i32 = 200;

    fn store_at(start: Millis) -> (InMemoryEntityStore<()>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryEntityStore::with_clock(clock.clone(), Duration::from_millis(1_000));
        (store, clock)
    }

    #[tokio::test]
    async fn test_next_for_state_leases_until_save() {
        let (store, clock) = store_at(0);
        store
            .create(StatefulEntity::new("any", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();

        let first = store.next_for_state(INITIAL, 1).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = store.next_for_state(INITIAL, 1).await.unwrap();
        assert!(second.is_empty());

        store.save(&first[0]).await.unwrap();

        let third = store.next_for_state(INITIAL, 1).await.unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn test_next_for_state_oldest_first_and_bounded() {
        let (store, clock) = store_at(0);
        for i in 0..10 {
            clock.set(100 - i);
            store
                .create(StatefulEntity::new(
                    format!("e-{i}"),
                    INITIAL,
                    (),
                    clock.as_ref(),
                ))
                .await
                .unwrap();
        }

        let batch = store.next_for_state(INITIAL, 3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["e-9", "e-8", "e-7"]);

        // No starvation: the next batch continues with the next oldest
        let batch = store.next_for_state(INITIAL, 3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["e-6", "e-5", "e-4"]);
    }

    #[tokio::test]
    async fn test_next_for_state_filters_by_state() {
        let (store, clock) = store_at(0);
        store
            .create(StatefulEntity::new("a", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();
        store
            .create(StatefulEntity::new("b", REQUESTED, (), clock.as_ref()))
            .await
            .unwrap();

        let batch = store.next_for_state(REQUESTED, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id(), "b");
        assert!(store.next_for_state(-5, 10).await.unwrap().is_empty());
        assert!(store.next_for_state(INITIAL, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reacquired_by_other_holder() {
        let (store, clock) = store_at(0);
        let other = store.with_holder("worker-b");
        store
            .create(StatefulEntity::new("a", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();

        assert_eq!(store.next_for_state(INITIAL, 1).await.unwrap().len(), 1);
        assert!(other.next_for_state(INITIAL, 1).await.unwrap().is_empty());

        clock.advance(1_000);
        let taken = other.next_for_state(INITIAL, 1).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(store.lease_of("a").unwrap().holder, "worker-b");
    }

    #[tokio::test]
    async fn test_save_rejects_stale_version() {
        let (store, clock) = store_at(0);
        store
            .create(StatefulEntity::new("a", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();

        let mut fetched = store.next_for_state(INITIAL, 1).await.unwrap().remove(0);
        let stale = fetched.clone();

        fetched.transition_to(REQUESTED, clock.as_ref());
        let saved = store.save(&fetched).await.unwrap();
        assert_eq!(saved.version(), 1);

        let err = store.save(&stale).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::ConcurrentModification {
                id: "a".into(),
                expected: 0,
                actual: 1
            }
        );
        let found = store.find("a").await.unwrap().unwrap();
        assert_eq!(found.state(), REQUESTED);
    }

    #[tokio::test]
    async fn test_save_rejects_live_lease_of_other_holder() {
        let (store, clock) = store_at(0);
        let other = store.with_holder("worker-b");
        let entity = StatefulEntity::new("a", INITIAL, (), clock.as_ref());
        store.create(entity.clone()).await.unwrap();

        other.next_for_state(INITIAL, 1).await.unwrap();
        let err = store.save(&entity).await.unwrap_err();
        assert!(matches!(err, StoreError::LeasedByOther { .. }));
    }

    #[tokio::test]
    async fn test_release_breaks_own_lease_only() {
        let (store, clock) = store_at(0);
        let other = store.with_holder("worker-b");
        store
            .create(StatefulEntity::new("a", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();

        store.next_for_state(INITIAL, 1).await.unwrap();
        other.release("a").await.unwrap();
        assert!(store.lease_of("a").is_some());

        store.release("a").await.unwrap();
        assert!(store.lease_of("a").is_none());
        assert_eq!(other.next_for_state(INITIAL, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_lease_duration_saturates() {
        let clock = Arc::new(ManualClock::new(0));
        let store =
            InMemoryEntityStore::with_clock(clock.clone(), Duration::from_millis(u64::MAX));
        let other = store.with_holder("worker-b");
        store
            .create(StatefulEntity::new("a", INITIAL, (), clock.as_ref()))
            .await
            .unwrap();

        assert_eq!(store.next_for_state(INITIAL, 1).await.unwrap().len(), 1);
        assert_eq!(store.lease_of("a").unwrap().expires_at(), Millis::MAX);

        clock.advance(365 * 24 * 3_600_000);
        assert!(other.next_for_state(INITIAL, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let (store, clock) = store_at(0);
        let entity = StatefulEntity::new("a", INITIAL, (), clock.as_ref());
        store.create(entity.clone()).await.unwrap();
        assert_eq!(
            store.create(entity).await.unwrap_err(),
            StoreError::AlreadyExists("a".into())
        );

        store.next_for_state(INITIAL, 1).await.unwrap();
        assert!(store.delete("a").is_err());

        store.release("a").await.unwrap();
        store.delete("a").unwrap();
        assert!(store.is_empty());
        assert!(store.find("a").await.unwrap().is_none());
    }
}
