//! State Entity Store
//!
//! Persistence contract used by the state machine loop.
//!
//! # Guarantees
//!
//! 1. **Oldest first**: `next_for_state` returns entities ordered by the timestamp
//!    of their last transition, so the processes that waited longest are served first
//! 2. **Leased fetch**: every returned entity is leased for a configurable duration;
//!    entities under an unexpired lease are skipped
//! 3. **Save releases**: `save` clears the lease, on success and failure paths alike
//! 4. **Optimistic versioning**: `save` rejects an entity whose version changed since
//!    it was fetched with [`StoreError::ConcurrentModification`]
//!
//! A table-backed implementation needs at least the columns
//! `id, state, state_count, state_timestamp, version, lease_owner, lease_expiry`.

pub mod error;
pub mod memory;

pub use error::StoreError;
pub use memory::InMemoryEntityStore;

use async_trait::async_trait;

use crate::entity::StatefulEntity;

#[async_trait]
pub trait StateEntityStore<P>: Send + Sync
where
    P: Clone + Send + Sync + 'static,
{
    /// Insert a new entity.
    async fn create(&self, entity: StatefulEntity<P>) -> Result<(), StoreError>;

    /// Look up an entity by id. Returns a copy; mutating it has no effect until saved.
    async fn find(&self, id: &str) -> Result<Option<StatefulEntity<P>>, StoreError>;

    /// Lease and return at most `max` entities in `state`, oldest transition first.
    async fn next_for_state(
        &self,
        state: i32,
        max: usize,
    ) -> Result<Vec<StatefulEntity<P>>, StoreError>;

    /// Persist the entity and release its lease. Returns the entity carrying its
    /// new version.
    async fn save(&self, entity: &StatefulEntity<P>) -> Result<StatefulEntity<P>, StoreError>;

    /// Break this holder's lease on the entity without writing it.
    async fn release(&self, id: &str) -> Result<(), StoreError>;
}
