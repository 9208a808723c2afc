//! Entity identifiers, entity sets, and allocation.
//!
//! An [`Entity`] is a plain non-negative integer. The [`EntityAllocator`]
//! hands out the lowest free id and defers destruction until the next
//! [`flush`](EntityAllocator::flush), so an entity destroyed mid-tick keeps
//! reporting as alive until the world reaches a flush boundary.

use std::fmt;

use bit_set::BitSet;
use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An opaque entity identifier. Carries no data of its own.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(u32);

impl Entity {
    /// Wrap a raw id.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }

    /// The id as a bitset / sparse-array index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "entity index {index} overflows u32");
        Self(index as u32)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntitySet
// ---------------------------------------------------------------------------

/// An immutable-by-convention set of entities backed by a bitset.
///
/// Returned by [`World::live_entities`](crate::world::World::live_entities)
/// and published by the filter index. Iteration is in ascending id order.
#[derive(Clone, Default)]
pub struct EntitySet(BitSet);

impl EntitySet {
    /// An empty set.
    pub fn new() -> Self {
        Self(BitSet::new())
    }

    pub(crate) fn from_bits(bits: BitSet) -> Self {
        Self(bits)
    }

    pub(crate) fn bits(&self) -> &BitSet {
        &self.0
    }

    /// Whether `entity` is a member.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.0.contains(entity.index())
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.0.iter().map(Entity::from_index)
    }

    /// Members collected into a `Vec`, ascending.
    pub fn to_vec(&self) -> Vec<Entity> {
        self.iter().collect()
    }
}

impl PartialEq for EntitySet {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().eq(other.0.iter())
    }
}

impl Eq for EntitySet {}

impl fmt::Debug for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl FromIterator<Entity> for EntitySet {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut bits = BitSet::new();
        for entity in iter {
            bits.insert(entity.index());
        }
        Self(bits)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates entity ids, lowest free id first.
///
/// The allocator keeps a cursor below which every id is known to be taken,
/// so monotonic growth is O(1) per allocation. Freed ids are only reused
/// after a flush: the lowest id destroyed since the previous flush becomes
/// the new cursor when it is below the current one.
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    /// Ids currently alive (pending-destroy ids included).
    live: BitSet,
    /// Ids queued for destruction at the next flush.
    pending_destroy: BitSet,
    /// Lowest id that may be free.
    cursor: usize,
    /// Lowest id destroyed since the last flush.
    rewind: Option<usize>,
}

impl EntityAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty allocator with room for `capacity` ids before the
    /// bitsets reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            live: BitSet::with_capacity(capacity),
            pending_destroy: BitSet::with_capacity(capacity),
            cursor: 0,
            rewind: None,
        }
    }

    /// Rebuild an allocator whose live set is exactly `live`.
    ///
    /// The cursor starts at zero, so the first allocations fill the holes
    /// left in `live` from the bottom up.
    pub fn from_live(live: &EntitySet) -> Self {
        Self {
            live: live.bits().clone(),
            pending_destroy: BitSet::new(),
            cursor: 0,
            rewind: None,
        }
    }

    /// Allocate the lowest id not in the live set at or above the cursor.
    pub fn create(&mut self) -> Entity {
        let mut index = self.cursor;
        while self.live.contains(index) {
            index += 1;
        }
        self.live.insert(index);
        self.cursor = index + 1;
        Entity::from_index(index)
    }

    /// Whether `entity` is alive. Entities queued for destruction still
    /// report `true` until the next flush.
    #[inline]
    pub fn exists(&self, entity: Entity) -> bool {
        self.live.contains(entity.index())
    }

    /// Queue `entity` for destruction.
    ///
    /// Returns `Ok(true)` if the entity was newly queued and `Ok(false)` if it
    /// was already pending; destroying twice before a flush is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the entity is not alive.
    pub fn destroy(&mut self, entity: Entity) -> Result<bool, EcsError> {
        if !self.exists(entity) {
            return Err(EcsError::EntityNotFound { entity });
        }
        let index = entity.index();
        let newly_queued = self.pending_destroy.insert(index);
        self.rewind = Some(self.rewind.map_or(index, |r| r.min(index)));
        Ok(newly_queued)
    }

    /// Whether `entity` is queued for destruction.
    pub fn is_pending_destroy(&self, entity: Entity) -> bool {
        self.pending_destroy.contains(entity.index())
    }

    /// Commit queued destructions. Returns the number of ids freed.
    pub fn flush(&mut self) -> usize {
        let freed = self.pending_destroy.len();
        self.live.difference_with(&self.pending_destroy);
        self.pending_destroy.clear();

        if let Some(rewind) = self.rewind.take() {
            if rewind < self.cursor {
                self.cursor = rewind;
            }
        }
        freed
    }

    /// Copy of the live set.
    pub fn live_set(&self) -> EntitySet {
        EntitySet::from_bits(self.live.clone())
    }

    pub(crate) fn live_bits(&self) -> &BitSet {
        &self.live
    }

    /// Copy of the ids queued for destruction.
    pub fn pending_destroy(&self) -> EntitySet {
        EntitySet::from_bits(self.pending_destroy.clone())
    }

    /// Number of live ids (pending-destroy ids included).
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Forget every entity and start allocating from zero again.
    pub fn reset(&mut self) {
        self.live.clear();
        self.pending_destroy.clear();
        self.cursor = 0;
        self.rewind = None;
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
