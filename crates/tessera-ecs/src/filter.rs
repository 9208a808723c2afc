//! Component-presence filters and the index of their matching entities.
//!
//! A [`Filter`] is `required ∧ ¬excluded` over component types. The
//! [`FilterIndex`] keeps one result set per distinct filter, shared by every
//! consumer that registered an equal filter, and recomputes all of them in a
//! single batch at each world flush.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use bit_set::BitSet;

use crate::component::{Component, ComponentKey, ComponentRegistry};
use crate::entity::EntitySet;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// An immutable (required, excluded) pair of component type sets.
///
/// Two filters are equal when both sets are equal, regardless of the order
/// in which types were listed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    required: BTreeSet<ComponentKey>,
    excluded: BTreeSet<ComponentKey>,
}

impl Filter {
    /// Build a filter from explicit key sets.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidFilter`] if a type is both required and
    /// excluded.
    pub fn new(
        required: impl IntoIterator<Item = ComponentKey>,
        excluded: impl IntoIterator<Item = ComponentKey>,
    ) -> Result<Self, EcsError> {
        let required: BTreeSet<ComponentKey> = required.into_iter().collect();
        let excluded: BTreeSet<ComponentKey> = excluded.into_iter().collect();

        let overlapping: Vec<String> = required
            .intersection(&excluded)
            .map(|key| key.name().to_owned())
            .collect();
        if !overlapping.is_empty() {
            return Err(EcsError::InvalidFilter { overlapping });
        }
        Ok(Self { required, excluded })
    }

    /// Start building a filter.
    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }

    /// Types an entity must have.
    pub fn required(&self) -> impl Iterator<Item = &ComponentKey> {
        self.required.iter()
    }

    /// Types an entity must not have.
    pub fn excluded(&self) -> impl Iterator<Item = &ComponentKey> {
        self.excluded.iter()
    }

    /// Evaluate the filter against `live` and the registry's stores.
    ///
    /// A required type with no store yet matches nothing; an excluded type
    /// with no store excludes nothing.
    pub(crate) fn evaluate(&self, live: &BitSet, registry: &ComponentRegistry) -> BitSet {
        let mut result = live.clone();
        for key in &self.required {
            match registry.members_of(key) {
                Some(members) => result.intersect_with(members),
                None => {
                    result.clear();
                    return result;
                }
            }
        }
        for key in &self.excluded {
            if let Some(members) = registry.members_of(key) {
                result.difference_with(members);
            }
        }
        result
    }
}

/// Fluent construction of a [`Filter`].
#[derive(Debug, Default)]
pub struct FilterBuilder {
    required: Vec<ComponentKey>,
    excluded: Vec<ComponentKey>,
}

impl FilterBuilder {
    /// Require `T`.
    pub fn require<T: Component>(mut self) -> Self {
        self.required.push(ComponentKey::of::<T>());
        self
    }

    /// Exclude `T`.
    pub fn exclude<T: Component>(mut self) -> Self {
        self.excluded.push(ComponentKey::of::<T>());
        self
    }

    /// Finish; see [`Filter::new`] for the error case.
    pub fn build(self) -> Result<Filter, EcsError> {
        Filter::new(self.required, self.excluded)
    }
}

// ---------------------------------------------------------------------------
// FilterIndex
// ---------------------------------------------------------------------------

/// Handle on a registered filter signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(usize);

#[derive(Debug)]
struct FilterEntry {
    filter: Filter,
    /// Last published result; replaced, never mutated, on recompute.
    entities: Rc<EntitySet>,
    consumers: Vec<String>,
}

/// Filter signature -> current matching entity set -> consumers.
#[derive(Debug, Default)]
pub struct FilterIndex {
    /// Registration order; recomputation walks it front to back.
    entries: Vec<FilterEntry>,
    lookup: HashMap<Filter, FilterId>,
}

impl FilterIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` for `filter`.
    ///
    /// The first registration of a signature creates an empty result set;
    /// later registrations of an equal filter share it.
    pub fn register(&mut self, filter: Filter, consumer: impl Into<String>) -> FilterId {
        let consumer = consumer.into();
        if let Some(&id) = self.lookup.get(&filter) {
            self.entries[id.0].consumers.push(consumer);
            return id;
        }
        let id = FilterId(self.entries.len());
        self.lookup.insert(filter.clone(), id);
        self.entries.push(FilterEntry {
            filter,
            entities: Rc::new(EntitySet::new()),
            consumers: vec![consumer],
        });
        id
    }

    /// The id of a registered signature.
    pub fn id_of(&self, filter: &Filter) -> Option<FilterId> {
        self.lookup.get(filter).copied()
    }

    /// The filter behind `id`.
    pub fn filter(&self, id: FilterId) -> Option<&Filter> {
        self.entries.get(id.0).map(|entry| &entry.filter)
    }

    /// The current result set for `id`, shared with every other consumer.
    pub fn entities(&self, id: FilterId) -> Option<Rc<EntitySet>> {
        self.entries.get(id.0).map(|entry| Rc::clone(&entry.entities))
    }

    /// Consumers registered for `id`, in registration order.
    pub fn consumers(&self, id: FilterId) -> &[String] {
        self.entries
            .get(id.0)
            .map(|entry| entry.consumers.as_slice())
            .unwrap_or(&[])
    }

    /// Recompute every signature against `live` and publish the results.
    pub(crate) fn recompute_all(&mut self, live: &BitSet, registry: &ComponentRegistry) {
        for entry in &mut self.entries {
            let result = entry.filter.evaluate(live, registry);
            entry.entities = Rc::new(EntitySet::from_bits(result));
        }
    }

    /// Publish empty results for every signature.
    pub(crate) fn clear_results(&mut self) {
        for entry in &mut self.entries {
            entry.entities = Rc::new(EntitySet::new());
        }
    }

    /// Number of distinct signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
