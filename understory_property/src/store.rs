// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-node sparse local value storage.
//!
//! [`PropertyStore`] keeps the values set directly on one node, sorted by
//! [`PropertyId`] in a `SmallVec` and found by binary search. Most nodes set
//! only a handful of properties locally, so the common case stays inline.
//! Every other value source lives in the cascade, not here.

use smallvec::SmallVec;

use crate::id::{Property, PropertyId};
use crate::registry::PropertyRegistry;
use crate::value::{ErasedValue, PropertyValue};

const INLINE_CAPACITY: usize = 8;

/// Local values of one node.
///
/// ```rust
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry, PropertyStore};
///
/// let mut registry = PropertyRegistry::new();
/// let opacity = registry.register(
///     "Opacity",
///     PropertyMetadataBuilder::new(1.0_f64).coerce(|v| v.clamp(0.0, 1.0)).build(),
/// );
///
/// let mut store = PropertyStore::new();
/// store.set_local(opacity, 3.0, &registry);
/// assert_eq!(store.get_local(opacity), Some(&1.0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct PropertyStore {
    entries: SmallVec<[(PropertyId, ErasedValue); INLINE_CAPACITY]>,
}

impl PropertyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing is set locally.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of local values.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Ids with local values, ascending.
    pub fn property_ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    #[inline]
    fn find(&self, id: PropertyId) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&id, |(pid, _)| *pid)
    }

    /// Returns `true` if `id` has a local value.
    #[must_use]
    #[inline]
    pub fn contains(&self, id: PropertyId) -> bool {
        self.find(id).is_ok()
    }

    /// The local value of `id`, erased.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&ErasedValue> {
        self.find(id).ok().map(|idx| &self.entries[idx].1)
    }

    /// The typed local value.
    #[must_use]
    pub fn get_local<T: PropertyValue>(&self, property: Property<T>) -> Option<&T> {
        self.get(property.id()).and_then(ErasedValue::downcast_ref)
    }

    /// Sets a typed local value, coerced through the property metadata.
    ///
    /// Returns the previous local value.
    pub fn set_local<T: PropertyValue>(
        &mut self,
        property: Property<T>,
        value: T,
        registry: &PropertyRegistry,
    ) -> Option<ErasedValue> {
        let value = match registry.get_metadata(property) {
            Some(metadata) => metadata.coerce(value),
            None => value,
        };
        self.set(property.id(), ErasedValue::new(value))
    }

    /// Sets an erased local value without coercion.
    ///
    /// Returns the previous local value.
    pub fn set(&mut self, id: PropertyId, value: ErasedValue) -> Option<ErasedValue> {
        match self.find(id) {
            Ok(idx) => Some(core::mem::replace(&mut self.entries[idx].1, value)),
            Err(idx) => {
                self.entries.insert(idx, (id, value));
                None
            }
        }
    }

    /// Removes the local value of `id`, returning it.
    pub fn clear(&mut self, id: PropertyId) -> Option<ErasedValue> {
        self.find(id).ok().map(|idx| self.entries.remove(idx).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyMetadataBuilder;
    use alloc::vec::Vec;

    #[test]
    fn set_get_clear() {
        let mut registry = PropertyRegistry::new();
        let width = registry.register("Width", PropertyMetadataBuilder::new(0.0_f64).build());
        let mut store = PropertyStore::new();

        assert!(store.is_empty());
        assert_eq!(store.set_local(width, 10.0, &registry), None);
        assert_eq!(
            store.set_local(width, 20.0, &registry),
            Some(ErasedValue::new(10.0_f64))
        );
        assert_eq!(store.get_local(width), Some(&20.0));
        assert!(store.contains(width.id()));
        assert_eq!(store.clear(width.id()), Some(ErasedValue::new(20.0_f64)));
        assert_eq!(store.clear(width.id()), None);
        assert!(store.is_empty());
    }

    #[test]
    fn ids_stay_sorted() {
        let mut store = PropertyStore::new();
        for index in [9_u16, 2, 14, 0, 5, 11, 3, 7, 1] {
            store.set(PropertyId::new(index), ErasedValue::new(index));
        }
        let ids: Vec<_> = store.property_ids().map(PropertyId::index).collect();
        assert_eq!(ids, [0, 1, 2, 3, 5, 7, 9, 11, 14]);
        assert_eq!(store.len(), 9);
        assert_eq!(
            store.get(PropertyId::new(11)).and_then(|v| v.get::<u16>()),
            Some(11)
        );
    }

    #[test]
    fn coercion_applies_to_typed_sets_only() {
        let mut registry = PropertyRegistry::new();
        let opacity = registry.register(
            "Opacity",
            PropertyMetadataBuilder::new(1.0_f64)
                .coerce(|v| v.clamp(0.0, 1.0))
                .build(),
        );
        let mut store = PropertyStore::new();
        store.set_local(opacity, -2.0, &registry);
        assert_eq!(store.get_local(opacity), Some(&0.0));
        store.set(opacity.id(), ErasedValue::new(5.0_f64));
        assert_eq!(store.get_local(opacity), Some(&5.0));
    }
}
