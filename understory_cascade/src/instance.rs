// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-node storage for values that must not be shared between nodes.

use hashbrown::HashMap;
use understory_property::{ErasedValue, PropertyId};

use crate::node::NodeId;
use crate::value::{InstanceValue, SetterValue};

/// Which of a node's compiled tables a record came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum InstanceLayer {
    Style,
    ThemeStyle,
    Template,
}

/// Identifies one materialized record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstanceKey {
    pub(crate) layer: InstanceLayer,
    pub(crate) child_index: u32,
    pub(crate) property: PropertyId,
    pub(crate) slot: u32,
}

#[derive(Debug)]
struct InstanceEntry {
    value: InstanceValue,
    /// Node the value was materialized for; differs from the owner for
    /// template-generated children.
    target: NodeId,
    detached: bool,
}

/// Sparse map of materialized values owned by one node.
///
/// Entries for template children live in the container's store, keyed by
/// child index.
#[derive(Debug, Default)]
pub(crate) struct InstanceStore {
    entries: HashMap<InstanceKey, InstanceEntry>,
}

impl InstanceStore {
    /// Returns the value for `key`, materializing `raw` on first use.
    ///
    /// An entry marked detached is discarded and created again. Returns
    /// `None` for raw values that need no instance or expressions without
    /// a current value.
    pub(crate) fn get_or_create(
        &mut self,
        key: InstanceKey,
        raw: &SetterValue,
        target: NodeId,
    ) -> Option<ErasedValue> {
        if let Some(entry) = self.entries.get(&key)
            && !entry.detached
        {
            return entry.value.current();
        }
        let value = match raw {
            SetterValue::Cloneable(value) => InstanceValue::Value(value.clone()),
            SetterValue::Factory(factory) => factory.create(target, key.property),
            SetterValue::Value(_) | SetterValue::Resource(_) => return None,
        };
        if let InstanceValue::Expression(expression) = &value {
            expression.attach(target, key.property);
        }
        tracing::trace!(?target, ?key, "created instance value");
        let current = value.current();
        self.entries.insert(
            key,
            InstanceEntry {
                value,
                target,
                detached: false,
            },
        );
        current
    }

    /// Releases one entry, detaching its expression. Releasing a missing
    /// entry does nothing.
    pub(crate) fn release(&mut self, key: InstanceKey) -> bool {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        Self::detach(key, entry);
        true
    }

    /// Releases every entry of one layer.
    pub(crate) fn release_layer(&mut self, layer: InstanceLayer) {
        let mut keys: Vec<InstanceKey> = self
            .entries
            .keys()
            .filter(|key| key.layer == layer)
            .copied()
            .collect();
        keys.sort_by_key(|key| (key.child_index, key.property, key.slot));
        for key in keys {
            self.release(key);
        }
    }

    /// Releases the entries materialized for generated template children.
    pub(crate) fn release_children(&mut self) {
        let keys: Vec<InstanceKey> = self
            .entries
            .keys()
            .filter(|key| key.layer == InstanceLayer::Template && key.child_index > 0)
            .copied()
            .collect();
        for key in keys {
            self.release(key);
        }
    }

    /// Releases the entries materialized for one node, such as a generated
    /// child that is being destroyed.
    pub(crate) fn release_target(&mut self, target: NodeId) -> usize {
        let mut keys: Vec<InstanceKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.target == target)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_by_key(|key| (key.child_index, key.property, key.slot));
        for &key in &keys {
            self.release(key);
        }
        keys.len()
    }

    /// Releases everything.
    pub(crate) fn release_all(&mut self) {
        for (key, entry) in self.entries.drain() {
            Self::detach(key, entry);
        }
    }

    /// Marks the entries materialized for `(target, property)` as detached
    /// without running their detach hook; the next read recreates them.
    pub(crate) fn mark_detached(&mut self, target: NodeId, property: PropertyId) -> usize {
        let mut marked = 0;
        for (key, entry) in &mut self.entries {
            if entry.target == target && key.property == property && !entry.detached {
                entry.detached = true;
                marked += 1;
            }
        }
        marked
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn detach(key: InstanceKey, entry: InstanceEntry) {
        if entry.detached {
            return;
        }
        if let InstanceValue::Expression(expression) = &entry.value {
            expression.detach(entry.target, key.property);
        }
        tracing::trace!(target = ?entry.target, ?key, "released instance value");
    }
}
