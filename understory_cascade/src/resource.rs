// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resource dictionaries and the process-wide system resource cache.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use understory_property::{ErasedValue, ObjectType, PropertyValue};

use crate::engine::Engine;
use crate::error::CascadeError;
use crate::node::NodeId;
use crate::style::Style;
use crate::template::Template;

/// Key of a resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// A named resource.
    Name(&'static str),
    /// The implicit style of a type, or any resource keyed by type.
    Type(ObjectType),
}

/// A stored resource.
#[derive(Clone, Debug)]
pub enum ResourceValue {
    /// A plain value.
    Value(ErasedValue),
    /// A style.
    Style(Style),
    /// A template.
    Template(Template),
}

impl ResourceValue {
    /// The plain value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&ErasedValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The style, if this is one.
    #[must_use]
    pub fn as_style(&self) -> Option<&Style> {
        match self {
            Self::Style(style) => Some(style),
            _ => None,
        }
    }

    /// The template, if this is one.
    #[must_use]
    pub fn as_template(&self) -> Option<&Template> {
        match self {
            Self::Template(template) => Some(template),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct DictionaryData {
    entries: Vec<(ResourceKey, ResourceValue)>,
    implicit_styles: HashMap<ObjectType, Style>,
    merged: Vec<ResourceDictionary>,
    sealed: bool,
    owners: SmallVec<[NodeId; 2]>,
}

/// A shared key/value store of resources.
///
/// Lookup checks the dictionary's own entries first and then its merged
/// dictionaries, most recently merged first. Type keys consult the
/// implicit-style index before plain entries. Dictionaries stay mutable
/// until sealed; styles and templates seal theirs when they are compiled.
///
/// ```rust
/// use understory_cascade::{ResourceDictionary, ResourceKey};
///
/// let a = ResourceDictionary::new();
/// let b = ResourceDictionary::new();
/// a.insert_value("Accent", 1_u32).unwrap();
/// b.insert_value("Accent", 2_u32).unwrap();
///
/// let root = ResourceDictionary::new();
/// root.merge(a).unwrap();
/// root.merge(b.clone()).unwrap();
///
/// let accent = |d: &ResourceDictionary| {
///     d.get(ResourceKey::Name("Accent")).and_then(|v| v.as_value()?.get::<u32>())
/// };
/// assert_eq!(accent(&root), Some(2));
/// b.remove(ResourceKey::Name("Accent")).unwrap();
/// assert_eq!(accent(&root), Some(1));
/// ```
#[derive(Clone, Default)]
pub struct ResourceDictionary {
    inner: Rc<RefCell<DictionaryData>>,
}

impl ResourceDictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), CascadeError> {
        if self.inner.borrow().sealed {
            Err(CascadeError::SealedDictionary)
        } else {
            Ok(())
        }
    }

    /// Inserts or replaces a resource.
    ///
    /// A style stored under a type key goes to the implicit-style index.
    pub fn insert(&self, key: ResourceKey, value: ResourceValue) -> Result<(), CascadeError> {
        self.check_open()?;
        let mut data = self.inner.borrow_mut();
        if let (ResourceKey::Type(ty), ResourceValue::Style(style)) = (key, &value) {
            data.implicit_styles.insert(ty, style.clone());
            return Ok(());
        }
        match data.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => data.entries.push((key, value)),
        }
        Ok(())
    }

    /// Inserts a named plain value.
    pub fn insert_value<T: PropertyValue>(
        &self,
        name: &'static str,
        value: T,
    ) -> Result<(), CascadeError> {
        self.insert(
            ResourceKey::Name(name),
            ResourceValue::Value(ErasedValue::new(value)),
        )
    }

    /// Inserts the implicit style for `ty`.
    pub fn insert_style(&self, ty: ObjectType, style: Style) -> Result<(), CascadeError> {
        self.insert(ResourceKey::Type(ty), ResourceValue::Style(style))
    }

    /// Removes a resource from this dictionary (not from merged ones).
    pub fn remove(&self, key: ResourceKey) -> Result<Option<ResourceValue>, CascadeError> {
        self.check_open()?;
        let mut data = self.inner.borrow_mut();
        if let ResourceKey::Type(ty) = key
            && let Some(style) = data.implicit_styles.remove(&ty)
        {
            return Ok(Some(ResourceValue::Style(style)));
        }
        let position = data.entries.iter().position(|(k, _)| *k == key);
        Ok(position.map(|idx| data.entries.remove(idx).1))
    }

    /// Appends a merged dictionary; later merges are searched first.
    pub fn merge(&self, other: Self) -> Result<(), CascadeError> {
        self.check_open()?;
        let owners = self.owners();
        for owner in owners {
            other.add_owner(owner);
        }
        self.inner.borrow_mut().merged.push(other);
        Ok(())
    }

    /// Number of own entries, implicit styles included.
    #[must_use]
    pub fn len(&self) -> usize {
        let data = self.inner.borrow();
        data.entries.len() + data.implicit_styles.len()
    }

    /// Returns `true` if there are no own entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up `key` here and in merged dictionaries.
    #[must_use]
    pub fn get(&self, key: ResourceKey) -> Option<ResourceValue> {
        let mut stack = vec![self.clone()];
        let mut visited: SmallVec<[*const RefCell<DictionaryData>; 8]> = SmallVec::new();
        while let Some(dictionary) = stack.pop() {
            let ptr = Rc::as_ptr(&dictionary.inner);
            if visited.contains(&ptr) {
                continue;
            }
            visited.push(ptr);

            let data = dictionary.inner.borrow();
            if let ResourceKey::Type(ty) = key
                && let Some(style) = data.implicit_styles.get(&ty)
            {
                return Some(ResourceValue::Style(style.clone()));
            }
            if let Some((_, value)) = data.entries.iter().find(|(k, _)| *k == key) {
                return Some(value.clone());
            }
            // Pushed in insertion order so the newest merge pops first.
            stack.extend(data.merged.iter().cloned());
        }
        None
    }

    /// Returns `true` if this dictionary or a merged one has implicit styles.
    #[must_use]
    pub fn has_implicit_styles(&self) -> bool {
        self.any_dictionary(|data| !data.implicit_styles.is_empty())
    }

    /// Makes this dictionary and its merged dictionaries read-only.
    pub fn seal(&self) {
        let mut stack = vec![self.clone()];
        while let Some(dictionary) = stack.pop() {
            let mut data = dictionary.inner.borrow_mut();
            if data.sealed {
                continue;
            }
            data.sealed = true;
            stack.extend(data.merged.iter().cloned());
        }
    }

    /// Returns `true` once sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.borrow().sealed
    }

    /// Returns `true` if both handles refer to the same dictionary.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn any_dictionary(&self, mut test: impl FnMut(&DictionaryData) -> bool) -> bool {
        let mut stack = vec![self.clone()];
        let mut visited: SmallVec<[*const RefCell<DictionaryData>; 8]> = SmallVec::new();
        while let Some(dictionary) = stack.pop() {
            let ptr = Rc::as_ptr(&dictionary.inner);
            if visited.contains(&ptr) {
                continue;
            }
            visited.push(ptr);
            let data = dictionary.inner.borrow();
            if test(&data) {
                return true;
            }
            stack.extend(data.merged.iter().cloned());
        }
        false
    }

    pub(crate) fn add_owner(&self, node: NodeId) {
        let merged = {
            let mut data = self.inner.borrow_mut();
            if data.owners.contains(&node) {
                return;
            }
            data.owners.push(node);
            data.merged.clone()
        };
        for dictionary in merged {
            dictionary.add_owner(node);
        }
    }

    pub(crate) fn remove_owner(&self, node: NodeId) {
        let merged = {
            let mut data = self.inner.borrow_mut();
            let Some(idx) = data.owners.iter().position(|n| *n == node) else {
                return;
            };
            data.owners.swap_remove(idx);
            data.merged.clone()
        };
        for dictionary in merged {
            dictionary.remove_owner(node);
        }
    }

    pub(crate) fn owners(&self) -> Vec<NodeId> {
        self.inner.borrow().owners.to_vec()
    }
}

impl fmt::Debug for ResourceDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.borrow();
        f.debug_struct("ResourceDictionary")
            .field("entries", &data.entries.len())
            .field("implicit_styles", &data.implicit_styles.len())
            .field("merged", &data.merged.len())
            .field("sealed", &data.sealed)
            .finish_non_exhaustive()
    }
}

/// A lazily resolved resource reference.
///
/// Produced by [`Engine::find_resource_deferred`]; nothing is looked up
/// until [`resolve`](Self::resolve) is called, so forward references to
/// resources added later resolve correctly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeferredResource {
    pub(crate) scope: NodeId,
    pub(crate) key: ResourceKey,
}

impl DeferredResource {
    /// The referenced key.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    /// Looks the resource up now.
    #[must_use]
    pub fn resolve(&self, engine: &Engine) -> Option<ResourceValue> {
        engine.try_find_resource(self.scope, self.key)
    }
}

/// Looks up system resources by name.
pub type SystemProvider = Box<dyn Fn(&str) -> Option<ErasedValue> + Send + Sync>;

#[derive(Debug)]
struct CachedEntry {
    generation: u64,
    value: Option<ErasedValue>,
}

#[derive(Debug, Default)]
struct SystemCache {
    generation: u64,
    entries: HashMap<&'static str, CachedEntry>,
}

/// Process-wide cache of system resources (system colors, metrics).
///
/// Shared between engines through an `Arc`. One coarse lock covers the
/// whole read-validate-populate sequence; the cache is read often and
/// populated rarely.
///
/// ```rust
/// use std::sync::Arc;
/// use understory_cascade::SystemResources;
/// use understory_property::ErasedValue;
///
/// let system = Arc::new(SystemResources::new(|name| {
///     (name == "WindowColor").then(|| ErasedValue::new(0xFFFFFF_u32))
/// }));
/// assert_eq!(system.get("WindowColor").and_then(|v| v.get::<u32>()), Some(0xFFFFFF));
/// assert!(system.get("Missing").is_none());
/// assert_eq!(system.cached_len(), 2);
/// system.clear();
/// assert_eq!(system.cached_len(), 0);
/// ```
pub struct SystemResources {
    provider: SystemProvider,
    cache: Mutex<SystemCache>,
}

impl SystemResources {
    /// Creates a cache over `provider`.
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn(&str) -> Option<ErasedValue> + Send + Sync + 'static,
    {
        Self {
            provider: Box::new(provider),
            cache: Mutex::new(SystemCache::default()),
        }
    }

    /// Returns the cached value for `name`, asking the provider on a miss.
    pub fn get(&self, name: &'static str) -> Option<ErasedValue> {
        let mut cache = self.cache.lock();
        let generation = cache.generation;
        if let Some(entry) = cache.entries.get(name)
            && entry.generation == generation
        {
            return entry.value.clone();
        }
        let value = (self.provider)(name);
        tracing::trace!(name, found = value.is_some(), "populated system resource");
        cache.entries.insert(
            name,
            CachedEntry {
                generation,
                value: value.clone(),
            },
        );
        value
    }

    /// Marks every cached entry stale, for when system settings change.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        cache.generation += 1;
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.entries.clear();
        cache.generation += 1;
    }

    /// Number of cached entries, stale ones included.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().entries.len()
    }
}

impl fmt::Debug for SystemResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemResources")
            .field("cache", &*self.cache.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn value_of(dictionary: &ResourceDictionary, name: &'static str) -> Option<i32> {
        dictionary
            .get(ResourceKey::Name(name))
            .and_then(|v| v.as_value()?.get::<i32>())
    }

    #[test]
    fn own_entries_win_over_merged() {
        let merged = ResourceDictionary::new();
        merged.insert_value("k", 1).unwrap();
        let root = ResourceDictionary::new();
        root.merge(merged).unwrap();
        assert_eq!(value_of(&root, "k"), Some(1));
        root.insert_value("k", 5).unwrap();
        assert_eq!(value_of(&root, "k"), Some(5));
    }

    #[test]
    fn merged_order_is_last_added_first() {
        let [a, b, c] = [1, 2, 3].map(|v| {
            let d = ResourceDictionary::new();
            d.insert_value("k", v).unwrap();
            d
        });
        let root = ResourceDictionary::new();
        root.merge(a).unwrap();
        root.merge(b.clone()).unwrap();
        root.merge(c.clone()).unwrap();

        assert_eq!(value_of(&root, "k"), Some(3));
        c.remove(ResourceKey::Name("k")).unwrap();
        assert_eq!(value_of(&root, "k"), Some(2));
        b.remove(ResourceKey::Name("k")).unwrap();
        assert_eq!(value_of(&root, "k"), Some(1));
    }

    #[test]
    fn nested_merges_are_searched_depth_first() {
        let inner = ResourceDictionary::new();
        inner.insert_value("k", 7).unwrap();
        let middle = ResourceDictionary::new();
        middle.merge(inner).unwrap();
        let sibling = ResourceDictionary::new();
        sibling.insert_value("k", 9).unwrap();

        let root = ResourceDictionary::new();
        root.merge(sibling).unwrap();
        root.merge(middle).unwrap();
        assert_eq!(value_of(&root, "k"), Some(7));
    }

    #[test]
    fn merge_cycles_terminate() {
        let a = ResourceDictionary::new();
        let b = ResourceDictionary::new();
        a.merge(b.clone()).unwrap();
        b.merge(a.clone()).unwrap();
        assert_eq!(value_of(&a, "missing"), None);
        assert!(!a.has_implicit_styles());
    }

    #[test]
    fn type_keys_use_implicit_index() {
        let ty = ObjectType::new(3);
        let style = Style::builder().build();
        let dictionary = ResourceDictionary::new();
        dictionary.insert_style(ty, style.clone()).unwrap();
        assert!(dictionary.has_implicit_styles());
        let found = dictionary.get(ResourceKey::Type(ty));
        assert!(found.as_ref().and_then(ResourceValue::as_style).is_some_and(|s| s.ptr_eq(&style)));
        assert_eq!(dictionary.len(), 1);
        dictionary.remove(ResourceKey::Type(ty)).unwrap();
        assert!(!dictionary.has_implicit_styles());
    }

    #[test]
    fn sealed_dictionaries_reject_mutation() {
        let merged = ResourceDictionary::new();
        let dictionary = ResourceDictionary::new();
        dictionary.merge(merged.clone()).unwrap();
        dictionary.seal();
        assert!(merged.is_sealed());
        assert_eq!(
            dictionary.insert_value("k", 1),
            Err(CascadeError::SealedDictionary)
        );
        assert_eq!(
            merged.remove(ResourceKey::Name("k")).map(|v| v.is_some()),
            Err(CascadeError::SealedDictionary)
        );
    }

    #[test]
    fn system_cache_populates_once_per_generation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let system = Arc::new(SystemResources::new(move |name| {
            seen.fetch_add(1, Ordering::SeqCst);
            (name == "Highlight").then(|| ErasedValue::new(0x3399FF_u32))
        }));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let system = system.clone();
                std::thread::spawn(move || system.get("Highlight"))
            })
            .collect();
        for thread in threads {
            assert_eq!(
                thread.join().unwrap().and_then(|v| v.get::<u32>()),
                Some(0x3399FF)
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        system.invalidate();
        system.get("Highlight");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
