// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property and type registry.
//!
//! [`PropertyRegistry`] owns every property registration and every node
//! type registration, plus the per-type default override table.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{Any, TypeId};
use hashbrown::HashMap;

use crate::id::{ObjectType, Property, PropertyId};
use crate::metadata::{PropertyFlags, PropertyMetadata};
use crate::value::{ErasedValue, PropertyValue};

/// A registered property.
pub struct PropertyRegistration {
    name: &'static str,
    type_id: TypeId,
    default_value: ErasedValue,
    metadata: Box<dyn ErasedMetadata>,
}

impl PropertyRegistration {
    /// The property name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The [`TypeId`] of the property's value type.
    #[must_use]
    #[inline]
    pub fn value_type_id(&self) -> TypeId {
        self.type_id
    }

    /// The behavior flags.
    #[must_use]
    #[inline]
    pub fn flags(&self) -> PropertyFlags {
        self.metadata.flags()
    }

    /// The registered default, ignoring per-type overrides.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> &ErasedValue {
        &self.default_value
    }
}

impl core::fmt::Debug for PropertyRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyRegistration")
            .field("name", &self.name)
            .field("flags", &self.flags())
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct TypeRegistration {
    name: &'static str,
    base: Option<ObjectType>,
}

/// Registry of properties and node types.
///
/// Defaults can be overridden per type without registering a new property.
/// Lookups fall back along the base-type chain, so an override on a base
/// type applies to every derived type that has no override of its own.
///
/// ```rust
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let focusable = registry.register("Focusable", PropertyMetadataBuilder::new(false).build());
///
/// let element = registry.register_type("Element", None);
/// let control = registry.register_type("Control", Some(element));
/// let button = registry.register_type("Button", Some(control));
///
/// registry.override_default(control, focusable, true);
///
/// let default = |ty| registry.default_for(Some(ty), focusable.id()).and_then(|v| v.get::<bool>());
/// assert_eq!(default(element), Some(false));
/// assert_eq!(default(button), Some(true));
/// ```
#[derive(Default)]
pub struct PropertyRegistry {
    properties: Vec<PropertyRegistration>,
    by_name: HashMap<&'static str, PropertyId>,
    types: Vec<TypeRegistration>,
    types_by_name: HashMap<&'static str, ObjectType>,
    default_overrides: HashMap<(ObjectType, PropertyId), ErasedValue>,
}

impl PropertyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a property.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered or the registry is full.
    pub fn register<T: PropertyValue>(
        &mut self,
        name: &'static str,
        metadata: PropertyMetadata<T>,
    ) -> Property<T> {
        assert!(
            !self.by_name.contains_key(name),
            "Property '{name}' is already registered"
        );
        assert!(
            self.properties.len() < u16::MAX as usize,
            "Too many properties registered (max {})",
            u16::MAX
        );

        #[expect(clippy::cast_possible_truncation, reason = "checked above")]
        let id = PropertyId::new(self.properties.len() as u16);

        self.properties.push(PropertyRegistration {
            name,
            type_id: TypeId::of::<T>(),
            default_value: ErasedValue::new(metadata.default_value().clone()),
            metadata: Box::new(metadata),
        });
        self.by_name.insert(name, id);

        Property::from_id(id)
    }

    /// Registers a node type, optionally deriving from `base`.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered or the registry is full.
    pub fn register_type(&mut self, name: &'static str, base: Option<ObjectType>) -> ObjectType {
        assert!(
            !self.types_by_name.contains_key(name),
            "Type '{name}' is already registered"
        );
        assert!(
            self.types.len() < u16::MAX as usize,
            "Too many types registered (max {})",
            u16::MAX
        );

        #[expect(clippy::cast_possible_truncation, reason = "checked above")]
        let ty = ObjectType::new(self.types.len() as u16);
        self.types.push(TypeRegistration { name, base });
        self.types_by_name.insert(name, ty);
        ty
    }

    /// Number of registered properties.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if no properties are registered.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<PropertyId> {
        self.by_name.get(name).copied()
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<ObjectType> {
        self.types_by_name.get(name).copied()
    }

    /// The name of a property.
    #[must_use]
    pub fn name(&self, id: PropertyId) -> Option<&'static str> {
        self.get(id).map(PropertyRegistration::name)
    }

    /// The name of a type.
    #[must_use]
    pub fn type_name(&self, ty: ObjectType) -> Option<&'static str> {
        self.types.get(ty.index() as usize).map(|t| t.name)
    }

    /// The direct base of a type.
    #[must_use]
    pub fn base_type(&self, ty: ObjectType) -> Option<ObjectType> {
        self.types.get(ty.index() as usize).and_then(|t| t.base)
    }

    /// Iterates `ty` and then each of its bases, nearest first.
    pub fn type_chain(&self, ty: ObjectType) -> impl Iterator<Item = ObjectType> + '_ {
        core::iter::successors(Some(ty), |t| self.base_type(*t))
    }

    /// Returns `true` if `ty` is `base` or derives from it.
    #[must_use]
    pub fn is_assignable(&self, ty: ObjectType, base: ObjectType) -> bool {
        self.type_chain(ty).any(|t| t == base)
    }

    /// The registration for a property.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyRegistration> {
        self.properties.get(id.index() as usize)
    }

    /// The flags of a property, empty if unregistered.
    #[must_use]
    pub fn flags(&self, id: PropertyId) -> PropertyFlags {
        self.get(id)
            .map(PropertyRegistration::flags)
            .unwrap_or(PropertyFlags::empty())
    }

    /// Returns `true` if the property inherits.
    #[must_use]
    pub fn inherits(&self, id: PropertyId) -> bool {
        self.flags(id).contains(PropertyFlags::INHERITS)
    }

    /// Typed metadata, `None` if unregistered or of another value type.
    #[must_use]
    pub fn get_metadata<T: PropertyValue>(
        &self,
        property: Property<T>,
    ) -> Option<&PropertyMetadata<T>> {
        self.get(property.id())
            .and_then(|r| r.metadata.as_any().downcast_ref())
    }

    /// Overrides the default of `property` for `ty` and its derived types.
    ///
    /// # Panics
    ///
    /// Panics if `property` is not registered.
    pub fn override_default<T: PropertyValue>(
        &mut self,
        ty: ObjectType,
        property: Property<T>,
        value: T,
    ) {
        assert!(
            self.get(property.id()).is_some(),
            "Property {:?} is not registered",
            property.id()
        );
        self.default_overrides
            .insert((ty, property.id()), ErasedValue::new(value));
    }

    /// The default of `id` for a node of type `ty`.
    ///
    /// Walks the type chain for an override before falling back to the
    /// registered default. Returns `None` for unregistered properties.
    #[must_use]
    pub fn default_for(&self, ty: Option<ObjectType>, id: PropertyId) -> Option<&ErasedValue> {
        let registration = self.get(id)?;
        if !self.default_overrides.is_empty()
            && let Some(ty) = ty
        {
            for t in self.type_chain(ty) {
                if let Some(value) = self.default_overrides.get(&(t, id)) {
                    return Some(value);
                }
            }
        }
        Some(&registration.default_value)
    }

    /// Runs the typed changed callback of `id` with erased values.
    ///
    /// Values of the wrong type are ignored.
    pub fn notify_changed(&self, id: PropertyId, old: Option<&ErasedValue>, new: &ErasedValue) {
        if let Some(registration) = self.get(id) {
            registration.metadata.notify_changed(old, new);
        }
    }

    /// Iterates all registered properties.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyRegistration)> {
        self.properties.iter().enumerate().map(|(i, r)| {
            #[expect(clippy::cast_possible_truncation, reason = "index < len < u16::MAX")]
            (PropertyId::new(i as u16), r)
        })
    }
}

impl core::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("properties", &self.properties.len())
            .field("types", &self.types.len())
            .field("default_overrides", &self.default_overrides.len())
            .finish()
    }
}

trait ErasedMetadata: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn flags(&self) -> PropertyFlags;
    fn notify_changed(&self, old: Option<&ErasedValue>, new: &ErasedValue);
}

impl<T: PropertyValue> ErasedMetadata for PropertyMetadata<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn flags(&self) -> PropertyFlags {
        Self::flags(self)
    }

    fn notify_changed(&self, old: Option<&ErasedValue>, new: &ErasedValue) {
        if let Some(new) = new.downcast_ref::<T>() {
            self.on_changed(old.and_then(ErasedValue::downcast_ref), new);
        }
    }
}
