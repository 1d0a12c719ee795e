// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared styles.
//!
//! A [`Style`] is a bundle of setters and triggers for one target type. It
//! is cheap to clone (`Rc`) and shared by every node it is applied to. The
//! first application compiles it into a [`CompiledTable`]; from then on the
//! style is sealed and never changes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use understory_property::{ErasedValue, ObjectType, Property, PropertyId, PropertyValue};

use crate::resource::{ResourceDictionary, ResourceKey};
use crate::table::CompiledTable;
use crate::trigger::Trigger;
use crate::value::{SetterValue, ValueFactory};

/// One property assignment of a style, template or trigger.
#[derive(Clone, Debug)]
pub struct Setter {
    /// Named template child the setter applies to; `None` for the owner.
    pub target: Option<&'static str>,
    /// The property set.
    pub property: PropertyId,
    /// The value.
    pub value: SetterValue,
}

/// Where a style's base comes from.
#[derive(Clone, Debug)]
pub enum BasedOn {
    /// A style object.
    Style(Style),
    /// A style looked up in the applying node's resource scope.
    Resource(ResourceKey),
}

/// Process-unique identity of a style or template, stable for its lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(u64);

impl StyleId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
pub(crate) enum SealState {
    #[default]
    Open,
    Compiling,
    Sealed(Rc<CompiledTable>),
}

/// Records shared by styles and templates.
#[derive(Debug, Default)]
pub(crate) struct RecordData {
    pub(crate) setters: Vec<Setter>,
    pub(crate) triggers: Vec<Trigger>,
    pub(crate) resources: Option<ResourceDictionary>,
}

struct StyleInner {
    id: StyleId,
    target_type: Option<ObjectType>,
    based_on: Option<BasedOn>,
    records: RecordData,
    state: RefCell<SealState>,
}

/// A shareable, sealable bundle of setters and triggers.
///
/// ```rust
/// use understory_cascade::{Style, Trigger};
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let enabled = registry.register("IsEnabled", PropertyMetadataBuilder::new(true).build());
/// let opacity = registry.register("Opacity", PropertyMetadataBuilder::new(1.0_f64).build());
///
/// let base = Style::builder().set(opacity, 1.0).build();
/// let style = Style::builder()
///     .based_on(base.clone())
///     .trigger(Trigger::property(enabled, false).set(opacity, 0.5))
///     .build();
///
/// assert!(!style.is_sealed());
/// assert!(style.ptr_eq(&style.clone()));
/// assert!(!style.ptr_eq(&base));
/// ```
#[derive(Clone)]
pub struct Style {
    inner: Rc<StyleInner>,
}

impl Style {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> StyleBuilder {
        StyleBuilder::default()
    }

    /// Identity of this style.
    #[must_use]
    pub fn id(&self) -> StyleId {
        self.inner.id
    }

    /// Type the style is declared for, if any.
    #[must_use]
    pub fn target_type(&self) -> Option<ObjectType> {
        self.inner.target_type
    }

    /// The base of this style, if any.
    #[must_use]
    pub fn based_on(&self) -> Option<&BasedOn> {
        self.inner.based_on.as_ref()
    }

    /// Resources declared on the style.
    #[must_use]
    pub fn resources(&self) -> Option<&ResourceDictionary> {
        self.inner.records.resources.as_ref()
    }

    /// Returns `true` once the style has been compiled.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(*self.inner.state.borrow(), SealState::Sealed(_))
    }

    /// Returns `true` if both handles refer to the same style object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn records(&self) -> &RecordData {
        &self.inner.records
    }

    pub(crate) fn state(&self) -> &RefCell<SealState> {
        &self.inner.state
    }

    pub(crate) fn compiled(&self) -> Option<Rc<CompiledTable>> {
        match &*self.inner.state.borrow() {
            SealState::Sealed(table) => Some(table.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Style")
            .field("id", &self.inner.id)
            .field("target_type", &self.inner.target_type)
            .field("setters", &self.inner.records.setters.len())
            .field("triggers", &self.inner.records.triggers.len())
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Style`].
#[derive(Debug, Default)]
pub struct StyleBuilder {
    target_type: Option<ObjectType>,
    based_on: Option<BasedOn>,
    records: RecordData,
}

impl StyleBuilder {
    /// Restricts the style to nodes of `ty` or derived types.
    #[must_use]
    pub fn target_type(mut self, ty: ObjectType) -> Self {
        self.target_type = Some(ty);
        self
    }

    /// Chains the style onto a base style.
    #[must_use]
    pub fn based_on(mut self, base: Style) -> Self {
        self.based_on = Some(BasedOn::Style(base));
        self
    }

    /// Chains the style onto a base found by resource key when the style is sealed.
    #[must_use]
    pub fn based_on_resource(mut self, key: ResourceKey) -> Self {
        self.based_on = Some(BasedOn::Resource(key));
        self
    }

    /// Adds a plain setter.
    #[must_use]
    pub fn set<T: PropertyValue>(self, property: Property<T>, value: T) -> Self {
        self.set_value(property.id(), SetterValue::Value(ErasedValue::new(value)))
    }

    /// Adds a setter whose value is cloned for every node.
    #[must_use]
    pub fn set_cloned<T: PropertyValue>(self, property: Property<T>, value: T) -> Self {
        self.set_value(
            property.id(),
            SetterValue::Cloneable(ErasedValue::new(value)),
        )
    }

    /// Adds a setter materialized per node by `factory`.
    #[must_use]
    pub fn set_factory<T>(self, property: Property<T>, factory: Rc<dyn ValueFactory>) -> Self {
        self.set_value(property.id(), SetterValue::Factory(factory))
    }

    /// Adds a setter that reads a resource in the node's scope.
    #[must_use]
    pub fn set_resource<T>(self, property: Property<T>, key: ResourceKey) -> Self {
        self.set_value(property.id(), SetterValue::Resource(key))
    }

    /// Adds a setter with any kind of value.
    #[must_use]
    pub fn set_value(mut self, property: PropertyId, value: SetterValue) -> Self {
        self.records.setters.push(Setter {
            target: None,
            property,
            value,
        });
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.records.triggers.push(trigger);
        self
    }

    /// Attaches a resource dictionary; it is sealed with the style.
    #[must_use]
    pub fn resources(mut self, resources: ResourceDictionary) -> Self {
        self.records.resources = Some(resources);
        self
    }

    /// Finishes the style.
    #[must_use]
    pub fn build(self) -> Style {
        Style {
            inner: Rc::new(StyleInner {
                id: StyleId::next(),
                target_type: self.target_type,
                based_on: self.based_on,
                records: self.records,
                state: RefCell::new(SealState::Open),
            }),
        }
    }
}
