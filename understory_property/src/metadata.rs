// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property metadata.
//!
//! [`PropertyMetadata`] holds a property's default value, its
//! [`PropertyFlags`] and optional coerce and change callbacks.

use alloc::boxed::Box;

use crate::value::PropertyValue;

/// Callback invoked when a property's effective value changes.
///
/// Receives the previous effective value, if one was known, and the new one.
pub type PropertyChangedCallback<T> = Box<dyn Fn(Option<&T>, &T) + Send + Sync>;

/// Callback that coerces a value before it is stored locally.
pub type CoerceValueCallback<T> = Box<dyn Fn(T) -> T + Send + Sync>;

bitflags::bitflags! {
    /// Behavior flags of a registered property.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        /// The effective value flows from ancestors when no other source applies.
        const INHERITS = 0b0000_0001;
        /// A node's own template may supply the value through template triggers.
        const TEMPLATE_ELIGIBLE = 0b0000_0010;
        /// Styles and templates may not set this property.
        const RESERVED = 0b0000_0100;
    }
}

impl Default for PropertyFlags {
    fn default() -> Self {
        Self::TEMPLATE_ELIGIBLE
    }
}

/// Metadata for a registered property.
///
/// ```rust
/// use understory_property::{PropertyFlags, PropertyMetadataBuilder};
///
/// let metadata = PropertyMetadataBuilder::new(12.0_f64)
///     .inherits(true)
///     .coerce(|v| v.max(1.0))
///     .build();
///
/// assert_eq!(metadata.default_value(), &12.0);
/// assert!(metadata.flags().contains(PropertyFlags::INHERITS));
/// assert_eq!(metadata.coerce(-4.0), 1.0);
/// ```
pub struct PropertyMetadata<T: PropertyValue> {
    default_value: T,
    flags: PropertyFlags,
    changed_callback: Option<PropertyChangedCallback<T>>,
    coerce_callback: Option<CoerceValueCallback<T>>,
}

impl<T: PropertyValue> PropertyMetadata<T> {
    /// Metadata with default flags and no callbacks.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        PropertyMetadataBuilder::new(default_value).build()
    }

    /// The registered default value.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    /// The behavior flags.
    #[must_use]
    #[inline]
    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// Returns `true` if the property inherits.
    #[must_use]
    #[inline]
    pub fn inherits(&self) -> bool {
        self.flags.contains(PropertyFlags::INHERITS)
    }

    /// Runs the changed callback, if any.
    #[inline]
    pub fn on_changed(&self, old_value: Option<&T>, new_value: &T) {
        if let Some(callback) = &self.changed_callback {
            callback(old_value, new_value);
        }
    }

    /// Runs the coerce callback, if any.
    #[inline]
    pub fn coerce(&self, value: T) -> T {
        match &self.coerce_callback {
            Some(callback) => callback(value),
            None => value,
        }
    }
}

impl<T: PropertyValue> core::fmt::Debug for PropertyMetadata<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("default_value", &self.default_value)
            .field("flags", &self.flags)
            .field("has_changed_callback", &self.changed_callback.is_some())
            .field("has_coerce_callback", &self.coerce_callback.is_some())
            .finish()
    }
}

/// Builder for [`PropertyMetadata`].
pub struct PropertyMetadataBuilder<T: PropertyValue> {
    default_value: T,
    flags: PropertyFlags,
    changed_callback: Option<PropertyChangedCallback<T>>,
    coerce_callback: Option<CoerceValueCallback<T>>,
}

impl<T: PropertyValue> core::fmt::Debug for PropertyMetadataBuilder<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyMetadataBuilder")
            .field("default_value", &self.default_value)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<T: PropertyValue> PropertyMetadataBuilder<T> {
    /// Starts a builder with the given default value.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        Self {
            default_value,
            flags: PropertyFlags::default(),
            changed_callback: None,
            coerce_callback: None,
        }
    }

    /// Sets whether the property inherits from ancestors.
    #[must_use]
    pub fn inherits(mut self, inherits: bool) -> Self {
        self.flags.set(PropertyFlags::INHERITS, inherits);
        self
    }

    /// Sets whether a node's own template may supply the value.
    #[must_use]
    pub fn template_eligible(mut self, eligible: bool) -> Self {
        self.flags.set(PropertyFlags::TEMPLATE_ELIGIBLE, eligible);
        self
    }

    /// Marks the property as reserved: styles and templates may not set it.
    #[must_use]
    pub fn reserved(mut self) -> Self {
        self.flags.insert(PropertyFlags::RESERVED);
        self
    }

    /// Sets a callback for effective value changes.
    #[must_use]
    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&T>, &T) + Send + Sync + 'static,
    {
        self.changed_callback = Some(Box::new(callback));
        self
    }

    /// Sets a callback that coerces local values.
    #[must_use]
    pub fn coerce<F>(mut self, callback: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.coerce_callback = Some(Box::new(callback));
        self
    }

    /// Finishes the metadata.
    #[must_use]
    pub fn build(self) -> PropertyMetadata<T> {
        PropertyMetadata {
            default_value: self.default_value,
            flags: self.flags,
            changed_callback: self.changed_callback,
            coerce_callback: self.coerce_callback,
        }
    }
}
