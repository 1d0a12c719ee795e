// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Property: property identity, metadata and local storage.
//!
//! This crate is the bottom layer of the style cascade. It defines what a
//! property *is*; `understory_cascade` decides what value it *has*.
//!
//! ## Core Concepts
//!
//! - [`PropertyRegistry`] registers properties ([`Property<T>`]) and node
//!   types ([`ObjectType`]). Each property has a default, [`PropertyFlags`]
//!   and optional callbacks. Defaults can be overridden per type with
//!   fallback along the base-type chain.
//! - [`ErasedValue`] stores any [`PropertyValue`] behind a box and can
//!   compare two erased values for equality, which trigger matching and
//!   change detection depend on.
//! - [`PropertyStore`] holds the local values of a single node.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_property::{PropertyMetadataBuilder, PropertyRegistry, PropertyStore};
//!
//! let mut registry = PropertyRegistry::new();
//! let font_size = registry.register(
//!     "FontSize",
//!     PropertyMetadataBuilder::new(12.0_f64).inherits(true).build(),
//! );
//! let control = registry.register_type("Control", None);
//! let heading = registry.register_type("Heading", Some(control));
//! registry.override_default(heading, font_size, 24.0);
//!
//! let mut store = PropertyStore::new();
//! assert!(store.get_local(font_size).is_none());
//! store.set_local(font_size, 16.0, &registry);
//! assert_eq!(store.get_local(font_size), Some(&16.0));
//!
//! let default = registry.default_for(Some(heading), font_size.id());
//! assert_eq!(default.and_then(|v| v.get::<f64>()), Some(24.0));
//! ```
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod id;
mod metadata;
mod registry;
mod store;
mod value;

pub use id::{ObjectType, Property, PropertyId};
pub use metadata::{
    CoerceValueCallback, PropertyChangedCallback, PropertyFlags, PropertyMetadata,
    PropertyMetadataBuilder,
};
pub use registry::{PropertyRegistration, PropertyRegistry};
pub use store::PropertyStore;
pub use value::{ErasedValue, PropertyValue};
