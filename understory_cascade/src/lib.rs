// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Cascade: styles, templates, triggers and resources over a
//! retained node tree.
//!
//! The [`Engine`] owns a tree of nodes and answers one question: what is
//! the effective value of a property on a node, and where did it come
//! from? Values are layered in a fixed precedence order, highest first:
//!
//! 1. local values set on the node,
//! 2. triggers of the templated parent's template,
//! 3. factory values of the templated parent's template,
//! 4. triggers of the node's style,
//! 5. setters of the node's style,
//! 6. triggers of the node's own template,
//! 7. triggers of the theme style,
//! 8. setters of the theme style,
//! 9. values inherited from ancestors,
//! 10. the property default.
//!
//! [`ValueSource`] names these layers; [`Engine::resolve`] reports which
//! one won.
//!
//! ## Core Concepts
//!
//! - A [`Style`] is a sealed bundle of setters, [`Trigger`]s and
//!   resources, optionally based on another style. A [`Template`] adds a
//!   tree of [`FactoryNode`]s that is instantiated under a container with
//!   [`Engine::instantiate_template`]. Both compile to a shared table on
//!   first use and are immutable afterwards.
//! - Triggers fire enter and exit actions through an [`ActionSink`] when
//!   their conditions start or stop matching. Data triggers read values
//!   from a [`BindingSource`].
//! - [`ResourceDictionary`] scopes are searched from a node up through its
//!   ancestors, then application, theme and [`SystemResources`].
//! - Changes propagate through reverse indices: only values that actually
//!   depend on a changed trigger source are re-resolved.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_cascade::{Engine, EngineConfig, Style, Trigger, ValueSource};
//! use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
//!
//! let mut registry = PropertyRegistry::new();
//! let hovered = registry.register("IsMouseOver", PropertyMetadataBuilder::new(false).build());
//! let fill = registry.register("Fill", PropertyMetadataBuilder::new(0_u32).build());
//! let button = registry.register_type("Button", None);
//!
//! let mut engine = Engine::new(registry, EngineConfig::default());
//! let node = engine.create_node(button).unwrap();
//! let style = Style::builder()
//!     .set(fill, 1)
//!     .trigger(Trigger::property(hovered, true).set(fill, 2))
//!     .build();
//! engine.apply_style(node, Some(style)).unwrap();
//!
//! engine.set_local(node, hovered, true).unwrap();
//! let resolved = engine.resolve(node, fill.id()).unwrap();
//! assert_eq!(resolved.value.get::<u32>(), Some(2));
//! assert_eq!(resolved.source, ValueSource::StyleTrigger);
//! ```
//!
//! ## Threading
//!
//! Everything is single-threaded and synchronous. Engines, styles,
//! templates and dictionaries cannot leave their thread:
//!
//! ```rust,compile_fail
//! fn assert_send<T: Send>() {}
//! assert_send::<understory_cascade::Engine>();
//! ```
//!
//! Only [`SystemResources`] is shared across threads.

mod config;
mod engine;
mod error;
mod instance;
mod instantiate;
mod invalidate;
mod node;
mod resolve;
mod resource;
mod style;
mod table;
mod template;
mod trigger;
mod value;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{Engine, ReservedProperties};
pub use error::CascadeError;
pub use node::{NodeFlags, NodeId};
pub use resource::{
    DeferredResource, ResourceDictionary, ResourceKey, ResourceValue, SystemProvider,
    SystemResources,
};
pub use style::{BasedOn, Setter, Style, StyleBuilder, StyleId};
pub use template::{FactoryNode, FactoryTemplate, Template, TemplateBuilder};
pub use trigger::{
    ActionId, ActionSink, BindingId, BindingSource, Condition, ConditionSource, EventId, Trigger,
    TriggerAction, TriggerKind,
};
pub use value::{Expression, InstanceValue, Resolved, SetterValue, ValueFactory, ValueSource};
