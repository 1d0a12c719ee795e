// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by every fallible engine operation.

use thiserror::Error;
use understory_property::PropertyId;

use crate::node::NodeId;
use crate::resource::ResourceKey;

/// Errors raised by the cascade engine.
///
/// Configuration errors are raised when a style or template is sealed or a
/// theme style is first resolved. They are fatal for the object involved:
/// continuing would produce a silently wrong cascade. Absence of a value
/// or resource is not an error on the tolerant APIs; the strict APIs
/// report it as [`ValueNotFound`](Self::ValueNotFound) or
/// [`ResourceNotFound`](Self::ResourceNotFound).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CascadeError {
    /// Two nodes of one template share a name.
    #[error("duplicate name `{name}` in template")]
    DuplicateName {
        /// The repeated name.
        name: &'static str,
    },
    /// A trigger shape the compiler does not accept.
    #[error("unsupported trigger: {reason}")]
    UnsupportedTrigger {
        /// What is wrong with the trigger.
        reason: &'static str,
    },
    /// A trigger source name or setter target name names no template child.
    #[error("name `{name}` does not refer to a template child")]
    UnresolvedSourceName {
        /// The unresolved name.
        name: &'static str,
    },
    /// A style or template tried to set a reserved property.
    #[error("property `{property}` is reserved and cannot be set by a style or template")]
    ReservedProperty {
        /// Name of the reserved property.
        property: &'static str,
    },
    /// Compilation was requested for an object that is already compiling.
    #[error("style or template is already being compiled")]
    ReentrantCompile,
    /// A theme style refers back to itself through its base chain.
    #[error("theme style for `{type_name}` refers back to itself")]
    CyclicThemeStyle {
        /// Type whose theme style is cyclic.
        type_name: &'static str,
    },
    /// A style or template was applied to a node of an unrelated type.
    #[error("target type `{expected}` does not accept a `{actual}` node")]
    TargetTypeMismatch {
        /// Target type declared by the style or template.
        expected: &'static str,
        /// Type of the node.
        actual: &'static str,
    },
    /// A template would recreate one of its own ancestor containers.
    #[error("template for `{type_name}` instantiates itself")]
    SelfReferentialTemplate {
        /// Type of the recreated container.
        type_name: &'static str,
    },
    /// Nested templates go deeper than the configured limit.
    #[error("template nesting exceeds {limit} levels")]
    TemplateTooDeep {
        /// The configured limit.
        limit: usize,
    },
    /// Strict value lookup found nothing.
    #[error("no value for property {property} on {node:?}")]
    ValueNotFound {
        /// Node that was queried.
        node: NodeId,
        /// Property that was queried.
        property: PropertyId,
    },
    /// Strict value lookup found a value of another type.
    #[error("property {property} does not hold a value of the requested type")]
    TypeMismatch {
        /// Property that was queried.
        property: PropertyId,
    },
    /// Strict resource lookup found nothing.
    #[error("resource {key:?} not found")]
    ResourceNotFound {
        /// Key that was looked up.
        key: ResourceKey,
    },
    /// The node handle refers to a removed node.
    #[error("{0:?} is not a live node")]
    StaleNode(NodeId),
    /// The node already has a tree parent.
    #[error("{0:?} already has a parent")]
    AlreadyAttached(NodeId),
    /// The change would make a node its own ancestor.
    #[error("{0:?} cannot become its own ancestor")]
    CyclicTree(NodeId),
    /// A sealed resource dictionary was mutated.
    #[error("resource dictionary is sealed")]
    SealedDictionary,
}
