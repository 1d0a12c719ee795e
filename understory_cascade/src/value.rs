// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value sources, setter values and per-node instance values.

use std::fmt;
use std::rc::Rc;

use understory_property::{ErasedValue, PropertyId};

use crate::node::NodeId;
use crate::resource::ResourceKey;

/// Where an effective value came from.
///
/// Variants are declared in precedence order: comparing two sources with
/// `<` tells which one wins.
///
/// ```rust
/// use understory_cascade::ValueSource;
///
/// assert!(ValueSource::Local < ValueSource::TemplatedParentTrigger);
/// assert!(ValueSource::StyleTrigger < ValueSource::Style);
/// assert!(ValueSource::Inherited < ValueSource::Default);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueSource {
    /// Set directly on the node.
    Local,
    /// A matching trigger of the templated parent's template.
    TemplatedParentTrigger,
    /// A factory value of the templated parent's template.
    TemplatedParent,
    /// A matching trigger of the node's style.
    StyleTrigger,
    /// A setter of the node's style.
    Style,
    /// A matching trigger of the node's own template.
    TemplateTrigger,
    /// A matching trigger of the node's theme style.
    ThemeStyleTrigger,
    /// A setter of the node's theme style.
    ThemeStyle,
    /// Inherited from an ancestor.
    Inherited,
    /// The property default for the node's type.
    Default,
}

impl ValueSource {
    /// Every source, highest precedence first.
    pub const ALL: [Self; 10] = [
        Self::Local,
        Self::TemplatedParentTrigger,
        Self::TemplatedParent,
        Self::StyleTrigger,
        Self::Style,
        Self::TemplateTrigger,
        Self::ThemeStyleTrigger,
        Self::ThemeStyle,
        Self::Inherited,
        Self::Default,
    ];
}

/// An effective value together with its source.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    /// The value.
    pub value: ErasedValue,
    /// The winning source.
    pub source: ValueSource,
}

/// Cache entry of an effective value.
#[derive(Clone, Debug)]
pub(crate) struct Effective {
    pub(crate) resolved: Resolved,
    /// The value was looked up through a resource reference.
    pub(crate) from_resource: bool,
}

/// The value half of a setter.
#[derive(Clone)]
pub enum SetterValue {
    /// A plain value shared by every node the record applies to.
    Value(ErasedValue),
    /// A mutable object; each node receives its own clone.
    Cloneable(ErasedValue),
    /// A descriptor materialized once per node.
    Factory(Rc<dyn ValueFactory>),
    /// A reference resolved in the node's resource scope each time it is read.
    Resource(ResourceKey),
}

impl SetterValue {
    /// Returns `true` if the value has to be materialized per node.
    #[must_use]
    pub fn needs_instance(&self) -> bool {
        matches!(self, Self::Cloneable(_) | Self::Factory(_))
    }
}

impl fmt::Debug for SetterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Cloneable(value) => f.debug_tuple("Cloneable").field(value).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Resource(key) => f.debug_tuple("Resource").field(key).finish(),
        }
    }
}

/// Produces node-specific values for a shared record.
pub trait ValueFactory {
    /// Materializes the value for `property` on `node`.
    fn create(&self, node: NodeId, property: PropertyId) -> InstanceValue;
}

/// An expression attached to one node's property.
///
/// Attach and detach are lifecycle hooks; the engine never calls `detach`
/// twice for one attachment.
pub trait Expression {
    /// Called once when the expression is stored for `node`.
    fn attach(&self, node: NodeId, property: PropertyId);
    /// Called once when the stored expression is released.
    fn detach(&self, node: NodeId, property: PropertyId);
    /// The current value, `None` if the expression has nothing to offer.
    fn value(&self) -> Option<ErasedValue>;
}

/// A materialized per-node value.
#[derive(Clone)]
pub enum InstanceValue {
    /// A concrete value.
    Value(ErasedValue),
    /// An attached expression.
    Expression(Rc<dyn Expression>),
}

impl InstanceValue {
    /// The value the cascade reads.
    #[must_use]
    pub fn current(&self) -> Option<ErasedValue> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Expression(expression) => expression.value(),
        }
    }
}

impl fmt::Debug for InstanceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Expression(_) => f.write_str("Expression(..)"),
        }
    }
}
