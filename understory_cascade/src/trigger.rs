// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Triggers: conditional setters and enter/exit actions.
//!
//! A trigger is active while all of its conditions match. Setters of an
//! active trigger take part in the cascade; actions fire only on the
//! transitions between inactive and active.

use std::rc::Rc;

use understory_property::{ErasedValue, Property, PropertyId, PropertyValue};

use crate::node::NodeId;
use crate::style::Setter;
use crate::value::SetterValue;

/// Opaque identifier of a binding expression owned by the binding engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// Identifier of a routed event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventId(pub u32);

/// Identifier of an action understood by the [`ActionSink`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(pub u32);

/// One action of an enter or exit list.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerAction {
    /// What to do.
    pub id: ActionId,
    /// Template child the action targets; `None` targets the trigger's owner.
    pub target: Option<&'static str>,
    /// Optional argument.
    pub payload: Option<ErasedValue>,
}

impl TriggerAction {
    /// An action targeting the trigger's owner.
    #[must_use]
    pub fn new(id: ActionId) -> Self {
        Self {
            id,
            target: None,
            payload: None,
        }
    }

    /// Targets the named template child instead.
    #[must_use]
    pub fn on(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attaches an argument.
    #[must_use]
    pub fn with_payload<T: PropertyValue>(mut self, payload: T) -> Self {
        self.payload = Some(ErasedValue::new(payload));
        self
    }
}

/// Receives trigger actions; the routing collaborator.
pub trait ActionSink {
    /// Runs `actions` against `node`, in order.
    fn dispatch(&mut self, node: NodeId, actions: &[TriggerAction]);
}

/// Reads binding values; the binding collaborator.
///
/// Changes are reported back through
/// [`Engine::binding_changed`](crate::Engine::binding_changed).
pub trait BindingSource {
    /// The current value of `binding` evaluated for `node`.
    fn current_value(&self, node: NodeId, binding: BindingId) -> Option<ErasedValue>;
}

/// What a condition reads.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionSource {
    /// A property of the owner or of a named template child.
    Property {
        /// Template child name, `None` for the owner.
        source_name: Option<&'static str>,
        /// The property read.
        property: PropertyId,
    },
    /// A binding evaluated for the owner.
    Binding(BindingId),
}

/// One equality test of a trigger.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub(crate) source: ConditionSource,
    pub(crate) value: ErasedValue,
}

/// The trigger variants.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerKind {
    /// One property condition.
    Property,
    /// Several property conditions, all of which must match.
    MultiProperty,
    /// One binding condition.
    Data,
    /// Several binding conditions, all of which must match.
    MultiData,
    /// Fires its enter actions when an event is raised; carries no state.
    Event {
        /// The event listened for.
        event: EventId,
        /// Template child the event is listened on, `None` for the owner.
        source_name: Option<&'static str>,
    },
}

/// A conditional rule of a style or template.
///
/// ```rust
/// use understory_cascade::{ActionId, Trigger, TriggerAction};
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let hovered = registry.register("IsMouseOver", PropertyMetadataBuilder::new(false).build());
/// let opacity = registry.register("Opacity", PropertyMetadataBuilder::new(1.0_f64).build());
///
/// let trigger = Trigger::property(hovered, true)
///     .set(opacity, 0.8)
///     .enter(TriggerAction::new(ActionId(1)))
///     .exit(TriggerAction::new(ActionId(2)));
/// # let _ = trigger;
/// ```
#[derive(Clone, Debug)]
pub struct Trigger {
    pub(crate) kind: TriggerKind,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) setters: Vec<Setter>,
    pub(crate) enter_actions: Vec<TriggerAction>,
    pub(crate) exit_actions: Vec<TriggerAction>,
}

impl Trigger {
    fn with_kind(kind: TriggerKind) -> Self {
        Self {
            kind,
            conditions: Vec::new(),
            setters: Vec::new(),
            enter_actions: Vec::new(),
            exit_actions: Vec::new(),
        }
    }

    fn push_property<T: PropertyValue>(
        mut self,
        source_name: Option<&'static str>,
        property: Property<T>,
        value: T,
    ) -> Self {
        self.conditions.push(Condition {
            source: ConditionSource::Property {
                source_name,
                property: property.id(),
            },
            value: ErasedValue::new(value),
        });
        self
    }

    /// A trigger on a property of the owner.
    #[must_use]
    pub fn property<T: PropertyValue>(property: Property<T>, value: T) -> Self {
        Self::with_kind(TriggerKind::Property).push_property(None, property, value)
    }

    /// A trigger on a property of a named template child.
    #[must_use]
    pub fn property_of<T: PropertyValue>(
        source_name: &'static str,
        property: Property<T>,
        value: T,
    ) -> Self {
        Self::with_kind(TriggerKind::Property).push_property(Some(source_name), property, value)
    }

    /// A multi-property trigger; add conditions with [`when`](Self::when).
    #[must_use]
    pub fn multi() -> Self {
        Self::with_kind(TriggerKind::MultiProperty)
    }

    /// A trigger on a binding.
    #[must_use]
    pub fn data<T: PropertyValue>(binding: BindingId, value: T) -> Self {
        Self::with_kind(TriggerKind::Data).when_bound(binding, value)
    }

    /// A multi-binding trigger; add conditions with [`when_bound`](Self::when_bound).
    #[must_use]
    pub fn multi_data() -> Self {
        Self::with_kind(TriggerKind::MultiData)
    }

    /// An event trigger listening on the owner.
    #[must_use]
    pub fn event(event: EventId) -> Self {
        Self::with_kind(TriggerKind::Event {
            event,
            source_name: None,
        })
    }

    /// An event trigger listening on a named template child.
    #[must_use]
    pub fn event_of(source_name: &'static str, event: EventId) -> Self {
        Self::with_kind(TriggerKind::Event {
            event,
            source_name: Some(source_name),
        })
    }

    /// Adds a property condition on the owner.
    #[must_use]
    pub fn when<T: PropertyValue>(self, property: Property<T>, value: T) -> Self {
        self.push_property(None, property, value)
    }

    /// Adds a property condition on a named template child.
    #[must_use]
    pub fn when_of<T: PropertyValue>(
        self,
        source_name: &'static str,
        property: Property<T>,
        value: T,
    ) -> Self {
        self.push_property(Some(source_name), property, value)
    }

    /// Adds a binding condition.
    #[must_use]
    pub fn when_bound<T: PropertyValue>(mut self, binding: BindingId, value: T) -> Self {
        self.conditions.push(Condition {
            source: ConditionSource::Binding(binding),
            value: ErasedValue::new(value),
        });
        self
    }

    /// Adds a setter for the owner.
    #[must_use]
    pub fn set<T: PropertyValue>(self, property: Property<T>, value: T) -> Self {
        self.set_value(None, property.id(), SetterValue::Value(ErasedValue::new(value)))
    }

    /// Adds a setter for a named template child.
    #[must_use]
    pub fn set_on<T: PropertyValue>(
        self,
        target: &'static str,
        property: Property<T>,
        value: T,
    ) -> Self {
        self.set_value(
            Some(target),
            property.id(),
            SetterValue::Value(ErasedValue::new(value)),
        )
    }

    /// Adds a setter with any kind of value.
    #[must_use]
    pub fn set_value(
        mut self,
        target: Option<&'static str>,
        property: PropertyId,
        value: SetterValue,
    ) -> Self {
        self.setters.push(Setter {
            target,
            property,
            value,
        });
        self
    }

    /// Appends an action run when the trigger becomes active.
    #[must_use]
    pub fn enter(mut self, action: TriggerAction) -> Self {
        self.enter_actions.push(action);
        self
    }

    /// Appends an action run when the trigger becomes inactive.
    #[must_use]
    pub fn exit(mut self, action: TriggerAction) -> Self {
        self.exit_actions.push(action);
        self
    }

    /// The variant of this trigger.
    #[must_use]
    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }
}

/// Actions waiting for a template child that does not exist yet.
#[derive(Clone, Debug)]
pub(crate) struct DeferredActions {
    pub(crate) target_child: u32,
    pub(crate) actions: Rc<[TriggerAction]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    None,
    Enter,
    Exit,
}

impl Transition {
    /// The transition between a trigger's stored and freshly evaluated
    /// state.
    pub(crate) fn between(was: bool, now: bool) -> Self {
        match (was, now) {
            (false, true) => Self::Enter,
            (true, false) => Self::Exit,
            _ => Self::None,
        }
    }
}
