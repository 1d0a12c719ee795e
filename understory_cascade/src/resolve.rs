// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The cascade resolver.

use understory_property::{ErasedValue, PropertyFlags, PropertyId};

use crate::engine::Engine;
use crate::instance::{InstanceKey, InstanceLayer};
use crate::node::{NodeFlags, NodeId};
use crate::style::Style;
use crate::table::{CompiledCondition, CompiledTable, Record, TriggerSource};
use crate::template::Template;
use crate::value::{Effective, Resolved, SetterValue, ValueSource};

/// One compiled table as seen from the node being resolved.
pub(crate) struct Layer<'a> {
    /// Node owning the table and the instance store.
    pub(crate) owner: NodeId,
    pub(crate) layer: InstanceLayer,
    /// Child index of the resolved node within the owner's template.
    pub(crate) child: u32,
    pub(crate) table: &'a CompiledTable,
    pub(crate) trigger_source: ValueSource,
    /// Source reported for unconditional records; `None` skips them.
    pub(crate) simple_source: Option<ValueSource>,
}

impl Engine {
    /// The effective value of `property` on `node` and where it came from.
    ///
    /// Returns `None` for stale nodes and unregistered properties. Results
    /// are cached until an invalidation reaches them.
    pub fn resolve(&mut self, node: NodeId, property: PropertyId) -> Option<Resolved> {
        if let Some(effective) = self.tree.get(node)?.effective.get(&property) {
            return Some(effective.resolved.clone());
        }
        self.registry.get(property)?;
        let effective = self.compute(node, property)?;
        let resolved = effective.resolved.clone();
        self.tree.get_mut(node)?.effective.insert(property, effective);
        Some(resolved)
    }

    fn compute(&mut self, node: NodeId, property: PropertyId) -> Option<Effective> {
        let (result, read) = self.tracking_resources(|e| e.compute_uncached(node, property));
        result.map(|(value, source)| Effective {
            resolved: Resolved { value, source },
            from_resource: read,
        })
    }

    /// Runs `f` and reports whether it read a resource reference.
    fn tracking_resources<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> (R, bool) {
        let outer = std::mem::take(&mut self.resource_read);
        let result = f(self);
        let read = self.resource_read;
        self.resource_read = outer || read;
        (result, read)
    }

    fn compute_uncached(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Option<(ErasedValue, ValueSource)> {
        if let Some(own) = self.compute_own(node, property) {
            return Some(own);
        }
        if self.registry.inherits(property)
            && let Some(value) = self.inherited_value(node, property)
        {
            return Some((value, ValueSource::Inherited));
        }
        let ty = self.tree.get(node)?.object_type;
        let value = self.registry.default_for(Some(ty), property)?.clone();
        Some((value, ValueSource::Default))
    }

    /// Everything above inheritance: local value, templated parent, style,
    /// template and theme style.
    pub(crate) fn compute_own(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Option<(ErasedValue, ValueSource)> {
        self.resolving.push((node, property));
        let result = self.compute_layers(node, property);
        self.resolving.pop();
        result
    }

    fn compute_layers(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Option<(ErasedValue, ValueSource)> {
        let n = self.tree.get(node)?;
        if let Some(value) = n.locals.get(property) {
            return Some((value.clone(), ValueSource::Local));
        }
        let child = n.child_index;
        let templated = n.templated_parent.and_then(|tp| {
            let table = self.tree.get(tp)?.template.as_ref()?.compiled()?;
            Some((tp, table))
        });
        let style = n.style.as_ref().and_then(Style::compiled);
        let template = n.template.as_ref().and_then(Template::compiled);
        let theme = n.theme_style.as_ref().and_then(Style::compiled);

        if let Some((owner, table)) = &templated {
            let layer = Layer {
                owner: *owner,
                layer: InstanceLayer::Template,
                child,
                table: table.as_ref(),
                trigger_source: ValueSource::TemplatedParentTrigger,
                simple_source: Some(ValueSource::TemplatedParent),
            };
            if let Some(found) = self.lookup(&layer, node, property) {
                return Some(found);
            }
        }
        if let Some(table) = &style {
            let layer = Layer {
                owner: node,
                layer: InstanceLayer::Style,
                child: 0,
                table: table.as_ref(),
                trigger_source: ValueSource::StyleTrigger,
                simple_source: Some(ValueSource::Style),
            };
            if let Some(found) = self.lookup(&layer, node, property) {
                return Some(found);
            }
        }
        if let Some(table) = &template
            && self
                .registry
                .flags(property)
                .contains(PropertyFlags::TEMPLATE_ELIGIBLE)
        {
            let layer = Layer {
                owner: node,
                layer: InstanceLayer::Template,
                child: 0,
                table: table.as_ref(),
                trigger_source: ValueSource::TemplateTrigger,
                simple_source: None,
            };
            if let Some(found) = self.lookup(&layer, node, property) {
                return Some(found);
            }
        }
        if let Some(table) = &theme {
            let layer = Layer {
                owner: node,
                layer: InstanceLayer::ThemeStyle,
                child: 0,
                table: table.as_ref(),
                trigger_source: ValueSource::ThemeStyleTrigger,
                simple_source: Some(ValueSource::ThemeStyle),
            };
            if let Some(found) = self.lookup(&layer, node, property) {
                return Some(found);
            }
        }
        None
    }

    /// The winning record of one table: the last matching trigger record,
    /// else the last unconditional record.
    fn lookup(
        &mut self,
        layer: &Layer<'_>,
        target: NodeId,
        property: PropertyId,
    ) -> Option<(ErasedValue, ValueSource)> {
        let records = layer.table.records(layer.child, property);
        for record in records.iter().rev() {
            let Some(trigger) = record.trigger else {
                continue;
            };
            if self.trigger_active(layer.owner, layer.table, trigger)
                && let Some(value) = self.materialize(layer, record, target, property)
            {
                return Some((value, layer.trigger_source));
            }
        }
        let source = layer.simple_source?;
        records
            .iter()
            .rev()
            .filter(|record| record.trigger.is_none())
            .find_map(|record| self.materialize(layer, record, target, property))
            .map(|value| (value, source))
    }

    /// Turns a record into a value for `target`.
    ///
    /// Per-node values come from the owner's instance store; resource
    /// references are looked up in the target's scope. Values of the wrong
    /// type are skipped.
    pub(crate) fn materialize(
        &mut self,
        layer: &Layer<'_>,
        record: &Record,
        target: NodeId,
        property: PropertyId,
    ) -> Option<ErasedValue> {
        let expected = self.registry.get(property)?.value_type_id();
        let value = match &record.value {
            SetterValue::Value(value) => value.clone(),
            SetterValue::Resource(key) => {
                self.resource_read = true;
                self.try_find_resource(target, *key)?.as_value()?.clone()
            }
            raw => {
                let key = InstanceKey {
                    layer: layer.layer,
                    child_index: layer.child,
                    property,
                    slot: record.slot,
                };
                self.tree
                    .get_mut(layer.owner)?
                    .instances
                    .get_or_create(key, raw, target)?
            }
        };
        (value.value_type_id() == expected).then_some(value)
    }

    /// Walks inheritance parents for the nearest own value.
    ///
    /// Stops below an inheritance boundary; the boundary itself is not
    /// consulted. Cached ancestor values short-cut the walk.
    fn inherited_value(&mut self, node: NodeId, property: PropertyId) -> Option<ErasedValue> {
        let mut current = node;
        loop {
            let parent = self.tree.inheritance_parent(current)?;
            let p = self.tree.get(parent)?;
            if p.flags.contains(NodeFlags::INHERITANCE_BOUNDARY) {
                return None;
            }
            if let Some(effective) = p.effective.get(&property) {
                return match effective.resolved.source {
                    ValueSource::Default => None,
                    _ => Some(effective.resolved.value.clone()),
                };
            }
            let (own, read) = self.tracking_resources(|e| e.compute_own(parent, property));
            if let Some((value, source)) = own {
                self.tree.get_mut(parent)?.effective.insert(
                    property,
                    Effective {
                        resolved: Resolved {
                            value: value.clone(),
                            source,
                        },
                        from_resource: read,
                    },
                );
                return Some(value);
            }
            current = parent;
        }
    }

    pub(crate) fn trigger_active(
        &mut self,
        owner: NodeId,
        table: &CompiledTable,
        idx: usize,
    ) -> bool {
        table
            .trigger(idx)
            .conditions
            .iter()
            .all(|condition| self.condition_holds(owner, condition))
    }

    /// Reads one condition live.
    pub(crate) fn condition_holds(&mut self, owner: NodeId, condition: &CompiledCondition) -> bool {
        match condition.source {
            TriggerSource::Property { child, property } => {
                let Some(target) = self.tree.template_child(owner, child) else {
                    return false;
                };
                if self.resolving.contains(&(target, property)) {
                    tracing::warn!(
                        node = ?target,
                        %property,
                        "reentrant resolution; treating trigger condition as not matching"
                    );
                    return false;
                }
                self.resolve(target, property)
                    .is_some_and(|resolved| resolved.value == condition.value)
            }
            TriggerSource::Binding(binding) => self
                .bindings
                .current_value(owner, binding)
                .is_some_and(|value| value == condition.value),
        }
    }
}
