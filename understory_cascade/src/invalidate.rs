// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Invalidation propagation and trigger firing.
//!
//! A change to one `(node, property)` pair is pushed through a FIFO queue.
//! Each change looks up the compiled tables that can read the pair as a
//! trigger source, re-resolves exactly the pairs those tables list as
//! dependents, re-evaluates the triggers reading it, and finally walks
//! inheriting descendants. Changes discovered on the way are appended to the queue,
//! so notifications are delivered in a stable order.

use std::collections::VecDeque;
use std::rc::Rc;

use understory_property::PropertyId;

use crate::engine::Engine;
use crate::error::CascadeError;
use crate::instance::InstanceLayer;
use crate::node::{Node, NodeFlags, NodeId};
use crate::style::Style;
use crate::table::{CompiledTable, TriggerSource};
use crate::template::Template;
use crate::trigger::{BindingId, DeferredActions, EventId, Transition};
use crate::value::ValueSource;

/// An effective value that changed.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Change {
    pub(crate) node: NodeId,
    pub(crate) property: PropertyId,
}

impl Engine {
    /// Re-resolves `property` on `node` after its inputs changed outside
    /// the engine's knowledge, and propagates the result.
    pub fn invalidate(&mut self, node: NodeId, property: PropertyId) -> Result<(), CascadeError> {
        self.node(node)?;
        let mut queue = VecDeque::new();
        if let Some(change) = self.refresh(node, property) {
            queue.push_back(change);
        }
        self.propagate(queue);
        if property == self.reserved.default_style_key.id() {
            self.update_theme_style(node)?;
        }
        Ok(())
    }

    /// Raises an event on `node`, firing the enter actions of event
    /// triggers listening to it.
    pub fn raise_event(&mut self, node: NodeId, event: EventId) -> Result<(), CascadeError> {
        self.node(node)?;
        for (owner, _, table, child) in self.dependent_tables(node) {
            for &idx in table.event_triggers(child, event) {
                tracing::trace!(?node, ?owner, ?event, trigger = idx, "event trigger fired");
                self.fire(owner, &table, idx, Transition::Enter);
            }
        }
        Ok(())
    }

    /// Tells the engine that a binding read by data triggers of `node`
    /// changed value.
    ///
    /// The new value is read back through the engine's [`BindingSource`].
    ///
    /// [`BindingSource`]: crate::BindingSource
    pub fn binding_changed(
        &mut self,
        node: NodeId,
        binding: BindingId,
    ) -> Result<(), CascadeError> {
        self.node(node)?;
        let source = TriggerSource::Binding(binding);
        let mut queue = VecDeque::new();
        for (owner, layer, table, _) in self.dependent_tables(node) {
            if owner == node {
                self.source_changed(owner, layer, &table, source, &mut queue);
            }
        }
        self.propagate(queue);
        Ok(())
    }

    /// Tells the engine that an expression attached to `(node, property)`
    /// detached itself.
    ///
    /// The entry is dropped without running its detach hook and the next
    /// resolution materializes a fresh value from the same record.
    pub fn expression_detached(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Result<(), CascadeError> {
        let n = self.node_mut(node)?;
        let mut marked = n.instances.mark_detached(node, property);
        if let Some(container) = n.templated_parent
            && let Some(c) = self.tree.get_mut(container)
        {
            marked += c.instances.mark_detached(node, property);
        }
        tracing::debug!(?node, %property, marked, "expression detached");
        self.invalidate(node, property)
    }

    // --- Assignment ------------------------------------------------------

    /// Replaces one compiled table of `node` and brings the cascade up to date.
    ///
    /// Instance values and trigger states of the old table are dropped
    /// before `assign` runs, without exit actions. Every container property
    /// either table sets is re-resolved, then the new table's triggers that
    /// already match and have not entered on the way fire their enter actions.
    pub(crate) fn swap(
        &mut self,
        node: NodeId,
        layer: InstanceLayer,
        table: Option<Rc<CompiledTable>>,
        assign: impl FnOnce(&mut Node),
    ) -> Result<(), CascadeError> {
        let previous = self.table_of(node, layer);
        let n = self.node_mut(node)?;
        n.instances.release_layer(layer);
        n.active_triggers.retain(|(l, _)| *l != layer);
        assign(n);

        let mut properties: Vec<PropertyId> = previous
            .iter()
            .chain(table.iter())
            .flat_map(|t| t.container_dependent().iter().copied())
            .filter(|p| !n.locals.contains(*p))
            .collect();
        properties.sort_unstable();
        properties.dedup();

        let mut queue = VecDeque::new();
        for property in properties {
            if let Some(change) = self.refresh(node, property) {
                queue.push_back(change);
            }
        }
        self.propagate(queue);

        if let Some(table) = &table {
            self.prime(node, layer, table, false);
        }

        let scoped = |t: &Option<Rc<CompiledTable>>| {
            t.as_ref().is_some_and(|t| !t.resources().is_empty())
        };
        if (scoped(&previous) || scoped(&table)) && !self.rechecking {
            self.rechecking = true;
            let result = self.rescope(node);
            self.rechecking = false;
            result?;
        }
        Ok(())
    }

    /// Re-checks resource dependents after the resources of `node`'s own
    /// style or template changed.
    fn rescope(&mut self, node: NodeId) -> Result<(), CascadeError> {
        let mut queue = VecDeque::new();
        self.refresh_cached(node, false, &mut queue);
        self.propagate(queue);
        for dependent in self.tree.dependents(node) {
            self.refresh_subtree(dependent, false)?;
        }
        Ok(())
    }

    pub(crate) fn table_of(&self, node: NodeId, layer: InstanceLayer) -> Option<Rc<CompiledTable>> {
        let n = self.tree.get(node)?;
        match layer {
            InstanceLayer::Style => n.style.as_ref().and_then(Style::compiled),
            InstanceLayer::ThemeStyle => n.theme_style.as_ref().and_then(Style::compiled),
            InstanceLayer::Template => n.template.as_ref().and_then(Template::compiled),
        }
    }

    /// Evaluates the sources of a freshly applied table and fires enter
    /// actions of the triggers that already match.
    ///
    /// With `children` unset only container-side triggers are primed;
    /// triggers reading generated children are primed once those exist.
    pub(crate) fn prime(
        &mut self,
        owner: NodeId,
        layer: InstanceLayer,
        table: &CompiledTable,
        children: bool,
    ) {
        for source in table.sources() {
            if let TriggerSource::Property { child, property } = *source
                && (child > 0) == children
                && let Some(target) = self.tree.template_child(owner, child)
            {
                self.resolve(target, property);
            }
        }
        for (idx, trigger) in table.triggers().iter().enumerate() {
            if trigger.reads_children == children && !trigger.conditions.is_empty() {
                self.update_trigger(owner, layer, table, idx);
            }
        }
    }

    /// Re-evaluates one trigger against live values and fires its enter or
    /// exit actions if its stored state flips.
    fn update_trigger(
        &mut self,
        owner: NodeId,
        layer: InstanceLayer,
        table: &CompiledTable,
        idx: usize,
    ) {
        let active = self.trigger_active(owner, table, idx);
        let Some(n) = self.tree.get_mut(owner) else {
            return;
        };
        let was = n.active_triggers.contains(&(layer, idx));
        if active {
            n.active_triggers.insert((layer, idx));
        } else {
            n.active_triggers.remove(&(layer, idx));
        }
        self.fire(owner, table, idx, Transition::between(was, active));
    }

    // --- Propagation -----------------------------------------------------

    /// Re-resolves `node`'s own cached values that read resources and, when
    /// `inherited` is set, those that came from inheritance; then does the
    /// same for every dependent. Implicit styles are re-checked on the way.
    pub(crate) fn refresh_subtree(
        &mut self,
        root: NodeId,
        inherited: bool,
    ) -> Result<(), CascadeError> {
        let mut queue = VecDeque::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !self.tree.is_alive(id) {
                continue;
            }
            self.update_implicit_style(id)?;
            self.refresh_cached(id, inherited, &mut queue);
            stack.extend(self.tree.dependents(id).into_iter().rev());
        }
        self.propagate(queue);
        Ok(())
    }

    fn refresh_cached(&mut self, node: NodeId, inherited: bool, queue: &mut VecDeque<Change>) {
        let Some(n) = self.tree.get(node) else {
            return;
        };
        let mut properties: Vec<PropertyId> = n
            .effective
            .iter()
            .filter(|(property, effective)| {
                effective.from_resource
                    || (inherited
                        && match effective.resolved.source {
                            ValueSource::Inherited => true,
                            ValueSource::Default => self.registry.inherits(**property),
                            _ => false,
                        })
            })
            .map(|(property, _)| *property)
            .collect();
        properties.sort_unstable();
        for property in properties {
            if let Some(change) = self.refresh(node, property) {
                queue.push_back(change);
            }
        }
    }

    /// Drops the cached value of one pair and resolves it again.
    ///
    /// Returns the change if the value differs from the cached one.
    pub(crate) fn refresh(&mut self, node: NodeId, property: PropertyId) -> Option<Change> {
        let old = self
            .tree
            .get_mut(node)?
            .effective
            .remove(&property)
            .map(|effective| effective.resolved.value);
        let new = self.resolve(node, property)?.value;
        if old.as_ref() == Some(&new) {
            return None;
        }
        self.registry.notify_changed(property, old.as_ref(), &new);
        Some(Change { node, property })
    }

    pub(crate) fn propagate(&mut self, mut queue: VecDeque<Change>) {
        while let Some(change) = queue.pop_front() {
            self.property_changed(&change, &mut queue);
        }
    }

    fn property_changed(&mut self, change: &Change, queue: &mut VecDeque<Change>) {
        tracing::trace!(node = ?change.node, property = %change.property, "value changed");
        for (owner, layer, table, child) in self.dependent_tables(change.node) {
            let source = TriggerSource::Property {
                child,
                property: change.property,
            };
            self.source_changed(owner, layer, &table, source, queue);
        }
        if self.registry.inherits(change.property) {
            self.propagate_inherited(change.node, change.property, queue);
        }
    }

    /// Re-resolves the dependents a table lists for `source` and
    /// re-evaluates the triggers reading it.
    ///
    /// Dependents are refreshed first, so a trigger whose other conditions
    /// changed earlier in the same batch already sees their new values; its
    /// stored state keeps it from entering twice.
    fn source_changed(
        &mut self,
        owner: NodeId,
        layer: InstanceLayer,
        table: &CompiledTable,
        source: TriggerSource,
        queue: &mut VecDeque<Change>,
    ) {
        for &(child, property) in table.dependents(&source) {
            let Some(target) = self.tree.template_child(owner, child) else {
                continue;
            };
            if self
                .tree
                .get(target)
                .is_some_and(|n| n.locals.contains(property))
            {
                continue;
            }
            if self.config.record_invalidations() {
                self.invalidations.push((target, property));
            }
            tracing::trace!(?target, %property, ?source, "trigger source invalidated value");
            if let Some(change) = self.refresh(target, property) {
                queue.push_back(change);
            }
        }
        for &idx in table.triggers_reading(&source) {
            self.update_trigger(owner, layer, table, idx);
        }
    }

    /// Walks the inheritance dependents of `from` after an inheriting
    /// property changed there.
    fn propagate_inherited(
        &mut self,
        from: NodeId,
        property: PropertyId,
        queue: &mut VecDeque<Change>,
    ) {
        let Some(n) = self.tree.get(from) else {
            return;
        };
        if n.flags.contains(NodeFlags::INHERITANCE_BOUNDARY) {
            return;
        }
        let mut stack = self.tree.dependents(from);
        stack.reverse();
        while let Some(id) = stack.pop() {
            let cached = self
                .tree
                .get(id)
                .and_then(|n| n.effective.get(&property))
                .map(|e| e.resolved.source);
            match cached {
                Some(ValueSource::Inherited | ValueSource::Default) => {
                    if let Some(change) = self.refresh(id, property) {
                        queue.push_back(change);
                    }
                }
                Some(_) => {}
                None => {
                    let source = self.resolve(id, property).map(|r| r.source);
                    let boundary = self
                        .tree
                        .get(id)
                        .is_some_and(|n| n.flags.contains(NodeFlags::INHERITANCE_BOUNDARY));
                    if matches!(source, Some(ValueSource::Inherited | ValueSource::Default))
                        && !boundary
                    {
                        let mut below = self.tree.dependents(id);
                        below.reverse();
                        stack.extend(below);
                    }
                }
            }
        }
    }

    /// Tables that can read properties of `node` as trigger sources, with
    /// the owner, the table's layer on that owner, and `node`'s child index
    /// relative to that owner.
    pub(crate) fn dependent_tables(
        &self,
        node: NodeId,
    ) -> Vec<(NodeId, InstanceLayer, Rc<CompiledTable>, u32)> {
        let Some(n) = self.tree.get(node) else {
            return Vec::new();
        };
        let own = [
            (InstanceLayer::Style, n.style.as_ref().and_then(Style::compiled)),
            (InstanceLayer::Template, n.template.as_ref().and_then(Template::compiled)),
            (InstanceLayer::ThemeStyle, n.theme_style.as_ref().and_then(Style::compiled)),
        ];
        let mut tables: Vec<_> = own
            .into_iter()
            .filter_map(|(layer, table)| Some((node, layer, table?, 0)))
            .collect();
        if let Some(container) = n.templated_parent
            && let Some(table) = self
                .tree
                .get(container)
                .and_then(|c| c.template.as_ref())
                .and_then(Template::compiled)
        {
            tables.push((container, InstanceLayer::Template, table, n.child_index));
        }
        tables
    }

    /// Dispatches the actions of one transition.
    ///
    /// Actions aimed at a child that does not exist yet are queued on the
    /// owner and delivered once the child is generated.
    pub(crate) fn fire(
        &mut self,
        owner: NodeId,
        table: &CompiledTable,
        idx: usize,
        transition: Transition,
    ) {
        let trigger = table.trigger(idx);
        let runs = match transition {
            Transition::None => return,
            Transition::Enter => &trigger.enter,
            Transition::Exit => &trigger.exit,
        };
        for run in runs {
            match self.tree.template_child(owner, run.child) {
                Some(target) => {
                    tracing::trace!(
                        ?target,
                        ?transition,
                        count = run.actions.len(),
                        "dispatching trigger actions"
                    );
                    self.actions.dispatch(target, &run.actions);
                }
                None => {
                    tracing::debug!(
                        ?owner,
                        child = run.child,
                        "target not generated yet; deferring actions"
                    );
                    if let Some(n) = self.tree.get_mut(owner) {
                        n.deferred.push(DeferredActions {
                            target_child: run.child,
                            actions: run.actions.clone(),
                        });
                    }
                }
            }
        }
    }
}
