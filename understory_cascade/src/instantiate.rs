// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Template instantiation.

use std::collections::VecDeque;

use understory_property::ErasedValue;

use crate::engine::Engine;
use crate::error::CascadeError;
use crate::instance::InstanceLayer;
use crate::node::{Node, NodeFlags, NodeId};
use crate::resolve::Layer;
use crate::table::{CompiledTable, TriggerSource};
use crate::template::{FactoryTemplate, Template};
use crate::value::ValueSource;

impl Engine {
    /// Builds the generated subtree of `container` from `template`.
    ///
    /// Applies the template first if it is not the container's current
    /// one; otherwise the previous generated subtree is discarded. Nested
    /// templates of generated nodes are instantiated as well. Returns the
    /// container's generated nodes in child-index order.
    ///
    /// On error the partially built subtree is removed again.
    pub fn instantiate_template(
        &mut self,
        container: NodeId,
        template: &Template,
    ) -> Result<Vec<NodeId>, CascadeError> {
        let applied = self
            .node(container)?
            .template
            .as_ref()
            .is_some_and(|t| t.ptr_eq(template));
        if applied {
            self.destroy_generated(container)?;
        } else {
            self.apply_template(container, Some(template.clone()))?;
        }
        match self.build_generated(container) {
            Ok(count) => {
                tracing::debug!(?container, nodes = count, "instantiated template");
                Ok(self.node(container)?.generated.clone())
            }
            Err(err) => {
                self.destroy_generated(container)?;
                Err(err)
            }
        }
    }

    /// Destroys the generated subtree of `container` and its per-child
    /// instance values.
    pub(crate) fn destroy_generated(&mut self, container: NodeId) -> Result<(), CascadeError> {
        let table = self.table_of(container, InstanceLayer::Template);
        let Some(n) = self.tree.get_mut(container) else {
            return Ok(());
        };
        if n.generated.is_empty() {
            return Ok(());
        }
        let generated = std::mem::take(&mut n.generated);
        n.name_scope.clear();
        if let Some(table) = &table {
            // Child triggers enter again once the next generation is primed.
            n.active_triggers.retain(|&(layer, idx)| {
                layer != InstanceLayer::Template || !table.trigger(idx).reads_children
            });
        }
        n.instances.release_children();
        n.children.retain(|c| !generated.contains(c));
        let mut orphans = Vec::new();
        for id in generated {
            if self.tree.get(id).is_some_and(|g| g.parent == Some(container)) {
                orphans.extend(self.destroy_subtree(id));
            }
        }
        for orphan in orphans {
            self.refresh_subtree(orphan, true)?;
        }
        Ok(())
    }

    fn build_generated(&mut self, container: NodeId) -> Result<usize, CascadeError> {
        let mut depth = 0;
        let mut current = self.node(container)?.templated_parent;
        while let Some(id) = current {
            depth += 1;
            current = self.tree.get(id).and_then(|n| n.templated_parent);
        }
        let mut count = 0;
        let mut work = VecDeque::from([(container, depth)]);
        while let Some((owner, depth)) = work.pop_front() {
            let Some(table) = self.table_of(owner, InstanceLayer::Template) else {
                continue;
            };
            let ids = self.generate(owner, &table)?;
            count += ids.len();
            for (factory, id) in table.factories().iter().zip(&ids) {
                let Some(nested) = &factory.template else {
                    continue;
                };
                let template = match nested {
                    FactoryTemplate::Template(template) => template.clone(),
                    FactoryTemplate::Resource(key) => self
                        .try_find_resource(*id, *key)
                        .and_then(|v| v.as_template().cloned())
                        .ok_or(CascadeError::ResourceNotFound { key: *key })?,
                };
                self.check_self_reference(*id, &template)?;
                if depth + 1 > self.config.max_template_depth() {
                    return Err(CascadeError::TemplateTooDeep {
                        limit: self.config.max_template_depth(),
                    });
                }
                self.apply_template(*id, Some(template))?;
                work.push_back((*id, depth + 1));
            }
        }
        Ok(count)
    }

    /// Rejects a template that would recreate one of the containers it is
    /// already nested in.
    fn check_self_reference(&self, node: NodeId, template: &Template) -> Result<(), CascadeError> {
        let ty = self.node(node)?.object_type;
        let mut current = self.node(node)?.templated_parent;
        while let Some(id) = current {
            let Some(ancestor) = self.tree.get(id) else {
                break;
            };
            if ancestor.object_type == ty
                && ancestor.template.as_ref().is_some_and(|t| t.ptr_eq(template))
            {
                return Err(CascadeError::SelfReferentialTemplate {
                    type_name: self.type_name(ty),
                });
            }
            current = ancestor.templated_parent;
        }
        Ok(())
    }

    /// Creates one level of generated nodes for `owner` and wires them up.
    fn generate(
        &mut self,
        owner: NodeId,
        table: &CompiledTable,
    ) -> Result<Vec<NodeId>, CascadeError> {
        let name_property = self.reserved.name.id();
        let mut ids: Vec<NodeId> = Vec::with_capacity(table.factories().len());
        for (idx, factory) in table.factories().iter().enumerate() {
            let parent = match factory.parent {
                0 => owner,
                p => ids.get(p as usize - 1).copied().unwrap_or(owner),
            };
            let mut node = Node::new(factory.object_type);
            node.flags.insert(NodeFlags::TEMPLATE_GENERATED);
            #[expect(
                clippy::cast_possible_truncation,
                reason = "generated trees are far smaller than u32::MAX"
            )]
            let child_index = idx as u32 + 1;
            node.child_index = child_index;
            node.templated_parent = Some(owner);
            node.parent = Some(parent);
            if let Some(name) = factory.name {
                node.locals.set(name_property, ErasedValue::new(Some(name)));
            }
            let id = self.tree.insert(node);
            self.node_mut(parent)?.children.push(id);
            ids.push(id);
        }

        let n = self.node_mut(owner)?;
        n.generated.clone_from(&ids);
        for (factory, id) in table.factories().iter().zip(&ids) {
            if let Some(name) = factory.name {
                n.name_scope.insert(name, *id);
            }
        }
        tracing::debug!(?owner, nodes = ids.len(), "generated template nodes");

        for &id in &ids {
            self.update_theme_style(id)?;
            self.update_implicit_style(id)?;
        }
        self.seed(owner, table, &ids);
        self.flush_deferred(owner)?;
        self.prime(owner, InstanceLayer::Template, table, true);
        self.refresh_container(owner, table);
        Ok(ids)
    }

    /// Materializes per-node values of unconditional child records so each
    /// generated node owns its copy from the start.
    fn seed(&mut self, owner: NodeId, table: &CompiledTable, ids: &[NodeId]) {
        for &(child, property) in table.seeded() {
            let Some(&target) = ids.get(child as usize - 1) else {
                continue;
            };
            let layer = Layer {
                owner,
                layer: InstanceLayer::Template,
                child,
                table,
                trigger_source: ValueSource::TemplatedParentTrigger,
                simple_source: Some(ValueSource::TemplatedParent),
            };
            for record in table.records(child, property) {
                if record.trigger.is_none() && record.value.needs_instance() {
                    self.materialize(&layer, record, target, property);
                }
            }
        }
    }

    /// Delivers actions queued while the generated subtree did not exist.
    fn flush_deferred(&mut self, owner: NodeId) -> Result<(), CascadeError> {
        let deferred = std::mem::take(&mut self.node_mut(owner)?.deferred);
        for entry in deferred {
            match self.tree.template_child(owner, entry.target_child) {
                Some(target) => {
                    tracing::trace!(
                        ?target,
                        count = entry.actions.len(),
                        "flushing deferred actions"
                    );
                    self.actions.dispatch(target, &entry.actions);
                }
                None => {
                    tracing::trace!(
                        ?owner,
                        child = entry.target_child,
                        "deferred actions target no generated node; dropped"
                    );
                }
            }
        }
        Ok(())
    }

    /// Re-resolves container values set by triggers that read generated
    /// children, which could not match before the children existed.
    fn refresh_container(&mut self, owner: NodeId, table: &CompiledTable) {
        let mut properties = Vec::new();
        for source in table.sources() {
            if let TriggerSource::Property { child, .. } = source
                && *child > 0
            {
                properties.extend(
                    table
                        .dependents(source)
                        .iter()
                        .filter(|(c, _)| *c == 0)
                        .map(|(_, p)| *p),
                );
            }
        }
        properties.sort_unstable();
        properties.dedup();
        let mut queue = VecDeque::new();
        for property in properties {
            if self
                .tree
                .get(owner)
                .is_some_and(|n| n.locals.contains(property))
            {
                continue;
            }
            if let Some(change) = self.refresh(owner, property) {
                queue.push_back(change);
            }
        }
        self.propagate(queue);
    }
}
