// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The cascade engine: node tree, assignment entry points and resources.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use hashbrown::HashMap;
use understory_property::{
    ErasedValue, ObjectType, Property, PropertyId, PropertyMetadataBuilder, PropertyRegistry,
    PropertyValue,
};

use crate::config::EngineConfig;
use crate::error::CascadeError;
use crate::instance::InstanceLayer;
use crate::node::{Node, NodeFlags, NodeId, NodeTree};
use crate::resource::{
    DeferredResource, ResourceDictionary, ResourceKey, ResourceValue, SystemResources,
};
use crate::style::{BasedOn, Style, StyleId};
use crate::table::{self, CompiledTable};
use crate::template::Template;
use crate::trigger::{ActionSink, BindingId, BindingSource, TriggerAction};

/// Properties the engine registers for itself.
///
/// Styles and templates may not set them; the engine maintains them as
/// local values.
#[derive(Copy, Clone, Debug)]
pub struct ReservedProperties {
    /// Name of a template-generated node within its template.
    pub name: Property<Option<&'static str>>,
    /// Type used to look up the theme style instead of the node's own type.
    pub default_style_key: Property<Option<ObjectType>>,
    /// Identity of the applied style.
    pub style: Property<Option<StyleId>>,
    /// Identity of the applied template.
    pub template: Property<Option<StyleId>>,
}

impl ReservedProperties {
    fn register(registry: &mut PropertyRegistry) -> Self {
        fn reserve<T: PropertyValue>(
            registry: &mut PropertyRegistry,
            name: &'static str,
            default: T,
        ) -> Property<T> {
            registry.register(
                name,
                PropertyMetadataBuilder::new(default)
                    .template_eligible(false)
                    .reserved()
                    .build(),
            )
        }
        Self {
            name: reserve(registry, "Name", None),
            default_style_key: reserve(registry, "DefaultStyleKey", None),
            style: reserve(registry, "Style", None),
            template: reserve(registry, "Template", None),
        }
    }
}

/// Where `based-on` resource references of a style are looked up.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Scope {
    Node(NodeId),
    Theme,
}

#[derive(Debug)]
struct NoActions;

impl ActionSink for NoActions {
    fn dispatch(&mut self, _: NodeId, _: &[TriggerAction]) {}
}

#[derive(Debug)]
struct NoBindings;

impl BindingSource for NoBindings {
    fn current_value(&self, _: NodeId, _: BindingId) -> Option<ErasedValue> {
        None
    }
}

/// Owns a node tree and computes effective property values over it.
///
/// All operations run synchronously on the calling thread. The engine,
/// styles, templates and dictionaries are `!Send`: cross-thread use is
/// rejected at compile time.
///
/// ```rust
/// use understory_cascade::{Engine, EngineConfig, Style, Trigger, ValueSource};
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let enabled = registry.register("IsEnabled", PropertyMetadataBuilder::new(true).build());
/// let opacity = registry.register("Opacity", PropertyMetadataBuilder::new(1.0_f64).build());
/// let button = registry.register_type("Button", None);
///
/// let mut engine = Engine::new(registry, EngineConfig::default());
/// let node = engine.create_node(button).unwrap();
/// let style = Style::builder()
///     .trigger(Trigger::property(enabled, false).set(opacity, 0.5))
///     .build();
/// engine.apply_style(node, Some(style)).unwrap();
///
/// assert_eq!(engine.get(node, opacity), Some(1.0));
/// engine.set_local(node, enabled, false).unwrap();
/// assert_eq!(engine.get(node, opacity), Some(0.5));
/// assert_eq!(
///     engine.resolve(node, opacity.id()).map(|r| r.source),
///     Some(ValueSource::StyleTrigger)
/// );
/// ```
pub struct Engine {
    pub(crate) registry: PropertyRegistry,
    pub(crate) config: EngineConfig,
    pub(crate) tree: NodeTree,
    pub(crate) reserved: ReservedProperties,
    pub(crate) app_resources: ResourceDictionary,
    pub(crate) theme_resources: ResourceDictionary,
    pub(crate) system: Option<Arc<SystemResources>>,
    pub(crate) theme_cache: HashMap<ObjectType, Option<Style>>,
    /// Types whose theme style is being resolved.
    pub(crate) theme_guard: Vec<ObjectType>,
    /// `(node, property)` pairs whose own layers are being computed.
    pub(crate) resolving: Vec<(NodeId, PropertyId)>,
    /// Set when a resolution consults a resource reference.
    pub(crate) resource_read: bool,
    pub(crate) rechecking: bool,
    pub(crate) actions: Box<dyn ActionSink>,
    pub(crate) bindings: Box<dyn BindingSource>,
    pub(crate) invalidations: Vec<(NodeId, PropertyId)>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("nodes", &self.tree.len())
            .field("properties", &self.registry.len())
            .field("theme_cache", &self.theme_cache.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine over `registry`.
    ///
    /// # Panics
    ///
    /// Panics if the registry already has a property named `Name`,
    /// `DefaultStyleKey`, `Style` or `Template`; the engine registers
    /// those itself.
    #[must_use]
    pub fn new(mut registry: PropertyRegistry, config: EngineConfig) -> Self {
        let reserved = ReservedProperties::register(&mut registry);
        Self {
            registry,
            config,
            tree: NodeTree::default(),
            reserved,
            app_resources: ResourceDictionary::new(),
            theme_resources: ResourceDictionary::new(),
            system: None,
            theme_cache: HashMap::new(),
            theme_guard: Vec::new(),
            resolving: Vec::new(),
            resource_read: false,
            rechecking: false,
            actions: Box::new(NoActions),
            bindings: Box::new(NoBindings),
            invalidations: Vec::new(),
        }
    }

    /// The property registry.
    #[must_use]
    pub fn registry(&self) -> &PropertyRegistry {
        &self.registry
    }

    /// Mutable access to the registry, for registering more properties.
    ///
    /// Overriding defaults here does not invalidate values already cached.
    pub fn registry_mut(&mut self) -> &mut PropertyRegistry {
        &mut self.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The properties registered by the engine.
    #[must_use]
    pub fn reserved(&self) -> ReservedProperties {
        self.reserved
    }

    /// Installs the receiver of trigger actions.
    pub fn set_action_sink(&mut self, sink: impl ActionSink + 'static) {
        self.actions = Box::new(sink);
    }

    /// Installs the source of binding values read by data triggers.
    pub fn set_binding_source(&mut self, source: impl BindingSource + 'static) {
        self.bindings = Box::new(source);
    }

    /// Shares a process-wide system resource cache with this engine.
    pub fn set_system_resources(&mut self, system: Option<Arc<SystemResources>>) {
        self.system = system;
    }

    /// Invalidations caused by trigger sources, oldest first.
    ///
    /// Only recorded when [`EngineConfig::record_invalidations`] is set.
    #[must_use]
    pub fn invalidation_log(&self) -> &[(NodeId, PropertyId)] {
        &self.invalidations
    }

    /// Takes and clears the invalidation log.
    pub fn take_invalidation_log(&mut self) -> Vec<(NodeId, PropertyId)> {
        std::mem::take(&mut self.invalidations)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, CascadeError> {
        self.tree.get(id).ok_or(CascadeError::StaleNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, CascadeError> {
        self.tree.get_mut(id).ok_or(CascadeError::StaleNode(id))
    }

    pub(crate) fn type_name(&self, ty: ObjectType) -> &'static str {
        self.registry.type_name(ty).unwrap_or("<unregistered>")
    }

    // --- Tree -----------------------------------------------------------

    /// Creates a detached node and resolves its theme style.
    pub fn create_node(&mut self, object_type: ObjectType) -> Result<NodeId, CascadeError> {
        let id = self.tree.insert(Node::new(object_type));
        let result = self
            .update_theme_style(id)
            .and_then(|()| self.update_implicit_style(id));
        if let Err(err) = result {
            self.destroy_subtree(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Returns `true` if `node` refers to a live node.
    #[must_use]
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.tree.is_alive(node)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    /// Appends `child` to `parent`.
    ///
    /// Inherited values, resource references and implicit styles of the
    /// child's subtree are brought up to date.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), CascadeError> {
        self.node(parent)?;
        if self.node(child)?.parent.is_some() {
            return Err(CascadeError::AlreadyAttached(child));
        }
        self.check_acyclic(parent, child)?;
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        self.refresh_subtree(child, true)
    }

    /// Removes `node` and its whole subtree, releasing instance values.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), CascadeError> {
        let parent = self.node(node)?.parent;
        if let Some(parent) = parent
            && let Some(p) = self.tree.get_mut(parent)
        {
            p.children.retain(|c| *c != node);
        }
        let orphans = self.destroy_subtree(node);
        for orphan in orphans {
            self.refresh_subtree(orphan, true)?;
        }
        Ok(())
    }

    /// Destroys a subtree and returns live mentees that lost their mentor.
    pub(crate) fn destroy_subtree(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut orphans = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(mut node) = self.tree.remove(id) else {
                continue;
            };
            stack.extend(node.children.iter().copied());
            node.instances.release_all();
            if let Some(resources) = &node.resources {
                resources.remove_owner(id);
            }
            if !node.deferred.is_empty() {
                tracing::trace!(
                    node = ?id,
                    count = node.deferred.len(),
                    "dropped deferred actions"
                );
            }
            if let Some(container) = node.templated_parent
                && let Some(c) = self.tree.get_mut(container)
            {
                // The generated slot keeps its dead id so later child indices stay put.
                c.instances.release_target(id);
                c.name_scope.retain(|_, named| *named != id);
            }
            if let Some(mentor) = node.mentor
                && let Some(m) = self.tree.get_mut(mentor)
            {
                m.mentees.retain(|n| *n != id);
            }
            orphans.extend(node.mentees.iter().copied());
        }
        orphans.retain(|n| self.tree.is_alive(*n));
        orphans
    }

    fn check_acyclic(&self, ancestor: NodeId, node: NodeId) -> Result<(), CascadeError> {
        let mut current = Some(ancestor);
        while let Some(id) = current {
            if id == node {
                return Err(CascadeError::CyclicTree(node));
            }
            current = self.tree.inheritance_parent(id);
        }
        Ok(())
    }

    /// The tree parent.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.get(node)?.parent
    }

    /// The child at `index`.
    #[must_use]
    pub fn child_at(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.tree.get(node)?.children.get(index).copied()
    }

    /// The children, empty for stale nodes.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.tree.get(node).map_or(&[], |n| n.children.as_slice())
    }

    /// Position in the templated parent's generated tree; 0 for ordinary nodes.
    #[must_use]
    pub fn child_index(&self, node: NodeId) -> Option<u32> {
        Some(self.tree.get(node)?.child_index)
    }

    /// The container whose template generated `node`.
    #[must_use]
    pub fn templated_parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.get(node)?.templated_parent
    }

    /// Looks up a generated node by its template name.
    #[must_use]
    pub fn find_template_child(&self, container: NodeId, name: &str) -> Option<NodeId> {
        self.tree
            .get(container)?
            .name_scope
            .get(name)
            .copied()
            .filter(|id| self.tree.is_alive(*id))
    }

    /// The type of a node.
    #[must_use]
    pub fn node_type(&self, node: NodeId) -> Option<ObjectType> {
        Some(self.tree.get(node)?.object_type)
    }

    /// The cascade flags of a node.
    #[must_use]
    pub fn node_flags(&self, node: NodeId) -> Option<NodeFlags> {
        Some(self.tree.get(node)?.flags)
    }

    /// Stops descendants of `node` from inheriting values from it or above.
    pub fn set_inheritance_boundary(
        &mut self,
        node: NodeId,
        boundary: bool,
    ) -> Result<(), CascadeError> {
        let flags = &mut self.node_mut(node)?.flags;
        if flags.contains(NodeFlags::INHERITANCE_BOUNDARY) == boundary {
            return Ok(());
        }
        flags.set(NodeFlags::INHERITANCE_BOUNDARY, boundary);
        for dependent in self.tree.dependents(node) {
            self.refresh_subtree(dependent, true)?;
        }
        Ok(())
    }

    /// Sets the mentor of a node: its inheritance and resource parent while
    /// it has no tree parent. The relation is non-owning.
    pub fn set_mentor(&mut self, node: NodeId, mentor: Option<NodeId>) -> Result<(), CascadeError> {
        if let Some(mentor) = mentor {
            self.node(mentor)?;
            self.check_acyclic(mentor, node)?;
        }
        let previous = std::mem::replace(&mut self.node_mut(node)?.mentor, mentor);
        if let Some(previous) = previous
            && let Some(p) = self.tree.get_mut(previous)
        {
            p.mentees.retain(|n| *n != node);
        }
        if let Some(mentor) = mentor {
            self.node_mut(mentor)?.mentees.push(node);
        }
        self.refresh_subtree(node, true)
    }

    // --- Local values ---------------------------------------------------

    /// Sets a local value, coerced through the property metadata.
    pub fn set_local<T: PropertyValue>(
        &mut self,
        node: NodeId,
        property: Property<T>,
        value: T,
    ) -> Result<(), CascadeError> {
        let n = self.tree.get_mut(node).ok_or(CascadeError::StaleNode(node))?;
        n.locals.set_local(property, value, &self.registry);
        self.invalidate(node, property.id())
    }

    /// Removes a local value, returning it.
    pub fn clear_local(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Result<Option<ErasedValue>, CascadeError> {
        let previous = self.node_mut(node)?.locals.clear(property);
        if previous.is_some() {
            self.invalidate(node, property)?;
        }
        Ok(previous)
    }

    /// The typed effective value, `None` if nothing supplies one.
    pub fn get<T: PropertyValue>(&mut self, node: NodeId, property: Property<T>) -> Option<T> {
        self.resolve(node, property.id())?.value.get()
    }

    /// The typed effective value, or an error saying why there is none.
    pub fn value<T: PropertyValue>(
        &mut self,
        node: NodeId,
        property: Property<T>,
    ) -> Result<T, CascadeError> {
        let resolved = self
            .resolve(node, property.id())
            .ok_or(CascadeError::ValueNotFound {
                node,
                property: property.id(),
            })?;
        resolved.value.get().ok_or(CascadeError::TypeMismatch {
            property: property.id(),
        })
    }

    // --- Styles and templates -------------------------------------------

    /// The applied style.
    #[must_use]
    pub fn style(&self, node: NodeId) -> Option<&Style> {
        self.tree.get(node)?.style.as_ref()
    }

    /// The applied template.
    #[must_use]
    pub fn template(&self, node: NodeId) -> Option<&Template> {
        self.tree.get(node)?.template.as_ref()
    }

    /// The theme style in effect.
    #[must_use]
    pub fn theme_style(&self, node: NodeId) -> Option<&Style> {
        self.tree.get(node)?.theme_style.as_ref()
    }

    /// Applies a style, sealing it on first use. `None` removes the
    /// explicit style and falls back to an implicit one.
    pub fn apply_style(&mut self, node: NodeId, style: Option<Style>) -> Result<(), CascadeError> {
        let fallback = style.is_none();
        self.assign_style(node, style, false)?;
        if fallback {
            self.update_implicit_style(node)?;
        }
        Ok(())
    }

    pub(crate) fn assign_style(
        &mut self,
        node: NodeId,
        style: Option<Style>,
        implicit: bool,
    ) -> Result<(), CascadeError> {
        let table = match &style {
            Some(style) => {
                self.check_target(node, style.target_type())?;
                Some(self.compile_style(style, Scope::Node(node))?)
            }
            None => None,
        };
        let identity = style.as_ref().map(Style::id);
        tracing::debug!(?node, style = ?identity, implicit, "applying style");
        let property = self.reserved.style.id();
        let n = self.node_mut(node)?;
        n.flags.set(NodeFlags::IMPLICIT_STYLE, implicit && style.is_some());
        n.locals.set(property, ErasedValue::new(identity));
        n.effective.remove(&property);
        self.swap(node, InstanceLayer::Style, table, |n| n.style = style)
    }

    /// Applies a template. The previous generated subtree is destroyed and
    /// pending deferred actions are dropped.
    pub fn apply_template(
        &mut self,
        node: NodeId,
        template: Option<Template>,
    ) -> Result<(), CascadeError> {
        let table = match &template {
            Some(template) => {
                self.check_target(node, template.target_type())?;
                Some(self.compile_template(template)?)
            }
            None => None,
        };
        let identity = template.as_ref().map(Template::id);
        tracing::debug!(?node, template = ?identity, "applying template");
        let property = self.reserved.template.id();
        let n = self.node_mut(node)?;
        if !n.deferred.is_empty() {
            tracing::warn!(
                ?node,
                count = n.deferred.len(),
                "template changed; dropping deferred trigger actions"
            );
            n.deferred.clear();
        }
        n.locals.set(property, ErasedValue::new(identity));
        n.effective.remove(&property);
        self.destroy_generated(node)?;
        self.swap(node, InstanceLayer::Template, table, |n| n.template = template)
    }

    /// Overrides the theme style. `None` returns to the style found in the
    /// theme dictionary for the node's type.
    pub fn apply_theme_style(
        &mut self,
        node: NodeId,
        style: Option<Style>,
    ) -> Result<(), CascadeError> {
        match style {
            Some(style) => {
                self.check_target(node, style.target_type())?;
                let table = self.compile_style(&style, Scope::Theme)?;
                tracing::debug!(?node, style = ?style.id(), "applying explicit theme style");
                self.node_mut(node)?
                    .flags
                    .insert(NodeFlags::EXPLICIT_THEME_STYLE);
                self.swap(node, InstanceLayer::ThemeStyle, Some(table), |n| {
                    n.theme_style = Some(style);
                })
            }
            None => {
                self.node_mut(node)?
                    .flags
                    .remove(NodeFlags::EXPLICIT_THEME_STYLE);
                self.update_theme_style(node)
            }
        }
    }

    fn check_target(&self, node: NodeId, target: Option<ObjectType>) -> Result<(), CascadeError> {
        let actual = self.node(node)?.object_type;
        match target {
            Some(expected) if !self.registry.is_assignable(actual, expected) => {
                Err(CascadeError::TargetTypeMismatch {
                    expected: self.type_name(expected),
                    actual: self.type_name(actual),
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn compile_style(
        &mut self,
        style: &Style,
        scope: Scope,
    ) -> Result<Rc<CompiledTable>, CascadeError> {
        if let Some(table) = style.compiled() {
            return Ok(table);
        }
        table::seal(style.state(), || {
            let chain = self.style_chain(style, scope)?;
            table::compile_style(&chain, &self.registry)
        })
    }

    pub(crate) fn compile_template(
        &mut self,
        template: &Template,
    ) -> Result<Rc<CompiledTable>, CascadeError> {
        table::seal(template.state(), || {
            table::compile_template(template, &self.registry)
        })
    }

    /// The `based-on` chain of `style`, base first.
    fn style_chain(&mut self, style: &Style, scope: Scope) -> Result<Vec<Style>, CascadeError> {
        let mut chain = vec![style.clone()];
        let mut current = style.clone();
        while let Some(based_on) = current.based_on() {
            let base = match based_on {
                BasedOn::Style(base) => base.clone(),
                BasedOn::Resource(key) => self.base_style(*key, scope)?,
            };
            if chain.iter().any(|s| s.ptr_eq(&base)) {
                return Err(CascadeError::ReentrantCompile);
            }
            chain.push(base.clone());
            current = base;
        }
        chain.reverse();
        Ok(chain)
    }

    fn base_style(&mut self, key: ResourceKey, scope: Scope) -> Result<Style, CascadeError> {
        let found = match (scope, key) {
            (Scope::Node(node), _) => self
                .try_find_resource(node, key)
                .and_then(|v| v.as_style().cloned()),
            (Scope::Theme, ResourceKey::Type(ty)) => self.theme_style_for(ty)?,
            (Scope::Theme, ResourceKey::Name(_)) => self
                .theme_resources
                .get(key)
                .and_then(|v| v.as_style().cloned()),
        };
        found.ok_or(CascadeError::ResourceNotFound { key })
    }

    // --- Theme styles ---------------------------------------------------

    /// The theme style for nodes looked up as `ty`, sealed.
    ///
    /// Walks the type chain through the theme dictionary; results are
    /// cached per type until the theme resources change.
    pub(crate) fn theme_style_for(
        &mut self,
        ty: ObjectType,
    ) -> Result<Option<Style>, CascadeError> {
        if let Some(cached) = self.theme_cache.get(&ty) {
            return Ok(cached.clone());
        }
        if self.theme_guard.contains(&ty) {
            return Err(CascadeError::CyclicThemeStyle {
                type_name: self.type_name(ty),
            });
        }
        self.theme_guard.push(ty);
        let result = self.lookup_theme_style(ty);
        self.theme_guard.pop();
        let style = result?;
        tracing::debug!(
            type_name = self.type_name(ty),
            found = style.is_some(),
            "resolved theme style"
        );
        self.theme_cache.insert(ty, style.clone());
        Ok(style)
    }

    fn lookup_theme_style(&mut self, ty: ObjectType) -> Result<Option<Style>, CascadeError> {
        let chain: Vec<ObjectType> = self.registry.type_chain(ty).collect();
        for t in chain {
            if let Some(style) = self
                .theme_resources
                .get(ResourceKey::Type(t))
                .and_then(|v| v.as_style().cloned())
            {
                self.compile_style(&style, Scope::Theme)?;
                return Ok(Some(style));
            }
        }
        Ok(None)
    }

    fn theme_key(&self, node: &Node) -> ObjectType {
        node.locals
            .get(self.reserved.default_style_key.id())
            .and_then(|v| v.get::<Option<ObjectType>>())
            .flatten()
            .unwrap_or(node.object_type)
    }

    /// Re-resolves the theme style of a node without an explicit one.
    pub(crate) fn update_theme_style(&mut self, node: NodeId) -> Result<(), CascadeError> {
        let n = self.node(node)?;
        if n.flags.contains(NodeFlags::EXPLICIT_THEME_STYLE) {
            return Ok(());
        }
        let key = self.theme_key(n);
        let current = n.theme_style.clone();
        let style = self.theme_style_for(key)?;
        let unchanged = match (&current, &style) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        if let Some(style) = &style {
            self.check_target(node, style.target_type())?;
        }
        let table = style.as_ref().and_then(Style::compiled);
        self.swap(node, InstanceLayer::ThemeStyle, table, |n| n.theme_style = style)
    }

    // --- Implicit styles ------------------------------------------------

    /// Looks up the type-keyed style for `node`, starting at its
    /// inheritance parent and ending with the application resources.
    fn find_implicit_style(&self, node: NodeId, ty: ObjectType) -> Option<Style> {
        let key = ResourceKey::Type(ty);
        let mut current = self.tree.inheritance_parent(node);
        while let Some(id) = current {
            if let Some(value) = self.scope_lookup(id, key) {
                return value.as_style().cloned();
            }
            current = self.tree.inheritance_parent(id);
        }
        self.app_resources
            .get(key)
            .and_then(|v| v.as_style().cloned())
    }

    /// Brings the implicit style of a node without an explicit style up to date.
    pub(crate) fn update_implicit_style(&mut self, node: NodeId) -> Result<(), CascadeError> {
        let enabled = self.config.implicit_styles();
        let n = self.node(node)?;
        let explicit = n.style.is_some() && !n.flags.contains(NodeFlags::IMPLICIT_STYLE);
        if explicit || !enabled {
            return Ok(());
        }
        let ty = n.object_type;
        let current = n.style.clone();
        let found = self.find_implicit_style(node, ty);
        match (&current, &found) {
            (Some(a), Some(b)) if a.ptr_eq(b) => Ok(()),
            (None, None) => Ok(()),
            _ => self.assign_style(node, found, true),
        }
    }

    // --- Resources ------------------------------------------------------

    /// The node's own resource dictionary.
    #[must_use]
    pub fn resources(&self, node: NodeId) -> Option<&ResourceDictionary> {
        self.tree.get(node)?.resources.as_ref()
    }

    /// Replaces the node's own resource dictionary and rebroadcasts the
    /// change to its subtree.
    pub fn set_resources(
        &mut self,
        node: NodeId,
        resources: Option<ResourceDictionary>,
    ) -> Result<(), CascadeError> {
        if let Some(resources) = &resources {
            resources.add_owner(node);
        }
        let previous = std::mem::replace(&mut self.node_mut(node)?.resources, resources);
        if let Some(previous) = previous {
            previous.remove_owner(node);
        }
        self.resources_changed(node)
    }

    /// Tells the engine that the resources visible to `node` changed.
    ///
    /// Every node of the subtree re-checks its implicit style and
    /// re-resolves values that read resource references.
    pub fn resources_changed(&mut self, node: NodeId) -> Result<(), CascadeError> {
        self.node(node)?;
        self.refresh_subtree(node, false)
    }

    /// Tells the engine that `dictionary` was edited in place.
    ///
    /// Notifies every node owning the dictionary, directly or through a
    /// merge, and the application or theme scope if it is one of those.
    pub fn dictionary_changed(
        &mut self,
        dictionary: &ResourceDictionary,
    ) -> Result<(), CascadeError> {
        if self.theme_resources.ptr_eq(dictionary) {
            return self.set_theme_resources(dictionary.clone());
        }
        if self.app_resources.ptr_eq(dictionary) {
            return self.set_application_resources(dictionary.clone());
        }
        for owner in dictionary.owners() {
            if self.tree.is_alive(owner) {
                self.resources_changed(owner)?;
            }
        }
        Ok(())
    }

    /// The application-level dictionary.
    #[must_use]
    pub fn application_resources(&self) -> &ResourceDictionary {
        &self.app_resources
    }

    /// Replaces the application-level dictionary.
    pub fn set_application_resources(
        &mut self,
        resources: ResourceDictionary,
    ) -> Result<(), CascadeError> {
        self.app_resources = resources;
        for root in self.roots() {
            self.refresh_subtree(root, false)?;
        }
        Ok(())
    }

    /// The theme dictionary.
    #[must_use]
    pub fn theme_resources(&self) -> &ResourceDictionary {
        &self.theme_resources
    }

    /// Replaces the theme dictionary and re-resolves every theme style.
    pub fn set_theme_resources(
        &mut self,
        resources: ResourceDictionary,
    ) -> Result<(), CascadeError> {
        self.theme_resources = resources;
        self.theme_cache.clear();
        for id in self.tree.ids() {
            self.update_theme_style(id)?;
        }
        for root in self.roots() {
            self.refresh_subtree(root, false)?;
        }
        Ok(())
    }

    fn roots(&self) -> Vec<NodeId> {
        self.tree
            .ids()
            .into_iter()
            .filter(|id| self.tree.inheritance_parent(*id).is_none())
            .collect()
    }

    /// Resources of one node: its dictionary, then style and template resources.
    pub(crate) fn scope_lookup(&self, id: NodeId, key: ResourceKey) -> Option<ResourceValue> {
        let node = self.tree.get(id)?;
        if let Some(value) = node.resources.as_ref().and_then(|d| d.get(key)) {
            return Some(value);
        }
        let style = node.style.as_ref().and_then(Style::compiled);
        let template = node.template.as_ref().and_then(Template::compiled);
        style
            .iter()
            .chain(template.iter())
            .flat_map(|table| table.resources())
            .find_map(|d| d.get(key))
    }

    /// Looks up a resource visible from `node`.
    ///
    /// Searches the node and its ancestors (tree parent, else mentor),
    /// then the application, theme and system resources.
    #[must_use]
    pub fn try_find_resource(&self, node: NodeId, key: ResourceKey) -> Option<ResourceValue> {
        let mut current = self.tree.is_alive(node).then_some(node);
        while let Some(id) = current {
            if let Some(value) = self.scope_lookup(id, key) {
                return Some(value);
            }
            current = self.tree.inheritance_parent(id);
        }
        self.app_resources
            .get(key)
            .or_else(|| self.theme_resources.get(key))
            .or_else(|| match (key, &self.system) {
                (ResourceKey::Name(name), Some(system)) => {
                    system.get(name).map(ResourceValue::Value)
                }
                _ => None,
            })
    }

    /// Like [`try_find_resource`](Self::try_find_resource), but absence is an error.
    pub fn find_resource(
        &self,
        node: NodeId,
        key: ResourceKey,
    ) -> Result<ResourceValue, CascadeError> {
        self.node(node)?;
        self.try_find_resource(node, key)
            .ok_or(CascadeError::ResourceNotFound { key })
    }

    /// A lazy reference resolved in `node`'s scope when asked.
    pub fn find_resource_deferred(
        &self,
        node: NodeId,
        key: ResourceKey,
    ) -> Result<DeferredResource, CascadeError> {
        self.node(node)?;
        Ok(DeferredResource { scope: node, key })
    }
}
