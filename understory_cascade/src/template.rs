// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Templates: shareable descriptions of generated subtrees.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use understory_property::{ErasedValue, ObjectType, Property, PropertyId, PropertyValue};

use crate::resource::{ResourceDictionary, ResourceKey};
use crate::style::{RecordData, SealState, StyleId};
use crate::table::CompiledTable;
use crate::trigger::Trigger;
use crate::value::SetterValue;

/// Template a generated node receives for its own content.
#[derive(Clone, Debug)]
pub enum FactoryTemplate {
    /// A template object.
    Template(Template),
    /// A template looked up in the generated node's resource scope.
    Resource(ResourceKey),
}

/// One node of a template's generated tree.
///
/// Values set here become the "templated parent" source of the generated
/// node.
#[derive(Clone, Debug)]
pub struct FactoryNode {
    pub(crate) object_type: ObjectType,
    pub(crate) name: Option<&'static str>,
    pub(crate) values: Vec<(PropertyId, SetterValue)>,
    pub(crate) children: Vec<FactoryNode>,
    pub(crate) template: Option<FactoryTemplate>,
}

impl FactoryNode {
    /// A factory node creating a node of `object_type`.
    #[must_use]
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            name: None,
            values: Vec::new(),
            children: Vec::new(),
            template: None,
        }
    }

    /// Names the node within the template's name scope.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Sets a plain value on the generated node.
    #[must_use]
    pub fn set<T: PropertyValue>(self, property: Property<T>, value: T) -> Self {
        self.set_value(property.id(), SetterValue::Value(ErasedValue::new(value)))
    }

    /// Sets any kind of value on the generated node.
    #[must_use]
    pub fn set_value(mut self, property: PropertyId, value: SetterValue) -> Self {
        self.values.push((property, value));
        self
    }

    /// Appends a child factory node.
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Gives the generated node a template of its own.
    #[must_use]
    pub fn template(mut self, template: Template) -> Self {
        self.template = Some(FactoryTemplate::Template(template));
        self
    }

    /// Gives the generated node a template looked up by resource key.
    #[must_use]
    pub fn template_resource(mut self, key: ResourceKey) -> Self {
        self.template = Some(FactoryTemplate::Resource(key));
        self
    }
}

struct TemplateInner {
    id: StyleId,
    target_type: Option<ObjectType>,
    root: Option<FactoryNode>,
    records: RecordData,
    state: RefCell<SealState>,
}

/// A shareable, sealable template.
///
/// Generated nodes are numbered in pre-order starting at 1; index 0 is the
/// container the template is applied to.
///
/// ```rust
/// use understory_cascade::{FactoryNode, Template, Trigger};
/// use understory_property::{PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let hovered = registry.register("IsMouseOver", PropertyMetadataBuilder::new(false).build());
/// let fill = registry.register("Fill", PropertyMetadataBuilder::new(0_u32).build());
/// let border = registry.register_type("Border", None);
/// let text = registry.register_type("Text", None);
///
/// let template = Template::builder()
///     .root(
///         FactoryNode::new(border)
///             .name("Chrome")
///             .set(fill, 0x333333)
///             .child(FactoryNode::new(text).name("Label")),
///     )
///     .trigger(Trigger::property(hovered, true).set_on("Chrome", fill, 0x555555))
///     .build();
/// assert!(!template.is_sealed());
/// ```
#[derive(Clone)]
pub struct Template {
    inner: Rc<TemplateInner>,
}

impl Template {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    /// Identity of this template.
    #[must_use]
    pub fn id(&self) -> StyleId {
        self.inner.id
    }

    /// Type the template is declared for, if any.
    #[must_use]
    pub fn target_type(&self) -> Option<ObjectType> {
        self.inner.target_type
    }

    /// Resources declared on the template.
    #[must_use]
    pub fn resources(&self) -> Option<&ResourceDictionary> {
        self.inner.records.resources.as_ref()
    }

    /// Returns `true` once the template has been compiled.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(*self.inner.state.borrow(), SealState::Sealed(_))
    }

    /// Returns `true` if both handles refer to the same template object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn root(&self) -> Option<&FactoryNode> {
        self.inner.root.as_ref()
    }

    pub(crate) fn records(&self) -> &RecordData {
        &self.inner.records
    }

    pub(crate) fn state(&self) -> &RefCell<SealState> {
        &self.inner.state
    }

    pub(crate) fn compiled(&self) -> Option<Rc<CompiledTable>> {
        match &*self.inner.state.borrow() {
            SealState::Sealed(table) => Some(table.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.inner.id)
            .field("target_type", &self.inner.target_type)
            .field("has_root", &self.inner.root.is_some())
            .field("triggers", &self.inner.records.triggers.len())
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Template`].
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    target_type: Option<ObjectType>,
    root: Option<FactoryNode>,
    records: RecordData,
}

impl TemplateBuilder {
    /// Restricts the template to containers of `ty` or derived types.
    #[must_use]
    pub fn target_type(mut self, ty: ObjectType) -> Self {
        self.target_type = Some(ty);
        self
    }

    /// Sets the root of the generated tree.
    #[must_use]
    pub fn root(mut self, root: FactoryNode) -> Self {
        self.root = Some(root);
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.records.triggers.push(trigger);
        self
    }

    /// Attaches a resource dictionary; it is sealed with the template.
    #[must_use]
    pub fn resources(mut self, resources: ResourceDictionary) -> Self {
        self.records.resources = Some(resources);
        self
    }

    /// Finishes the template.
    #[must_use]
    pub fn build(self) -> Template {
        Template {
            inner: Rc::new(TemplateInner {
                id: StyleId::next(),
                target_type: self.target_type,
                root: self.root,
                records: self.records,
                state: RefCell::new(SealState::Open),
            }),
        }
    }
}
