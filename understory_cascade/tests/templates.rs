// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Template instantiation, nesting and compile-time validation.

mod common;

use std::rc::Rc;

use common::{Numbered, fixture, fixture_with};
use understory_cascade::{
    ActionId, CascadeError, EngineConfig, FactoryNode, NodeFlags, ResourceDictionary,
    ResourceKey, ResourceValue, SetterValue, Style, Template, Trigger, TriggerAction,
    ValueSource,
};

#[test]
fn generated_nodes_follow_factory_order() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(
            FactoryNode::new(f.panel)
                .name("Root")
                .child(
                    FactoryNode::new(f.border)
                        .name("Frame")
                        .child(FactoryNode::new(f.text).name("Caption")),
                )
                .child(FactoryNode::new(f.text)),
        )
        .build();
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    assert_eq!(generated.len(), 4);
    let [root, frame, caption, trailing] = generated[..] else {
        unreachable!()
    };

    for (index, &node) in generated.iter().enumerate() {
        assert_eq!(f.engine.child_index(node), u32::try_from(index + 1).ok());
        assert_eq!(f.engine.templated_parent(node), Some(container));
        assert!(
            f.engine
                .node_flags(node)
                .unwrap()
                .contains(NodeFlags::TEMPLATE_GENERATED)
        );
    }
    assert_eq!(f.engine.children(container), [root]);
    assert_eq!(f.engine.children(root), [frame, trailing]);
    assert_eq!(f.engine.parent(caption), Some(frame));
    assert_eq!(f.engine.node_type(caption), Some(f.text));

    assert_eq!(f.engine.find_template_child(container, "Frame"), Some(frame));
    assert_eq!(f.engine.find_template_child(container, "Missing"), None);
    let name = f.engine.reserved().name;
    assert_eq!(f.engine.get(caption, name), Some(Some("Caption")));
    assert_eq!(f.engine.get(trailing, name), Some(None));
}

#[test]
fn factory_values_come_from_the_templated_parent() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Chrome").set(f.fill, 3))
        .build();
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    let chrome = generated[0];

    let resolved = f.engine.resolve(chrome, f.fill.id()).unwrap();
    assert_eq!(resolved.value.get::<u32>(), Some(3));
    assert_eq!(resolved.source, ValueSource::TemplatedParent);
    // Factory values never apply to the container itself.
    assert_eq!(
        f.engine.resolve(container, f.fill.id()).unwrap().source,
        ValueSource::Default
    );
}

#[test]
fn template_resources_are_visible_to_generated_nodes() {
    let mut f = fixture();
    let resources = ResourceDictionary::new();
    resources.insert_value("Accent", 11_u32).unwrap();
    let template = Template::builder()
        .resources(resources.clone())
        .root(FactoryNode::new(f.border).set_value(
            f.fill.id(),
            SetterValue::Resource(ResourceKey::Name("Accent")),
        ))
        .build();
    let container = f.node(f.button);
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    assert_eq!(f.engine.get(generated[0], f.fill), Some(11));
    assert!(resources.is_sealed());
    assert_eq!(
        resources.insert_value("Accent", 12_u32),
        Err(CascadeError::SealedDictionary)
    );
}

#[test]
fn reinstantiation_replaces_the_generated_subtree() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.panel).child(FactoryNode::new(f.text)))
        .build();
    let first = f.engine.instantiate_template(container, &template).unwrap();
    let count = f.engine.node_count();

    let second = f.engine.instantiate_template(container, &template).unwrap();
    assert!(first.iter().all(|n| !f.engine.is_alive(*n)));
    assert!(second.iter().all(|n| f.engine.is_alive(*n)));
    assert_eq!(f.engine.node_count(), count);

    let other = Template::builder()
        .root(FactoryNode::new(f.border))
        .build();
    let third = f.engine.instantiate_template(container, &other).unwrap();
    assert_eq!(third.len(), 1);
    assert!(second.iter().all(|n| !f.engine.is_alive(*n)));
    assert!(f.engine.template(container).unwrap().ptr_eq(&other));

    f.engine.apply_template(container, None).unwrap();
    assert!(!f.engine.is_alive(third[0]));
    assert!(f.engine.children(container).is_empty());
}

#[test]
fn removing_a_generated_node_releases_its_values() {
    let mut f = fixture();
    let factory = Rc::new(Numbered::default());
    let (attached, detached) = (factory.attached.clone(), factory.detached.clone());
    let template = Template::builder()
        .root(
            FactoryNode::new(f.panel)
                .child(
                    FactoryNode::new(f.text)
                        .name("Part")
                        .set_value(f.fill.id(), SetterValue::Factory(factory)),
                )
                .child(FactoryNode::new(f.border).name("Chrome")),
        )
        .trigger(
            Trigger::property_of("Chrome", f.hovered, true).enter(TriggerAction::new(ActionId(8))),
        )
        .build();
    let container = f.node(f.button);
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    let [_, part, chrome] = generated[..] else {
        unreachable!()
    };
    assert_eq!(f.engine.get(part, f.fill), Some(1));
    assert_eq!(attached.get(), 1);

    f.engine.remove_node(part).unwrap();
    assert_eq!(detached.get(), 1);
    assert_eq!(f.engine.find_template_child(container, "Part"), None);

    // Later siblings keep their child index.
    assert_eq!(f.engine.find_template_child(container, "Chrome"), Some(chrome));
    f.engine.set_local(chrome, f.hovered, true).unwrap();
    assert_eq!(f.actions.take(), [(container, ActionId(8))]);

    f.engine.apply_template(container, None).unwrap();
    assert_eq!(detached.get(), 1);
}

#[test]
fn nested_templates_are_instantiated() {
    let mut f = fixture();
    let inner = Template::builder()
        .root(FactoryNode::new(f.text).name("Glyph").set(f.fill, 2))
        .build();
    let app = ResourceDictionary::new();
    app.insert(
        ResourceKey::Name("InnerTemplate"),
        ResourceValue::Template(inner),
    )
    .unwrap();
    f.engine.set_application_resources(app).unwrap();

    let outer = Template::builder()
        .root(
            FactoryNode::new(f.panel)
                .child(
                    FactoryNode::new(f.control)
                        .name("Host")
                        .template_resource(ResourceKey::Name("InnerTemplate")),
                ),
        )
        .build();
    let container = f.node(f.button);
    f.engine.instantiate_template(container, &outer).unwrap();

    let host = f.engine.find_template_child(container, "Host").unwrap();
    // Names are scoped to the template that declares them.
    assert_eq!(f.engine.find_template_child(container, "Glyph"), None);
    let glyph = f.engine.find_template_child(host, "Glyph").unwrap();
    assert_eq!(f.engine.templated_parent(glyph), Some(host));
    assert_eq!(f.engine.get(glyph, f.fill), Some(2));
}

#[test]
fn missing_nested_template_resource_rolls_back() {
    let mut f = fixture();
    let key = ResourceKey::Name("Nowhere");
    let outer = Template::builder()
        .root(FactoryNode::new(f.control).template_resource(key))
        .build();
    let container = f.node(f.button);
    let count = f.engine.node_count();
    assert_eq!(
        f.engine.instantiate_template(container, &outer),
        Err(CascadeError::ResourceNotFound { key })
    );
    assert_eq!(f.engine.node_count(), count);
    assert!(f.engine.children(container).is_empty());
}

#[test]
fn self_referential_template_is_rejected() {
    let mut f = fixture();
    let key = ResourceKey::Name("ButtonTemplate");
    let template = Template::builder()
        .root(FactoryNode::new(f.button).template_resource(key))
        .build();
    let app = ResourceDictionary::new();
    app.insert(key, ResourceValue::Template(template.clone()))
        .unwrap();
    f.engine.set_application_resources(app).unwrap();

    let container = f.node(f.button);
    let count = f.engine.node_count();
    assert_eq!(
        f.engine.instantiate_template(container, &template),
        Err(CascadeError::SelfReferentialTemplate {
            type_name: "Button"
        })
    );
    assert_eq!(f.engine.node_count(), count);
}

#[test]
fn nesting_depth_is_limited() {
    let mut f = fixture_with(EngineConfig::builder().max_template_depth(1).build());
    let leaf = Template::builder()
        .root(FactoryNode::new(f.border))
        .build();
    let middle = Template::builder()
        .root(FactoryNode::new(f.control).template(leaf.clone()))
        .build();
    let outer = Template::builder()
        .root(FactoryNode::new(f.control).template(middle))
        .build();

    let single = Template::builder()
        .root(FactoryNode::new(f.control).template(leaf))
        .build();
    let shallow = f.node(f.button);
    let generated = f.engine.instantiate_template(shallow, &single).unwrap();
    assert_eq!(generated.len(), 1);
    assert_eq!(f.engine.children(generated[0]).len(), 1);

    let deep = f.node(f.button);
    assert_eq!(
        f.engine.instantiate_template(deep, &outer),
        Err(CascadeError::TemplateTooDeep { limit: 1 })
    );
    assert!(f.engine.children(deep).is_empty());
}

#[test]
fn duplicate_names_are_rejected() {
    let mut f = fixture();
    let template = Template::builder()
        .root(
            FactoryNode::new(f.panel)
                .child(FactoryNode::new(f.text).name("Label"))
                .child(FactoryNode::new(f.text).name("Label")),
        )
        .build();
    let container = f.node(f.button);
    assert_eq!(
        f.engine.apply_template(container, Some(template.clone())),
        Err(CascadeError::DuplicateName { name: "Label" })
    );
    assert!(!template.is_sealed());
    assert!(f.engine.template(container).is_none());
}

#[test]
fn unknown_trigger_names_are_rejected() {
    let mut f = fixture();
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Chrome"))
        .trigger(Trigger::property_of("Chorme", f.hovered, true).set(f.fill, 1))
        .build();
    let container = f.node(f.button);
    assert_eq!(
        f.engine.apply_template(container, Some(template)),
        Err(CascadeError::UnresolvedSourceName { name: "Chorme" })
    );
}

#[test]
fn reserved_properties_cannot_be_styled() {
    let mut f = fixture();
    let name = f.engine.reserved().name;
    let style = Style::builder().set(name, Some("Sneaky")).build();
    let node = f.node(f.button);
    assert_eq!(
        f.engine.apply_style(node, Some(style)),
        Err(CascadeError::ReservedProperty { property: "Name" })
    );
}

#[test]
fn target_types_are_checked() {
    let mut f = fixture();
    let style = Style::builder()
        .target_type(f.control)
        .set(f.fill, 1)
        .build();
    let button = f.node(f.button);
    f.engine.apply_style(button, Some(style.clone())).unwrap();
    assert_eq!(f.engine.get(button, f.fill), Some(1));

    let border = f.node(f.border);
    assert_eq!(
        f.engine.apply_style(border, Some(style)),
        Err(CascadeError::TargetTypeMismatch {
            expected: "Control",
            actual: "Border",
        })
    );

    let template = Template::builder().target_type(f.button).build();
    let control = f.node(f.control);
    assert!(matches!(
        f.engine.apply_template(control, Some(template)),
        Err(CascadeError::TargetTypeMismatch { .. })
    ));
}
