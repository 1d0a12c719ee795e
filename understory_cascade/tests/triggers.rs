// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trigger evaluation: setters, transitions and actions.

mod common;

use common::{fixture, init_tracing};
use understory_cascade::{
    ActionId, BindingId, EventId, FactoryNode, Style, Template, Trigger, TriggerAction,
    ValueSource,
};

#[test]
fn later_trigger_wins_while_both_match() {
    init_tracing();
    let mut f = fixture();
    let node = f.node(f.button);
    let style = Style::builder()
        .trigger(Trigger::property(f.enabled, false).set(f.opacity, 0.5))
        .trigger(Trigger::property(f.hovered, true).set(f.opacity, 0.8))
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert_eq!(f.engine.get(node, f.opacity), Some(1.0));

    f.engine.set_local(node, f.enabled, false).unwrap();
    assert_eq!(f.engine.get(node, f.opacity), Some(0.5));

    f.engine.set_local(node, f.hovered, true).unwrap();
    assert_eq!(f.engine.get(node, f.opacity), Some(0.8));

    f.engine.set_local(node, f.hovered, false).unwrap();
    assert_eq!(f.engine.get(node, f.opacity), Some(0.5));
    assert_eq!(
        f.engine.resolve(node, f.opacity.id()).unwrap().source,
        ValueSource::StyleTrigger
    );
}

#[test]
fn actions_fire_once_per_transition() {
    let mut f = fixture();
    let node = f.node(f.button);
    let style = Style::builder()
        .trigger(
            Trigger::property(f.hovered, true)
                .enter(TriggerAction::new(ActionId(1)))
                .exit(TriggerAction::new(ActionId(2))),
        )
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert!(f.actions.ids().is_empty());

    for hovered in [true, true, false, false, true] {
        f.engine.set_local(node, f.hovered, hovered).unwrap();
    }
    assert_eq!(f.actions.ids(), [1, 2, 1]);
    assert!(f.actions.take().iter().all(|(target, _)| *target == node));
}

#[test]
fn matching_trigger_enters_when_applied() {
    let mut f = fixture();
    let node = f.node(f.button);
    f.engine.set_local(node, f.hovered, true).unwrap();
    let style = Style::builder()
        .trigger(Trigger::property(f.hovered, true).enter(TriggerAction::new(ActionId(7))))
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert_eq!(f.actions.ids(), [7]);
}

#[test]
fn style_satisfying_its_own_trigger_enters_once() {
    let mut f = fixture();
    let node = f.node(f.button);
    let style = Style::builder()
        .set(f.enabled, false)
        .trigger(Trigger::property(f.enabled, false).enter(TriggerAction::new(ActionId(1))))
        .build();
    f.engine.apply_style(node, Some(style.clone())).unwrap();
    assert_eq!(f.actions.ids(), [1]);

    // Removal is silent; applying again is a fresh transition.
    f.engine.apply_style(node, None).unwrap();
    assert_eq!(f.actions.ids(), [1]);
    f.engine.apply_style(node, Some(style)).unwrap();
    assert_eq!(f.actions.ids(), [1, 1]);
}

#[test]
fn conditions_completed_together_enter_once() {
    let mut f = fixture();
    let node = f.node(f.button);
    let theme = Style::builder()
        .trigger(
            Trigger::multi()
                .when(f.enabled, false)
                .when(f.hovered, true)
                .enter(TriggerAction::new(ActionId(5)))
                .exit(TriggerAction::new(ActionId(6))),
        )
        .build();
    f.engine.apply_theme_style(node, Some(theme)).unwrap();
    assert!(f.actions.ids().is_empty());

    let style = Style::builder()
        .set(f.enabled, false)
        .set(f.hovered, true)
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert_eq!(f.actions.ids(), [5]);

    f.engine.apply_style(node, None).unwrap();
    assert_eq!(f.actions.ids(), [5, 6]);
}

#[test]
fn multi_trigger_needs_every_condition() {
    let mut f = fixture();
    let node = f.node(f.button);
    let style = Style::builder()
        .trigger(
            Trigger::multi()
                .when(f.enabled, true)
                .when(f.hovered, true)
                .set(f.fill, 3)
                .enter(TriggerAction::new(ActionId(1)))
                .exit(TriggerAction::new(ActionId(2))),
        )
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();

    // Neither change completes the combination.
    f.engine.set_local(node, f.enabled, false).unwrap();
    f.engine.set_local(node, f.hovered, true).unwrap();
    assert!(f.actions.ids().is_empty());
    assert_eq!(f.engine.get(node, f.fill), Some(0));

    f.engine.set_local(node, f.enabled, true).unwrap();
    assert_eq!(f.actions.ids(), [1]);
    assert_eq!(f.engine.get(node, f.fill), Some(3));

    f.engine.set_local(node, f.hovered, false).unwrap();
    assert_eq!(f.actions.ids(), [1, 2]);
    assert_eq!(f.engine.get(node, f.fill), Some(0));
}

#[test]
fn data_trigger_follows_binding() {
    let mut f = fixture();
    let node = f.node(f.button);
    let binding = BindingId(1);
    let style = Style::builder()
        .trigger(
            Trigger::data(binding, true)
                .set(f.fill, 9)
                .enter(TriggerAction::new(ActionId(3))),
        )
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert_eq!(f.engine.get(node, f.fill), Some(0));

    f.bindings.set(node, binding, true);
    f.engine.binding_changed(node, binding).unwrap();
    assert_eq!(f.engine.get(node, f.fill), Some(9));
    assert_eq!(f.actions.ids(), [3]);
}

#[test]
fn event_triggers_fire_on_raise() {
    let mut f = fixture();
    let node = f.node(f.button);
    let style = Style::builder()
        .trigger(Trigger::event(EventId(5)).enter(TriggerAction::new(ActionId(10))))
        .build();
    f.engine.apply_style(node, Some(style)).unwrap();
    assert!(f.actions.ids().is_empty());

    f.engine.raise_event(node, EventId(4)).unwrap();
    assert!(f.actions.ids().is_empty());
    f.engine.raise_event(node, EventId(5)).unwrap();
    f.engine.raise_event(node, EventId(5)).unwrap();
    assert_eq!(f.actions.ids(), [10, 10]);
}

#[test]
fn template_event_on_child_acts_on_container() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Chrome"))
        .trigger(
            Trigger::event_of("Chrome", EventId(2))
                .enter(TriggerAction::new(ActionId(1)))
                .enter(TriggerAction::new(ActionId(2)).on("Chrome")),
        )
        .build();
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    let chrome = generated[0];

    f.engine.raise_event(container, EventId(2)).unwrap();
    assert!(f.actions.take().is_empty());

    f.engine.raise_event(chrome, EventId(2)).unwrap();
    assert_eq!(
        f.actions.take(),
        [(container, ActionId(1)), (chrome, ActionId(2))]
    );
}

#[test]
fn child_conditions_drive_container_and_children() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(
            FactoryNode::new(f.border)
                .name("Chrome")
                .child(FactoryNode::new(f.text).name("Label")),
        )
        .trigger(
            Trigger::property_of("Chrome", f.hovered, true)
                .set(f.fill, 5)
                .set_on("Label", f.opacity, 0.3),
        )
        .build();
    let generated = f.engine.instantiate_template(container, &template).unwrap();
    let (chrome, label) = (generated[0], generated[1]);
    assert_eq!(f.engine.get(container, f.fill), Some(0));
    assert_eq!(f.engine.get(label, f.opacity), Some(1.0));

    f.engine.set_local(chrome, f.hovered, true).unwrap();
    let fill = f.engine.resolve(container, f.fill.id()).unwrap();
    assert_eq!(fill.value.get::<u32>(), Some(5));
    assert_eq!(fill.source, ValueSource::TemplateTrigger);
    let opacity = f.engine.resolve(label, f.opacity.id()).unwrap();
    assert_eq!(opacity.value.get::<f64>(), Some(0.3));
    assert_eq!(opacity.source, ValueSource::TemplatedParentTrigger);
}

#[test]
fn child_triggers_prime_after_generation() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Chrome"))
        .trigger(
            Trigger::property_of("Chrome", f.enabled, true)
                .set(f.fill, 4)
                .enter(TriggerAction::new(ActionId(6))),
        )
        .build();
    f.engine.apply_template(container, Some(template.clone())).unwrap();
    assert_eq!(f.engine.get(container, f.fill), Some(0));
    assert!(f.actions.ids().is_empty());

    f.engine.instantiate_template(container, &template).unwrap();
    assert_eq!(f.actions.take(), [(container, ActionId(6))]);
    assert_eq!(f.engine.get(container, f.fill), Some(4));
}

#[test]
fn actions_for_missing_children_wait_for_generation() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Part"))
        .trigger(
            Trigger::property(f.hovered, true)
                .enter(TriggerAction::new(ActionId(1)).on("Part"))
                .enter(TriggerAction::new(ActionId(2)).on("Part")),
        )
        .build();
    f.engine.apply_template(container, Some(template.clone())).unwrap();
    f.engine.set_local(container, f.hovered, true).unwrap();
    assert!(f.actions.ids().is_empty());

    let generated = f.engine.instantiate_template(container, &template).unwrap();
    let part = generated[0];
    assert_eq!(
        f.actions.take(),
        [(part, ActionId(1)), (part, ActionId(2))]
    );
}

#[test]
fn template_change_drops_pending_actions() {
    let mut f = fixture();
    let container = f.node(f.button);
    let template = Template::builder()
        .root(FactoryNode::new(f.border).name("Part"))
        .trigger(
            Trigger::property(f.hovered, true).enter(TriggerAction::new(ActionId(1)).on("Part")),
        )
        .build();
    f.engine.apply_template(container, Some(template)).unwrap();
    f.engine.set_local(container, f.hovered, true).unwrap();

    let replacement = Template::builder()
        .root(FactoryNode::new(f.border).name("Part"))
        .build();
    f.engine.instantiate_template(container, &replacement).unwrap();
    assert!(f.actions.ids().is_empty());
}
