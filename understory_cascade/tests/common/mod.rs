// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared fixture for the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hashbrown::HashMap;
use understory_cascade::{
    ActionId, ActionSink, BindingId, BindingSource, Engine, EngineConfig, Expression,
    InstanceValue, NodeId, TriggerAction, ValueFactory,
};
use understory_property::{
    ErasedValue, ObjectType, Property, PropertyId, PropertyMetadataBuilder, PropertyRegistry,
    PropertyValue,
};

/// Records every dispatched action in order.
#[derive(Clone, Debug, Default)]
pub(crate) struct ActionLog(Rc<RefCell<Vec<(NodeId, ActionId)>>>);

impl ActionLog {
    pub(crate) fn take(&self) -> Vec<(NodeId, ActionId)> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub(crate) fn ids(&self) -> Vec<u32> {
        self.0.borrow().iter().map(|(_, id)| id.0).collect()
    }
}

impl ActionSink for ActionLog {
    fn dispatch(&mut self, node: NodeId, actions: &[TriggerAction]) {
        self.0
            .borrow_mut()
            .extend(actions.iter().map(|action| (node, action.id)));
    }
}

/// Binding values set by the test.
#[derive(Clone, Debug, Default)]
pub(crate) struct Bindings(Rc<RefCell<HashMap<(NodeId, BindingId), ErasedValue>>>);

impl Bindings {
    pub(crate) fn set<T: PropertyValue>(&self, node: NodeId, binding: BindingId, value: T) {
        self.0
            .borrow_mut()
            .insert((node, binding), ErasedValue::new(value));
    }
}

impl BindingSource for Bindings {
    fn current_value(&self, node: NodeId, binding: BindingId) -> Option<ErasedValue> {
        self.0.borrow().get(&(node, binding)).cloned()
    }
}

pub(crate) struct Fixture {
    pub(crate) engine: Engine,
    pub(crate) actions: ActionLog,
    pub(crate) bindings: Bindings,
    pub(crate) enabled: Property<bool>,
    pub(crate) hovered: Property<bool>,
    pub(crate) opacity: Property<f64>,
    pub(crate) fill: Property<u32>,
    pub(crate) font_size: Property<f64>,
    pub(crate) items: Property<Vec<u32>>,
    pub(crate) control: ObjectType,
    pub(crate) button: ObjectType,
    pub(crate) border: ObjectType,
    pub(crate) text: ObjectType,
    pub(crate) panel: ObjectType,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

pub(crate) fn fixture_with(config: EngineConfig) -> Fixture {
    let mut registry = PropertyRegistry::new();
    let enabled = registry.register("IsEnabled", PropertyMetadataBuilder::new(true).build());
    let hovered = registry.register("IsMouseOver", PropertyMetadataBuilder::new(false).build());
    let opacity = registry.register("Opacity", PropertyMetadataBuilder::new(1.0_f64).build());
    let fill = registry.register("Fill", PropertyMetadataBuilder::new(0_u32).build());
    let font_size = registry.register(
        "FontSize",
        PropertyMetadataBuilder::new(12.0_f64).inherits(true).build(),
    );
    let items = registry.register("Items", PropertyMetadataBuilder::new(Vec::<u32>::new()).build());
    let control = registry.register_type("Control", None);
    let button = registry.register_type("Button", Some(control));
    let border = registry.register_type("Border", None);
    let text = registry.register_type("Text", None);
    let panel = registry.register_type("Panel", None);

    let actions = ActionLog::default();
    let bindings = Bindings::default();
    let mut engine = Engine::new(registry, config);
    engine.set_action_sink(actions.clone());
    engine.set_binding_source(bindings.clone());

    Fixture {
        engine,
        actions,
        bindings,
        enabled,
        hovered,
        opacity,
        fill,
        font_size,
        items,
        control,
        button,
        border,
        text,
        panel,
    }
}

impl Fixture {
    pub(crate) fn node(&mut self, ty: ObjectType) -> NodeId {
        self.engine.create_node(ty).unwrap()
    }

    pub(crate) fn child(&mut self, parent: NodeId, ty: ObjectType) -> NodeId {
        let child = self.node(ty);
        self.engine.append_child(parent, child).unwrap();
        child
    }
}

/// Installs a test subscriber so `RUST_LOG=trace` shows engine logs.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Hands out a numbered expression per node and counts lifecycle calls.
#[derive(Default)]
pub(crate) struct Numbered {
    next: Cell<u32>,
    pub(crate) attached: Rc<Cell<u32>>,
    pub(crate) detached: Rc<Cell<u32>>,
}

struct Serial {
    serial: u32,
    attached: Rc<Cell<u32>>,
    detached: Rc<Cell<u32>>,
}

impl Expression for Serial {
    fn attach(&self, _: NodeId, _: PropertyId) {
        self.attached.set(self.attached.get() + 1);
    }

    fn detach(&self, _: NodeId, _: PropertyId) {
        self.detached.set(self.detached.get() + 1);
    }

    fn value(&self) -> Option<ErasedValue> {
        Some(ErasedValue::new(self.serial))
    }
}

impl ValueFactory for Numbered {
    fn create(&self, _: NodeId, _: PropertyId) -> InstanceValue {
        self.next.set(self.next.get() + 1);
        InstanceValue::Expression(Rc::new(Serial {
            serial: self.next.get(),
            attached: self.attached.clone(),
            detached: self.detached.clone(),
        }))
    }
}
