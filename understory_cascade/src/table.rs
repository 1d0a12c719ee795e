// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compiled lookup tables of styles and templates.
//!
//! A [`CompiledTable`] is built once when its owner is sealed and then
//! shared read-only by every node the owner is applied to. It answers
//! three questions quickly:
//!
//! - which records can supply `(child index, property)`,
//! - which `(child index, property)` pairs depend on a trigger source,
//! - which properties of the container the owner sets at all.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use understory_property::{ErasedValue, ObjectType, PropertyFlags, PropertyId, PropertyRegistry};

use crate::error::CascadeError;
use crate::resource::ResourceDictionary;
use crate::style::{RecordData, SealState, Setter, Style};
use crate::template::{FactoryNode, FactoryTemplate, Template};
use crate::trigger::{BindingId, ConditionSource, EventId, Trigger, TriggerAction, TriggerKind};
use crate::value::SetterValue;

/// What a trigger condition reads, with names resolved to child indices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TriggerSource {
    Property { child: u32, property: PropertyId },
    Binding(BindingId),
}

/// One candidate value for a `(child index, property)` pair.
#[derive(Clone, Debug)]
pub(crate) struct Record {
    /// Index of the owning trigger, `None` for unconditional records.
    pub(crate) trigger: Option<usize>,
    /// Position in the pair's record list; part of the instance key.
    pub(crate) slot: u32,
    pub(crate) value: SetterValue,
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledCondition {
    pub(crate) source: TriggerSource,
    pub(crate) value: ErasedValue,
}

/// Consecutive actions aimed at the same child.
#[derive(Clone, Debug)]
pub(crate) struct ActionRun {
    pub(crate) child: u32,
    pub(crate) actions: Rc<[TriggerAction]>,
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledTrigger {
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) enter: Vec<ActionRun>,
    pub(crate) exit: Vec<ActionRun>,
    /// Some condition reads a generated child.
    pub(crate) reads_children: bool,
}

/// A factory node flattened into pre-order.
#[derive(Clone, Debug)]
pub(crate) struct FlatFactory {
    pub(crate) object_type: ObjectType,
    /// Child index of the parent; 0 is the container.
    pub(crate) parent: u32,
    pub(crate) name: Option<&'static str>,
    pub(crate) template: Option<FactoryTemplate>,
}

/// The sealed, shared lookup structure of a style or template.
#[derive(Debug, Default)]
pub(crate) struct CompiledTable {
    records: HashMap<(u32, PropertyId), SmallVec<[Record; 2]>>,
    triggers: Vec<CompiledTrigger>,
    reverse: HashMap<TriggerSource, SmallVec<[(u32, PropertyId); 4]>>,
    source_triggers: HashMap<TriggerSource, SmallVec<[usize; 2]>>,
    /// Trigger sources in first-seen order.
    sources: Vec<TriggerSource>,
    event_triggers: HashMap<(u32, EventId), SmallVec<[usize; 2]>>,
    container_dependent: Vec<PropertyId>,
    names: HashMap<&'static str, u32>,
    factories: Vec<FlatFactory>,
    /// Unconditional instance records of generated children, in declaration order.
    seeded: Vec<(u32, PropertyId)>,
    resources: Vec<ResourceDictionary>,
    has_instance_values: bool,
}

impl CompiledTable {
    pub(crate) fn records(&self, child: u32, property: PropertyId) -> &[Record] {
        self.records
            .get(&(child, property))
            .map_or(&[], SmallVec::as_slice)
    }

    pub(crate) fn trigger(&self, idx: usize) -> &CompiledTrigger {
        &self.triggers[idx]
    }

    pub(crate) fn triggers(&self) -> &[CompiledTrigger] {
        &self.triggers
    }

    /// Pairs whose records depend on `source`.
    pub(crate) fn dependents(&self, source: &TriggerSource) -> &[(u32, PropertyId)] {
        self.reverse.get(source).map_or(&[], SmallVec::as_slice)
    }

    /// Triggers with a condition reading `source`.
    pub(crate) fn triggers_reading(&self, source: &TriggerSource) -> &[usize] {
        self.source_triggers
            .get(source)
            .map_or(&[], SmallVec::as_slice)
    }

    pub(crate) fn sources(&self) -> &[TriggerSource] {
        &self.sources
    }

    pub(crate) fn event_triggers(&self, child: u32, event: EventId) -> &[usize] {
        self.event_triggers
            .get(&(child, event))
            .map_or(&[], SmallVec::as_slice)
    }

    /// Sorted properties of the container that any record sets.
    pub(crate) fn container_dependent(&self) -> &[PropertyId] {
        &self.container_dependent
    }

    pub(crate) fn child_index(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub(crate) fn factories(&self) -> &[FlatFactory] {
        &self.factories
    }

    pub(crate) fn seeded(&self) -> &[(u32, PropertyId)] {
        &self.seeded
    }

    /// Resource dictionaries of the owner, most derived first.
    pub(crate) fn resources(&self) -> &[ResourceDictionary] {
        &self.resources
    }

    pub(crate) fn has_instance_values(&self) -> bool {
        self.has_instance_values
    }

    pub(crate) fn has_implicit_styles(&self) -> bool {
        self.resources
            .iter()
            .any(ResourceDictionary::has_implicit_styles)
    }
}

/// Runs `compile` under the seal guard of one style or template.
///
/// A sealed object returns its table; an object already compiling is
/// rejected; a failed compile leaves the object open.
pub(crate) fn seal(
    state: &RefCell<SealState>,
    compile: impl FnOnce() -> Result<CompiledTable, CascadeError>,
) -> Result<Rc<CompiledTable>, CascadeError> {
    {
        let mut current = state.borrow_mut();
        match &*current {
            SealState::Sealed(table) => return Ok(table.clone()),
            SealState::Compiling => return Err(CascadeError::ReentrantCompile),
            SealState::Open => *current = SealState::Compiling,
        }
    }
    let result = compile();
    let mut current = state.borrow_mut();
    match result {
        Ok(table) => {
            let table = Rc::new(table);
            *current = SealState::Sealed(table.clone());
            Ok(table)
        }
        Err(err) => {
            *current = SealState::Open;
            Err(err)
        }
    }
}

struct Compiler<'a> {
    registry: &'a PropertyRegistry,
    table: CompiledTable,
}

impl<'a> Compiler<'a> {
    fn new(registry: &'a PropertyRegistry) -> Self {
        Self {
            registry,
            table: CompiledTable::default(),
        }
    }

    fn resolve_name(&self, name: Option<&'static str>) -> Result<u32, CascadeError> {
        match name {
            None => Ok(0),
            Some(name) => self
                .table
                .child_index(name)
                .ok_or(CascadeError::UnresolvedSourceName { name }),
        }
    }

    fn check_settable(&self, property: PropertyId) -> Result<(), CascadeError> {
        if self.registry.flags(property).contains(PropertyFlags::RESERVED) {
            return Err(CascadeError::ReservedProperty {
                property: self.registry.name(property).unwrap_or("<unregistered>"),
            });
        }
        Ok(())
    }

    fn push_record(
        &mut self,
        child: u32,
        property: PropertyId,
        trigger: Option<usize>,
        value: SetterValue,
    ) -> Result<(), CascadeError> {
        self.check_settable(property)?;
        self.table.has_instance_values |= value.needs_instance();
        let records = self.table.records.entry((child, property)).or_default();
        #[expect(
            clippy::cast_possible_truncation,
            reason = "record lists are tiny compared to u32::MAX"
        )]
        let slot = records.len() as u32;
        if trigger.is_none() && child > 0 && value.needs_instance() {
            self.table.seeded.push((child, property));
        }
        records.push(Record {
            trigger,
            slot,
            value,
        });
        if child == 0 {
            self.table.container_dependent.push(property);
        }
        Ok(())
    }

    fn push_setter(&mut self, setter: &Setter, trigger: Option<usize>) -> Result<(), CascadeError> {
        let child = self.resolve_name(setter.target)?;
        self.push_record(child, setter.property, trigger, setter.value.clone())
    }

    /// Flattens the factory tree in pre-order, numbering nodes from 1.
    fn flatten(&mut self, root: &FactoryNode) -> Result<(), CascadeError> {
        let mut stack: Vec<(&FactoryNode, u32)> = vec![(root, 0)];
        while let Some((node, parent)) = stack.pop() {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "generated trees are far smaller than u32::MAX"
            )]
            let child = self.table.factories.len() as u32 + 1;
            if let Some(name) = node.name
                && self.table.names.insert(name, child).is_some()
            {
                return Err(CascadeError::DuplicateName { name });
            }
            for (property, value) in &node.values {
                self.push_record(child, *property, None, value.clone())?;
            }
            self.table.factories.push(FlatFactory {
                object_type: node.object_type,
                parent,
                name: node.name,
                template: node.template.clone(),
            });
            stack.extend(node.children.iter().rev().map(|c| (c, child)));
        }
        Ok(())
    }

    fn check_shape(trigger: &Trigger) -> Result<(), CascadeError> {
        let reason = match (&trigger.kind, trigger.conditions.len()) {
            (TriggerKind::Event { .. }, _) if !trigger.setters.is_empty() => {
                "event triggers cannot carry setters"
            }
            (TriggerKind::Event { .. }, 0) => return Ok(()),
            (TriggerKind::Event { .. }, _) => "event triggers take no conditions",
            (TriggerKind::Property | TriggerKind::Data, 1) => "",
            (TriggerKind::Property | TriggerKind::Data, _) => {
                "single-condition triggers need exactly one condition"
            }
            (TriggerKind::MultiProperty | TriggerKind::MultiData, 0) => {
                "multi-condition triggers need at least one condition"
            }
            (TriggerKind::MultiProperty | TriggerKind::MultiData, _) => "",
        };
        if !reason.is_empty() {
            return Err(CascadeError::UnsupportedTrigger { reason });
        }
        let wants_binding = matches!(trigger.kind, TriggerKind::Data | TriggerKind::MultiData);
        for condition in &trigger.conditions {
            let is_binding = matches!(condition.source, ConditionSource::Binding(_));
            if is_binding != wants_binding {
                return Err(CascadeError::UnsupportedTrigger {
                    reason: if wants_binding {
                        "data triggers only take binding conditions"
                    } else {
                        "property triggers only take property conditions"
                    },
                });
            }
        }
        Ok(())
    }

    fn action_runs(&self, actions: &[TriggerAction]) -> Result<Vec<ActionRun>, CascadeError> {
        let mut runs: Vec<(u32, Vec<TriggerAction>)> = Vec::new();
        for action in actions {
            let child = self.resolve_name(action.target)?;
            match runs.last_mut() {
                Some((last, batch)) if *last == child => batch.push(action.clone()),
                _ => runs.push((child, vec![action.clone()])),
            }
        }
        Ok(runs
            .into_iter()
            .map(|(child, actions)| ActionRun {
                child,
                actions: actions.into(),
            })
            .collect())
    }

    fn add_trigger(&mut self, trigger: &Trigger) -> Result<(), CascadeError> {
        Self::check_shape(trigger)?;
        let idx = self.triggers_len();

        if let TriggerKind::Event { event, source_name } = trigger.kind {
            let child = self.resolve_name(source_name)?;
            self.table
                .event_triggers
                .entry((child, event))
                .or_default()
                .push(idx);
        }

        let mut conditions = Vec::with_capacity(trigger.conditions.len());
        for condition in &trigger.conditions {
            let source = match condition.source {
                ConditionSource::Property {
                    source_name,
                    property,
                } => TriggerSource::Property {
                    child: self.resolve_name(source_name)?,
                    property,
                },
                ConditionSource::Binding(binding) => TriggerSource::Binding(binding),
            };
            conditions.push(CompiledCondition {
                source,
                value: condition.value.clone(),
            });
        }

        let mut targets: SmallVec<[(u32, PropertyId); 4]> = SmallVec::new();
        for setter in &trigger.setters {
            self.push_setter(setter, Some(idx))?;
            let target = (self.resolve_name(setter.target)?, setter.property);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        for condition in &conditions {
            let source = condition.source;
            let dependents = self.table.reverse.entry(source).or_default();
            for target in &targets {
                if !dependents.contains(target) {
                    dependents.push(*target);
                }
            }
            let readers = self.table.source_triggers.entry(source).or_default();
            if !readers.contains(&idx) {
                readers.push(idx);
            }
            if !self.table.sources.contains(&source) {
                self.table.sources.push(source);
            }
        }

        let reads_children = conditions
            .iter()
            .any(|c| matches!(c.source, TriggerSource::Property { child, .. } if child > 0));
        let enter = self.action_runs(&trigger.enter_actions)?;
        let exit = self.action_runs(&trigger.exit_actions)?;
        self.table.triggers.push(CompiledTrigger {
            conditions,
            enter,
            exit,
            reads_children,
        });
        Ok(())
    }

    fn triggers_len(&self) -> usize {
        self.table.triggers.len()
    }

    fn add_records(&mut self, records: &RecordData) -> Result<(), CascadeError> {
        for setter in &records.setters {
            self.push_setter(setter, None)?;
        }
        for trigger in &records.triggers {
            self.add_trigger(trigger)?;
        }
        Ok(())
    }

    fn finish(mut self) -> CompiledTable {
        self.table.container_dependent.sort_unstable();
        self.table.container_dependent.dedup();
        self.table.seeded.dedup();
        for dictionary in &self.table.resources {
            dictionary.seal();
        }
        self.table
    }
}

/// Compiles a flattened `based-on` chain, base first.
///
/// Setters of every style come before the triggers of every style, so a
/// derived style's records are always the more recently declared ones.
pub(crate) fn compile_style(
    chain: &[Style],
    registry: &PropertyRegistry,
) -> Result<CompiledTable, CascadeError> {
    let mut compiler = Compiler::new(registry);
    for style in chain {
        for setter in &style.records().setters {
            compiler.push_setter(setter, None)?;
        }
    }
    for style in chain {
        for trigger in &style.records().triggers {
            compiler.add_trigger(trigger)?;
        }
    }
    compiler.table.resources = chain
        .iter()
        .rev()
        .filter_map(|style| style.resources().cloned())
        .collect();
    let table = compiler.finish();
    tracing::debug!(
        chain = chain.len(),
        records = table.records.len(),
        triggers = table.triggers.len(),
        "compiled style"
    );
    Ok(table)
}

pub(crate) fn compile_template(
    template: &Template,
    registry: &PropertyRegistry,
) -> Result<CompiledTable, CascadeError> {
    let mut compiler = Compiler::new(registry);
    if let Some(root) = template.root() {
        compiler.flatten(root)?;
    }
    compiler.add_records(template.records())?;
    compiler.table.resources = template.resources().cloned().into_iter().collect();
    let table = compiler.finish();
    tracing::debug!(
        nodes = table.factories.len(),
        records = table.records.len(),
        triggers = table.triggers.len(),
        "compiled template"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FactoryNode;
    use crate::trigger::{ActionId, TriggerAction};
    use understory_property::{Property, PropertyMetadataBuilder};

    struct Fixture {
        registry: PropertyRegistry,
        enabled: Property<bool>,
        hovered: Property<bool>,
        opacity: Property<f64>,
        fill: Property<u32>,
        reserved: Property<Option<&'static str>>,
        panel: ObjectType,
    }

    fn fixture() -> Fixture {
        let mut registry = PropertyRegistry::new();
        let enabled = registry.register("IsEnabled", PropertyMetadataBuilder::new(true).build());
        let hovered = registry.register("IsMouseOver", PropertyMetadataBuilder::new(false).build());
        let opacity = registry.register("Opacity", PropertyMetadataBuilder::new(1.0_f64).build());
        let fill = registry.register("Fill", PropertyMetadataBuilder::new(0_u32).build());
        let reserved = registry.register(
            "Name",
            PropertyMetadataBuilder::new(None::<&'static str>)
                .reserved()
                .build(),
        );
        let panel = registry.register_type("Panel", None);
        Fixture {
            registry,
            enabled,
            hovered,
            opacity,
            fill,
            reserved,
            panel,
        }
    }

    fn style_table(f: &Fixture, style: &Style) -> Result<CompiledTable, CascadeError> {
        compile_style(core::slice::from_ref(style), &f.registry)
    }

    #[test]
    fn reverse_index_maps_sources_to_setters() {
        let f = fixture();
        let style = Style::builder()
            .set(f.opacity, 1.0)
            .trigger(Trigger::property(f.enabled, false).set(f.opacity, 0.5))
            .trigger(
                Trigger::multi()
                    .when(f.enabled, true)
                    .when(f.hovered, true)
                    .set(f.fill, 7),
            )
            .build();
        let table = style_table(&f, &style).unwrap();

        let enabled = TriggerSource::Property {
            child: 0,
            property: f.enabled.id(),
        };
        let hovered = TriggerSource::Property {
            child: 0,
            property: f.hovered.id(),
        };
        assert_eq!(
            table.dependents(&enabled),
            [(0, f.opacity.id()), (0, f.fill.id())]
        );
        assert_eq!(table.dependents(&hovered), [(0, f.fill.id())]);
        assert_eq!(table.triggers_reading(&enabled), [0, 1]);
        assert_eq!(table.sources(), [enabled, hovered]);

        let mut expected = vec![f.opacity.id(), f.fill.id()];
        expected.sort_unstable();
        assert_eq!(table.container_dependent(), expected.as_slice());

        let records = table.records(0, f.opacity.id());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trigger, None);
        assert_eq!(records[1].trigger, Some(0));
        assert_eq!(records[1].slot, 1);
    }

    #[test]
    fn based_on_chain_puts_derived_records_last() {
        let f = fixture();
        let base = Style::builder().set(f.opacity, 0.1).build();
        let derived = Style::builder()
            .based_on(base.clone())
            .set(f.opacity, 0.2)
            .build();
        let table = compile_style(&[base, derived], &f.registry).unwrap();
        let records = table.records(0, f.opacity.id());
        assert_eq!(records.len(), 2);
        let SetterValue::Value(last) = &records[1].value else {
            panic!("expected a plain value");
        };
        assert_eq!(last.get::<f64>(), Some(0.2));
    }

    #[test]
    fn template_children_are_numbered_in_pre_order() {
        let f = fixture();
        let template = Template::builder()
            .root(
                FactoryNode::new(f.panel)
                    .name("Root")
                    .child(
                        FactoryNode::new(f.panel)
                            .name("A")
                            .child(FactoryNode::new(f.panel).name("A1")),
                    )
                    .child(FactoryNode::new(f.panel).name("B").set(f.fill, 3)),
            )
            .build();
        let table = compile_template(&template, &f.registry).unwrap();
        assert_eq!(table.child_index("Root"), Some(1));
        assert_eq!(table.child_index("A"), Some(2));
        assert_eq!(table.child_index("A1"), Some(3));
        assert_eq!(table.child_index("B"), Some(4));
        let parents: Vec<u32> = table.factories().iter().map(|n| n.parent).collect();
        assert_eq!(parents, [0, 1, 2, 1]);
        assert_eq!(table.records(4, f.fill.id()).len(), 1);
        assert!(table.container_dependent().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let f = fixture();
        let template = Template::builder()
            .root(
                FactoryNode::new(f.panel)
                    .name("Part")
                    .child(FactoryNode::new(f.panel).name("Part")),
            )
            .build();
        assert_eq!(
            compile_template(&template, &f.registry).unwrap_err(),
            CascadeError::DuplicateName { name: "Part" }
        );
    }

    #[test]
    fn names_inside_styles_never_resolve() {
        let f = fixture();
        let style = Style::builder()
            .trigger(Trigger::property_of("Part", f.enabled, true).set(f.opacity, 0.3))
            .build();
        assert_eq!(
            style_table(&f, &style).unwrap_err(),
            CascadeError::UnresolvedSourceName { name: "Part" }
        );

        let style = Style::builder()
            .trigger(
                Trigger::property(f.enabled, true)
                    .enter(TriggerAction::new(ActionId(1)).on("Missing")),
            )
            .build();
        assert_eq!(
            style_table(&f, &style).unwrap_err(),
            CascadeError::UnresolvedSourceName { name: "Missing" }
        );
    }

    #[test]
    fn reserved_properties_are_rejected() {
        let f = fixture();
        let style = Style::builder().set(f.reserved, Some("x")).build();
        assert_eq!(
            style_table(&f, &style).unwrap_err(),
            CascadeError::ReservedProperty { property: "Name" }
        );

        let template = Template::builder()
            .root(FactoryNode::new(f.panel).set(f.reserved, Some("x")))
            .build();
        assert!(matches!(
            compile_template(&template, &f.registry),
            Err(CascadeError::ReservedProperty { .. })
        ));
    }

    #[test]
    fn malformed_triggers_are_rejected() {
        let f = fixture();
        let cases = [
            Trigger::event(EventId(1)).set(f.opacity, 0.5),
            Trigger::multi().set(f.opacity, 0.5),
            Trigger::property(f.enabled, true).when(f.hovered, true),
            Trigger::multi().when_bound(BindingId(1), true),
            Trigger::multi_data().when(f.enabled, true),
        ];
        for trigger in cases {
            let style = Style::builder().trigger(trigger).build();
            assert!(matches!(
                style_table(&f, &style),
                Err(CascadeError::UnsupportedTrigger { .. })
            ));
        }
    }

    #[test]
    fn actions_are_grouped_by_target_in_order() {
        let f = fixture();
        let template = Template::builder()
            .root(FactoryNode::new(f.panel).name("Part"))
            .trigger(
                Trigger::event(EventId(4))
                    .enter(TriggerAction::new(ActionId(1)).on("Part"))
                    .enter(TriggerAction::new(ActionId(2)).on("Part"))
                    .enter(TriggerAction::new(ActionId(3))),
            )
            .build();
        let table = compile_template(&template, &f.registry).unwrap();
        assert_eq!(table.event_triggers(0, EventId(4)), [0]);
        let runs = &table.trigger(0).enter;
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].child, runs[0].actions.len()), (1, 2));
        assert_eq!((runs[1].child, runs[1].actions.len()), (0, 1));
    }

    #[test]
    fn seal_guards_reentry_and_reopens_on_error() {
        let state = RefCell::new(SealState::Open);
        let err = seal(&state, || {
            assert!(matches!(
                seal(&state, || Ok(CompiledTable::default())),
                Err(CascadeError::ReentrantCompile)
            ));
            Err(CascadeError::ReentrantCompile)
        });
        assert!(err.is_err());
        assert!(matches!(*state.borrow(), SealState::Open));

        let first = seal(&state, || Ok(CompiledTable::default())).unwrap();
        let second = seal(&state, || unreachable!()).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn instance_records_are_flagged() {
        let f = fixture();
        let template = Template::builder()
            .root(FactoryNode::new(f.panel).set_value(
                f.fill.id(),
                SetterValue::Cloneable(ErasedValue::new(5_u32)),
            ))
            .build();
        let table = compile_template(&template, &f.registry).unwrap();
        assert!(table.has_instance_values());
        assert_eq!(table.seeded(), [(1, f.fill.id())]);
    }
}
