// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node identifiers and the engine-owned node arena.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use understory_property::{ObjectType, PropertyId, PropertyStore};

use crate::instance::{InstanceLayer, InstanceStore};
use crate::resource::ResourceDictionary;
use crate::style::Style;
use crate::template::Template;
use crate::trigger::DeferredActions;
use crate::value::Effective;

/// Identifier for a node in the engine's tree.
///
/// A slot index plus a generation counter. Removing a node frees its slot;
/// reusing the slot bumps the generation, so stale ids never alias a newer
/// node. Back references such as the templated parent and the mentor are
/// stored as `NodeId`s and are therefore non-owning.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(u32, u32);

impl NodeId {
    const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    const fn idx(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Per-node cascade flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// Descendants do not inherit values from this node or above.
        const INHERITANCE_BOUNDARY = 0b0000_0001;
        /// The node was created by a template.
        const TEMPLATE_GENERATED = 0b0000_0010;
        /// The current style came from an implicit type-keyed lookup.
        const IMPLICIT_STYLE = 0b0000_0100;
        /// The theme style was assigned explicitly.
        const EXPLICIT_THEME_STYLE = 0b0000_1000;
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) object_type: ObjectType,
    pub(crate) flags: NodeFlags,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) mentor: Option<NodeId>,
    pub(crate) mentees: SmallVec<[NodeId; 2]>,
    pub(crate) locals: PropertyStore,
    pub(crate) style: Option<Style>,
    pub(crate) theme_style: Option<Style>,
    pub(crate) template: Option<Template>,
    /// 0 for the node itself, position in the templated parent's generated tree otherwise.
    pub(crate) child_index: u32,
    pub(crate) templated_parent: Option<NodeId>,
    pub(crate) resources: Option<ResourceDictionary>,
    /// Generated nodes by `child_index - 1`.
    pub(crate) generated: Vec<NodeId>,
    pub(crate) name_scope: HashMap<&'static str, NodeId>,
    pub(crate) instances: InstanceStore,
    /// Conditional triggers currently active, by owning layer and index.
    pub(crate) active_triggers: HashSet<(InstanceLayer, usize)>,
    pub(crate) effective: HashMap<PropertyId, Effective>,
    pub(crate) deferred: Vec<DeferredActions>,
}

impl Node {
    pub(crate) fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            flags: NodeFlags::empty(),
            parent: None,
            children: Vec::new(),
            mentor: None,
            mentees: SmallVec::new(),
            locals: PropertyStore::new(),
            style: None,
            theme_style: None,
            template: None,
            child_index: 0,
            templated_parent: None,
            resources: None,
            generated: Vec::new(),
            name_scope: HashMap::new(),
            instances: InstanceStore::default(),
            active_triggers: HashSet::new(),
            effective: HashMap::new(),
            deferred: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Generational arena of nodes.
#[derive(Debug, Default)]
pub(crate) struct NodeTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl NodeTree {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            return NodeId::new(idx, slot.generation);
        }
        #[expect(
            clippy::cast_possible_truncation,
            reason = "node counts stay far below u32::MAX"
        )]
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            node: Some(node),
        });
        NodeId::new(idx, 1)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.idx())?;
        if slot.generation != id.1 {
            return None;
        }
        let node = slot.node.take()?;
        self.free.push(id.0);
        self.live -= 1;
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.idx())
            .filter(|slot| slot.generation == id.1)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.idx())
            .filter(|slot| slot.generation == id.1)
            .and_then(|slot| slot.node.as_mut())
    }

    pub(crate) fn is_alive(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Live node ids in slot order.
    pub(crate) fn ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.is_some())
            .map(|(idx, slot)| {
                #[expect(clippy::cast_possible_truncation, reason = "slot index fits u32")]
                NodeId::new(idx as u32, slot.generation)
            })
            .collect()
    }

    /// Tree parent, falling back to the mentor for parentless nodes.
    pub(crate) fn inheritance_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        node.parent
            .or(node.mentor.filter(|mentor| self.is_alive(*mentor)))
    }

    /// Nodes that receive inherited values and resource changes from `id`.
    pub(crate) fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        node.children
            .iter()
            .chain(node.mentees.iter())
            .copied()
            .filter(|child| self.is_alive(*child))
            .collect()
    }

    /// Resolves a child index relative to a container.
    pub(crate) fn template_child(&self, container: NodeId, child_index: u32) -> Option<NodeId> {
        if child_index == 0 {
            return self.is_alive(container).then_some(container);
        }
        let node = self.get(container)?;
        node.generated
            .get(child_index as usize - 1)
            .copied()
            .filter(|id| self.is_alive(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> ObjectType {
        ObjectType::new(0)
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let mut tree = NodeTree::default();
        let a = tree.insert(Node::new(ty()));
        assert!(tree.is_alive(a));
        assert!(tree.remove(a).is_some());
        assert!(!tree.is_alive(a));
        assert!(tree.remove(a).is_none());

        let b = tree.insert(Node::new(ty()));
        assert_eq!(a.idx(), b.idx());
        assert_ne!(a, b);
        assert!(tree.get(a).is_none());
        assert!(tree.get(b).is_some());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.ids(), [b]);
    }

    #[test]
    fn inheritance_parent_prefers_tree_parent_then_live_mentor() {
        let mut tree = NodeTree::default();
        let parent = tree.insert(Node::new(ty()));
        let mentor = tree.insert(Node::new(ty()));
        let child = tree.insert(Node::new(ty()));

        tree.get_mut(child).unwrap().mentor = Some(mentor);
        assert_eq!(tree.inheritance_parent(child), Some(mentor));

        tree.get_mut(child).unwrap().parent = Some(parent);
        assert_eq!(tree.inheritance_parent(child), Some(parent));

        tree.get_mut(child).unwrap().parent = None;
        tree.remove(mentor);
        assert_eq!(tree.inheritance_parent(child), None);
    }

    #[test]
    fn template_child_zero_is_container() {
        let mut tree = NodeTree::default();
        let container = tree.insert(Node::new(ty()));
        let generated = tree.insert(Node::new(ty()));
        tree.get_mut(container).unwrap().generated.push(generated);

        assert_eq!(tree.template_child(container, 0), Some(container));
        assert_eq!(tree.template_child(container, 1), Some(generated));
        assert_eq!(tree.template_child(container, 2), None);
    }
}
