//! Render tree: persistent visual objects updated in place while their
//! owning reconciliation node keeps its kind.

use std::any::Any;
use std::fmt;
use std::fmt::Write as _;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::collections::map::HashMap;
use crate::element::HostTag;
use crate::props::Props;
use crate::NodeId;

slotmap::new_key_type! {
    /// Generational id of a render node.
    pub struct RenderId;
}

/// Layout geometry assigned by the host's layout pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Downcasting without repeating `as_any` on every render object.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Kind-specific renderer owned by a render node.
pub trait RenderObject: AsAny {
    fn mount(&mut self) {}
    /// Apply new parameters in place.
    fn update(&mut self, _props: &Props) {}
    fn unmount(&mut self) {}
}

/// Host environment the render tree splices itself into.
pub trait Backend {
    /// Instantiate the renderer for a terminal kind.
    fn create(&mut self, tag: HostTag, props: &Props) -> Box<dyn RenderObject>;

    /// Place `node` at `index` under `parent` (`None` is the host surface).
    /// Also used to move a node that is already attached.
    fn attach(&mut self, node: RenderId, parent: Option<RenderId>, index: usize);

    /// Remove `node` and everything below it from the output.
    fn detach(&mut self, node: RenderId);
}

pub struct RenderNode {
    tag: HostTag,
    props: Props,
    geometry: Option<Rect>,
    object: Box<dyn RenderObject>,
    owner: NodeId,
    parent: Option<RenderId>,
    attached: bool,
    children: SmallVec<[RenderId; 4]>,
}

impl RenderNode {
    pub fn tag(&self) -> HostTag {
        self.tag
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn geometry(&self) -> Option<Rect> {
        self.geometry
    }

    /// Back-reference to the owning reconciliation node. Check it with
    /// `Tree::is_live` before use; it does not keep the owner alive.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn parent(&self) -> Option<RenderId> {
        self.parent
    }

    pub fn children(&self) -> &[RenderId] {
        &self.children
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn object(&self) -> &dyn RenderObject {
        self.object.as_ref()
    }

    pub fn downcast_object<T: RenderObject>(&self) -> Option<&T> {
        (*self.object).as_any().downcast_ref::<T>()
    }

    pub fn downcast_object_mut<T: RenderObject>(&mut self) -> Option<&mut T> {
        (*self.object).as_any_mut().downcast_mut::<T>()
    }
}

impl fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderNode")
            .field("tag", &self.tag)
            .field("props", &self.props)
            .field("geometry", &self.geometry)
            .field("owner", &self.owner)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

#[derive(Default)]
pub struct RenderTree {
    nodes: SlotMap<RenderId, RenderNode>,
    roots: SmallVec<[RenderId; 4]>,
}

impl RenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RenderId) -> Option<&RenderNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: RenderId) -> Option<&mut RenderNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: RenderId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes attached directly to the host surface.
    pub fn roots(&self) -> &[RenderId] {
        &self.roots
    }

    pub fn children(&self, parent: Option<RenderId>) -> &[RenderId] {
        match parent {
            None => &self.roots,
            Some(id) => match self.nodes.get(id) {
                Some(node) => node.children.as_slice(),
                None => &[],
            },
        }
    }

    pub fn set_geometry(&mut self, id: RenderId, rect: Rect) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.geometry = Some(rect);
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert(
        &mut self,
        backend: &mut dyn Backend,
        tag: HostTag,
        props: Props,
        owner: NodeId,
    ) -> RenderId {
        let mut object = backend.create(tag, &props);
        object.mount();
        self.nodes.insert(RenderNode {
            tag,
            props,
            geometry: None,
            object,
            owner,
            parent: None,
            attached: false,
            children: SmallVec::new(),
        })
    }

    /// Update in place. Returns whether anything changed.
    pub(crate) fn update(&mut self, id: RenderId, props: &Props) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        if node.props == *props {
            return false;
        }
        log::trace!(
            "render {id:?} <{}> changed {:?}",
            node.tag,
            node.props.changed_names(props)
        );
        node.object.update(props);
        node.props = props.clone();
        true
    }

    /// Detach `id` from the host and drop it with its render descendants.
    ///
    /// Only the topmost attached nodes are detached; the host drops what
    /// hangs below them.
    pub(crate) fn remove_subtree(&mut self, backend: &mut dyn Backend, id: RenderId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match node.parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
        let mut stack = vec![(id, false)];
        while let Some((current, parent_attached)) = stack.pop() {
            let Some(mut node) = self.nodes.remove(current) else {
                continue;
            };
            if node.attached && !parent_attached {
                backend.detach(current);
            }
            node.object.unmount();
            stack.extend(node.children.iter().map(|child| (*child, node.attached)));
        }
    }

    /// Make `parent`'s children exactly `desired`, issuing the fewest attach
    /// calls that the insert-at-index model allows.
    pub(crate) fn sync_children(
        &mut self,
        backend: &mut dyn Backend,
        parent: Option<RenderId>,
        desired: &[RenderId],
    ) {
        let mut working: SmallVec<[RenderId; 8]> = SmallVec::from_slice(self.children(parent));
        if working.as_slice() == desired {
            return;
        }
        for (index, id) in desired.iter().copied().enumerate() {
            if working.get(index) == Some(&id) {
                continue;
            }
            if let Some(position) = working.iter().position(|existing| *existing == id) {
                working.remove(position);
            }
            working.insert(index, id);
            backend.attach(id, parent, index);
            if let Some(node) = self.nodes.get_mut(id) {
                node.parent = parent;
                node.attached = true;
            }
        }
        working.truncate(desired.len());
        let list = SmallVec::from_slice(&working);
        match parent {
            None => self.roots = list,
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children = list;
                }
            }
        }
    }

    /// Render ids in pre-order starting from the host surface.
    pub fn preorder(&self) -> Vec<RenderId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<RenderId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn dump(&self) -> String {
        let mut output = String::new();
        if self.roots.is_empty() {
            output.push_str("(empty)\n");
        }
        for root in &self.roots {
            self.dump_node(&mut output, *root, 0);
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: RenderId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.nodes.get(id) {
            Some(node) => {
                let _ = writeln!(output, "{indent}<{}> {}", node.tag, node.props);
                for child in &node.children {
                    self.dump_node(output, *child, depth + 1);
                }
            }
            None => {
                let _ = writeln!(output, "{indent}{id:?} (missing)");
            }
        }
    }
}

impl fmt::Debug for RenderTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTree")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish()
    }
}

/// Reference renderer kept by [`MemoryBackend`]: stores the latest props.
#[derive(Debug, Default)]
pub struct RecordingObject {
    pub tag: HostTag,
    pub props: Props,
    pub mounted: bool,
    pub updates: usize,
}

impl RenderObject for RecordingObject {
    fn mount(&mut self) {
        self.mounted = true;
    }

    fn update(&mut self, props: &Props) {
        self.props = props.clone();
        self.updates += 1;
    }

    fn unmount(&mut self) {
        self.mounted = false;
    }
}

/// One host call observed by [`MemoryBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendOp {
    Create { tag: HostTag },
    Attach {
        node: RenderId,
        parent: Option<RenderId>,
        index: usize,
    },
    Detach { node: RenderId },
}

/// In-memory host that mirrors the visual structure and logs every call.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    ops: Vec<BackendOp>,
    surface: HashMap<Option<RenderId>, Vec<RenderId>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[BackendOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<BackendOp> {
        std::mem::take(&mut self.ops)
    }

    /// Children as the host sees them.
    pub fn attached_children(&self, parent: Option<RenderId>) -> &[RenderId] {
        match self.surface.get(&parent) {
            Some(children) => children.as_slice(),
            None => &[],
        }
    }

    pub fn count(&self, matches: impl Fn(&BackendOp) -> bool) -> usize {
        self.ops.iter().filter(|op| matches(op)).count()
    }

    /// What the host surface shows, one node per line.
    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        let mut stack: Vec<(RenderId, usize)> = self
            .attached_children(None)
            .iter()
            .rev()
            .map(|id| (*id, 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            let _ = writeln!(output, "{}{id:?}", "  ".repeat(depth));
            stack.extend(
                self.attached_children(Some(id))
                    .iter()
                    .rev()
                    .map(|child| (*child, depth + 1)),
            );
        }
        output
    }

    fn unlink(&mut self, node: RenderId) {
        for children in self.surface.values_mut() {
            children.retain(|child| *child != node);
        }
    }
}

impl Backend for MemoryBackend {
    fn create(&mut self, tag: HostTag, props: &Props) -> Box<dyn RenderObject> {
        self.ops.push(BackendOp::Create { tag });
        Box::new(RecordingObject {
            tag,
            props: props.clone(),
            mounted: false,
            updates: 0,
        })
    }

    fn attach(&mut self, node: RenderId, parent: Option<RenderId>, index: usize) {
        self.ops.push(BackendOp::Attach {
            node,
            parent,
            index,
        });
        self.unlink(node);
        let children = self.surface.entry(parent).or_default();
        let index = index.min(children.len());
        children.insert(index, node);
    }

    fn detach(&mut self, node: RenderId) {
        self.ops.push(BackendOp::Detach { node });
        self.unlink(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.surface.remove(&Some(current)) {
                stack.extend(children);
            }
        }
    }
}
