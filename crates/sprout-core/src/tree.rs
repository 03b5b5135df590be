//! The reconciliation tree: diffing, the flush loop and error routing.

use std::fmt::{self, Write as _};
use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::collections::map::{HashMap, HashSet};
use crate::element::{AnyComponent, Component, ComponentType, Element, ElementBody, Fallback, Key, Kind};
use crate::error::{FlushError, MutationError, ProducerError};
use crate::handle::{NodeCell, StateHandle};
use crate::options::TreeOptions;
use crate::platform::FlushScheduler;
use crate::render::{Backend, RenderId, RenderTree};
use crate::scheduler::Scheduler;
use crate::NodeId;

/// What one `mount`, `unmount` or `flush` pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Producer callbacks that returned a description.
    pub rebuilt: usize,
    pub created: usize,
    pub destroyed: usize,
    /// Matched nodes updated in place.
    pub reused: usize,
    /// Dirty registrations whose node was destroyed before the flush.
    pub stale_dropped: usize,
    /// Dirty registrations already satisfied by an ancestor rebuild.
    pub deduplicated: usize,
    /// Producer errors absorbed by error boundaries.
    pub caught: usize,
}

enum NodeBody {
    Host,
    Component(Rc<dyn AnyComponent>),
    Boundary { fallback: Fallback, failed: bool },
    Fragment,
}

struct ReconNode {
    kind: Kind,
    key: Option<Key>,
    body: NodeBody,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
    render: Option<RenderId>,
    cell: Rc<NodeCell>,
    depth: usize,
}

/// Owns the reconciliation nodes, the render tree and the host backend.
///
/// All structural work happens inside `mount`, `unmount` and `flush`.
/// Producers only see a [`RenderCx`](crate::RenderCx), so a flush can
/// never start from inside another one.
pub struct Tree<B: Backend> {
    nodes: SlotMap<NodeId, ReconNode>,
    render: RenderTree,
    backend: B,
    scheduler: Scheduler,
    options: TreeOptions,
    root: Option<NodeId>,
    report: FlushReport,
}

impl<B: Backend> Tree<B> {
    pub fn new(backend: B) -> Self {
        Self::with_scheduler(backend, Scheduler::default(), TreeOptions::default())
    }

    pub fn with_options(backend: B, options: TreeOptions) -> Self {
        Self::with_scheduler(backend, Scheduler::default(), options)
    }

    /// Tree whose flush requests go to `host`.
    pub fn with_host(backend: B, host: Arc<dyn FlushScheduler>) -> Self {
        Self::with_scheduler(backend, Scheduler::new(host), TreeOptions::default())
    }

    pub fn with_scheduler(backend: B, scheduler: Scheduler, options: TreeOptions) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            render: RenderTree::new(),
            backend,
            scheduler,
            options,
            root: None,
            report: FlushReport::default(),
        }
    }

    /// Diff `element` against the current root.
    ///
    /// Mounting over an existing tree behaves like a parent rebuild at the
    /// root: a matching root is updated in place.
    pub fn mount(&mut self, element: Element) -> Result<FlushReport, FlushError> {
        self.report = FlushReport::default();
        let mut errors = Vec::new();
        self.diff_children(None, vec![element], &mut errors);
        self.finish_pass(errors)
    }

    /// Destroy everything. Pending dirty registrations become stale.
    pub fn unmount(&mut self) -> FlushReport {
        self.report = FlushReport::default();
        if let Some(root) = self.root.take() {
            self.destroy(root);
            self.sync_render(None);
        }
        mem::take(&mut self.report)
    }

    /// Rebuild every node marked dirty since the previous flush.
    ///
    /// The batch is taken atomically; marks made while it runs land in the
    /// next batch. An error that reaches the root without meeting a
    /// boundary leaves its node stale and is returned once the rest of the
    /// batch has run.
    pub fn flush(&mut self) -> Result<FlushReport, FlushError> {
        self.report = FlushReport::default();
        let batch = self.scheduler.take_dirty();
        if batch.is_empty() {
            return Ok(mem::take(&mut self.report));
        }
        log::debug!("flush: {} dirty node(s)", batch.len());
        let mut unhandled = Vec::new();
        for id in batch {
            let Some(node) = self.nodes.get(id) else {
                log::debug!("flush: dropped stale registration {id:?}");
                self.report.stale_dropped += 1;
                continue;
            };
            if !node.cell.is_dirty() {
                self.report.deduplicated += 1;
                continue;
            }
            let mut errors = Vec::new();
            self.rebuild(id, &mut errors);
            if !errors.is_empty() {
                self.route_errors(id, errors, &mut unhandled);
            }
        }
        self.finish_pass(unhandled)
    }

    pub fn needs_flush(&self) -> bool {
        self.scheduler.has_dirty()
    }

    /// Enqueue `id` without touching its state.
    pub fn mark_dirty(&self, id: NodeId) -> Result<(), MutationError> {
        let node = self
            .nodes
            .get(id)
            .ok_or(MutationError::StaleNode { node: id })?;
        node.cell.mark_dirty();
        Ok(())
    }

    /// Forget every pending registration without rebuilding.
    pub fn reset_dirty(&mut self) {
        for id in self.scheduler.dirty_nodes() {
            if let Some(node) = self.nodes.get(id) {
                node.cell.clear_dirty();
            }
        }
        self.scheduler.reset();
    }

    /// Apply mutations queued through [`RemoteHandle`](crate::RemoteHandle)s.
    /// Returns how many were applied; the rest targeted destroyed nodes.
    pub fn drain_remote_mutations(&mut self) -> usize {
        let mut applied = 0;
        while let Some(mutation) = self.scheduler.try_recv_remote() {
            let Some(node) = self.nodes.get(mutation.node) else {
                log::debug!("remote mutation for destroyed node {:?} dropped", mutation.node);
                continue;
            };
            match node.cell.apply(mutation.expected, mutation.apply) {
                Ok(()) => applied += 1,
                Err(error) => log::debug!("remote mutation rejected: {error}"),
            }
        }
        applied
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|node| node.cell.is_dirty())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind_of(&self, id: NodeId) -> Option<Kind> {
        self.nodes.get(id).map(|node| node.kind)
    }

    pub fn key_of(&self, id: NodeId) -> Option<Key> {
        self.nodes.get(id).and_then(|node| node.key)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id) {
            Some(node) => node.children.as_slice(),
            None => &[],
        }
    }

    pub fn depth_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(id).map(|node| node.depth)
    }

    /// The render node owned by a host node.
    pub fn render_node_of(&self, id: NodeId) -> Option<RenderId> {
        self.nodes.get(id).and_then(|node| node.render)
    }

    /// Back-reference from a render node to the reconciliation node that
    /// owns it.
    pub fn owner_of(&self, render: RenderId) -> Option<NodeId> {
        let owner = self.render.get(render)?.owner();
        self.is_live(owner).then_some(owner)
    }

    /// Whether a boundary is currently showing its fallback.
    pub fn is_showing_fallback(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id).map(|node| &node.body),
            Some(NodeBody::Boundary { failed: true, .. })
        )
    }

    /// A mutation handle for a composite node whose state is `S`.
    pub fn state_handle<S: 'static>(&self, id: NodeId) -> Option<StateHandle<S>> {
        let node = self.nodes.get(id)?;
        node.cell.read::<S, _>(|_| ()).ok()?;
        Some(StateHandle::new(&node.cell))
    }

    /// Live nodes of `kind` in pre-order.
    pub fn find_all(&self, kind: Kind) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.kind_of(*id) == Some(kind))
            .collect()
    }

    pub fn find_component<C: Component>(&self) -> Vec<NodeId> {
        self.find_all(Kind::Component(ComponentType::of::<C>()))
    }

    /// Reconciliation nodes in pre-order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn render_tree(&self) -> &RenderTree {
        &self.render
    }

    /// Mutable access for layout passes that write geometry.
    pub fn render_tree_mut(&mut self) -> &mut RenderTree {
        &mut self.render
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        match self.root {
            Some(root) => self.dump_node(&mut output, root, 0),
            None => output.push_str("(empty)\n"),
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        let Some(node) = self.nodes.get(id) else {
            let _ = writeln!(output, "{indent}{id:?} (missing)");
            return;
        };
        let _ = write!(output, "{indent}{}", node.kind);
        if let Some(key) = node.key {
            let _ = write!(output, " key={key}");
        }
        if let Some(render) = node.render.and_then(|render| self.render.get(render)) {
            let _ = write!(output, " {}", render.props());
        }
        if let NodeBody::Boundary { failed: true, .. } = node.body {
            let _ = write!(output, " [fallback]");
        }
        if node.cell.is_dirty() {
            let _ = write!(output, " [dirty]");
        }
        output.push('\n');
        for child in &node.children {
            self.dump_node(output, *child, depth + 1);
        }
    }

    fn finish_pass(&mut self, unhandled: Vec<ProducerError>) -> Result<FlushReport, FlushError> {
        let report = mem::take(&mut self.report);
        if unhandled.is_empty() {
            return Ok(report);
        }
        for error in &unhandled {
            log::warn!("unhandled producer error: {error}");
        }
        Err(FlushError {
            errors: unhandled,
            report,
        })
    }

    fn rebuild(&mut self, id: NodeId, errors: &mut Vec<ProducerError>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let cell = node.cell.clone();
        cell.clear_dirty();
        let NodeBody::Component(component) = &node.body else {
            return;
        };
        let component = component.clone();
        match produce(&component, &cell) {
            Ok(child) => {
                self.report.rebuilt += 1;
                self.diff_children(Some(id), vec![child], errors);
            }
            Err(error) => errors.push(error),
        }
    }

    fn nearest_boundary(&self, origin: NodeId) -> Option<NodeId> {
        let mut current = self.nodes.get(origin)?.parent;
        while let Some(id) = current {
            let node = self.nodes.get(id)?;
            if matches!(node.body, NodeBody::Boundary { .. }) {
                return Some(id);
            }
            current = node.parent;
        }
        None
    }

    /// Hand errors raised below `origin` to the nearest boundary above it.
    fn route_errors(
        &mut self,
        origin: NodeId,
        errors: Vec<ProducerError>,
        unhandled: &mut Vec<ProducerError>,
    ) {
        let (Some(boundary), Some(first)) = (self.nearest_boundary(origin), errors.first()) else {
            unhandled.extend(errors);
            return;
        };
        self.report.caught += errors.len();
        let mut escaped = Vec::new();
        self.show_fallback(boundary, first, &mut escaped);
        if !escaped.is_empty() {
            self.route_errors(boundary, escaped, unhandled);
        }
    }

    fn show_fallback(&mut self, boundary: NodeId, error: &ProducerError, errors: &mut Vec<ProducerError>) {
        let Some(node) = self.nodes.get_mut(boundary) else {
            return;
        };
        let NodeBody::Boundary { fallback, failed } = &mut node.body else {
            return;
        };
        *failed = true;
        let fallback = fallback.clone();
        log::warn!("boundary {boundary:?} caught: {error}");
        let content = fallback(error);
        self.diff_children(Some(boundary), vec![content], errors);
    }

    fn matches(&self, id: NodeId, element: &Element) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|node| node.kind == element.kind() && node.key == element.key())
    }

    /// Pair `next` with the current children of `parent` (the root slot when
    /// `None`), then update, create and destroy to match.
    fn diff_children(
        &mut self,
        parent: Option<NodeId>,
        next: Vec<Element>,
        errors: &mut Vec<ProducerError>,
    ) {
        let (old, depth): (SmallVec<[NodeId; 4]>, usize) = match parent {
            Some(id) => match self.nodes.get(id) {
                Some(node) => (node.children.clone(), node.depth + 1),
                None => return,
            },
            None => (self.root.into_iter().collect(), 0),
        };

        let keyed = next.iter().any(|element| element.key().is_some())
            || old.iter().any(|id| self.key_of(*id).is_some());
        let mut by_key: HashMap<Key, NodeId> = HashMap::default();
        if keyed {
            for id in &old {
                if let Some(key) = self.key_of(*id) {
                    by_key.entry(key).or_insert(*id);
                }
            }
        }

        let mut seen: HashSet<Key> = HashSet::default();
        let mut kept: HashSet<NodeId> = HashSet::default();
        let mut result: SmallVec<[NodeId; 4]> = SmallVec::with_capacity(next.len());
        for (index, element) in next.into_iter().enumerate() {
            let candidate = match element.key() {
                Some(key) => {
                    if !seen.insert(key) && self.options.warn_on_duplicate_keys {
                        log::warn!(
                            "duplicate key {key} under {parent:?}; later occurrences are created fresh"
                        );
                    }
                    by_key.remove(&key)
                }
                // Positional pairing only ever reuses an unkeyed old child.
                None => old
                    .get(index)
                    .copied()
                    .filter(|id| self.key_of(*id).is_none()),
            };
            match candidate {
                Some(existing) if self.matches(existing, &element) => {
                    kept.insert(existing);
                    self.update(existing, element, errors);
                    result.push(existing);
                }
                Some(existing) => match self.create(element, parent, depth) {
                    Ok(created) => {
                        log::trace!("replaced {existing:?} with {created:?}");
                        result.push(created);
                    }
                    Err(error) => {
                        kept.insert(existing);
                        result.push(existing);
                        errors.push(error);
                    }
                },
                None => match self.create(element, parent, depth) {
                    Ok(created) => result.push(created),
                    Err(error) => errors.push(error),
                },
            }
        }

        for id in old {
            if !kept.contains(&id) {
                self.destroy(id);
            }
        }
        match parent {
            Some(id) => {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.children = result;
                }
            }
            None => self.root = result.first().copied(),
        }
        self.sync_render(parent);
    }

    /// Update a matched node from its new description. Host properties are
    /// applied before any descendant is visited.
    fn update(&mut self, id: NodeId, element: Element, errors: &mut Vec<ProducerError>) {
        self.report.reused += 1;
        match element.into_body() {
            ElementBody::Host {
                props, children, ..
            } => {
                if let Some(render) = self.nodes.get(id).and_then(|node| node.render) {
                    self.render.update(render, &props);
                }
                self.diff_children(Some(id), children, errors);
            }
            ElementBody::Fragment { children } => self.diff_children(Some(id), children, errors),
            ElementBody::Component(component) => {
                let Some(cell) = self.nodes.get(id).map(|node| node.cell.clone()) else {
                    return;
                };
                // `on_update` changes to state stand even if the producer fails;
                // the parameters roll back with the rest of the description.
                cell.with_state_mut(|state| component.on_update(state));
                cell.clear_dirty();
                match produce(&component, &cell) {
                    Ok(child) => {
                        self.report.rebuilt += 1;
                        if let Some(node) = self.nodes.get_mut(id) {
                            node.body = NodeBody::Component(component);
                        }
                        self.diff_children(Some(id), vec![child], errors);
                    }
                    Err(error) => errors.push(error),
                }
            }
            ElementBody::Boundary { child, fallback } => {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.body = NodeBody::Boundary {
                        fallback: fallback.clone(),
                        failed: false,
                    };
                }
                let mut caught = Vec::new();
                self.diff_children(Some(id), vec![*child], &mut caught);
                if let Some(first) = caught.first() {
                    self.report.caught += caught.len();
                    self.show_fallback(id, first, errors);
                }
            }
        }
    }

    /// Build a fresh subtree. Either the whole subtree is built or nothing
    /// of it remains.
    fn create(
        &mut self,
        element: Element,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Result<NodeId, ProducerError> {
        let kind = element.kind();
        let key = element.key();
        let body = element.into_body();
        let (node_body, state) = match &body {
            ElementBody::Host { .. } => (NodeBody::Host, None),
            ElementBody::Component(component) => (
                NodeBody::Component(component.clone()),
                Some(component.init_state()),
            ),
            ElementBody::Boundary { fallback, .. } => (
                NodeBody::Boundary {
                    fallback: fallback.clone(),
                    failed: false,
                },
                None,
            ),
            ElementBody::Fragment { .. } => (NodeBody::Fragment, None),
        };
        let scheduler = self.scheduler.handle();
        let id = self.nodes.insert_with_key(|id| ReconNode {
            kind,
            key,
            body: node_body,
            parent,
            children: SmallVec::new(),
            render: None,
            cell: NodeCell::new(id, scheduler, state),
            depth,
        });
        self.report.created += 1;
        log::trace!("created {kind} {id:?}");

        let built = if depth > self.options.max_depth {
            Err(ProducerError::new(
                id,
                kind.name(),
                anyhow::anyhow!("tree depth exceeds {}", self.options.max_depth),
            ))
        } else {
            self.build(id, body, depth)
        };
        match built {
            Ok(()) => Ok(id),
            Err(error) => {
                self.destroy(id);
                Err(error)
            }
        }
    }

    fn build(&mut self, id: NodeId, body: ElementBody, depth: usize) -> Result<(), ProducerError> {
        match body {
            ElementBody::Host {
                tag,
                props,
                children,
            } => {
                let render = self.render.insert(&mut self.backend, tag, props, id);
                if let Some(node) = self.nodes.get_mut(id) {
                    node.render = Some(render);
                }
                for child in children {
                    self.build_child(id, child, depth)?;
                }
                self.sync_render(Some(id));
            }
            ElementBody::Fragment { children } => {
                for child in children {
                    self.build_child(id, child, depth)?;
                }
            }
            ElementBody::Component(component) => {
                let Some(cell) = self.nodes.get(id).map(|node| node.cell.clone()) else {
                    return Ok(());
                };
                let child = produce(&component, &cell)?;
                self.report.rebuilt += 1;
                self.build_child(id, child, depth)?;
            }
            ElementBody::Boundary { child, fallback } => {
                if let Err(error) = self.build_child(id, *child, depth) {
                    self.report.caught += 1;
                    log::warn!("boundary {id:?} caught: {error}");
                    if let Some(NodeBody::Boundary { failed, .. }) =
                        self.nodes.get_mut(id).map(|node| &mut node.body)
                    {
                        *failed = true;
                    }
                    self.build_child(id, fallback(&error), depth)?;
                }
            }
        }
        Ok(())
    }

    fn build_child(&mut self, parent: NodeId, element: Element, depth: usize) -> Result<(), ProducerError> {
        let child = self.create(element, Some(parent), depth + 1)?;
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
        Ok(())
    }

    /// Destroy `id` and its subtree in pre-order. The caller unlinks `id`
    /// from its parent.
    fn destroy(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(current) else {
                continue;
            };
            if let Some(render) = node.render {
                self.render.remove_subtree(&mut self.backend, render);
            }
            let state = node.cell.destroy();
            self.report.destroyed += 1;
            log::trace!("destroyed {} {current:?}", node.kind);
            stack.extend(node.children.iter().rev().copied());
            // State drops last so its destructor sees the node as dead.
            drop(state);
        }
    }

    /// Nearest host at or above `from`, with its render node.
    fn render_container(&self, from: Option<NodeId>) -> (Option<NodeId>, Option<RenderId>) {
        let mut current = from;
        while let Some(id) = current {
            let Some(node) = self.nodes.get(id) else {
                break;
            };
            if let Some(render) = node.render {
                return (Some(id), Some(render));
            }
            current = node.parent;
        }
        (None, None)
    }

    fn collect_hosts(&self, ids: &[NodeId], out: &mut SmallVec<[RenderId; 8]>) {
        for id in ids {
            let Some(node) = self.nodes.get(*id) else {
                continue;
            };
            match node.render {
                Some(render) => out.push(render),
                None => self.collect_hosts(&node.children, out),
            }
        }
    }

    /// Bring the render children of the host container around `from` in
    /// line with the reconciliation tree.
    fn sync_render(&mut self, from: Option<NodeId>) {
        let (container, render_parent) = self.render_container(from);
        let mut desired: SmallVec<[RenderId; 8]> = SmallVec::new();
        match container {
            Some(id) => {
                if let Some(node) = self.nodes.get(id) {
                    self.collect_hosts(&node.children, &mut desired);
                }
            }
            None => {
                if let Some(root) = self.root {
                    self.collect_hosts(&[root], &mut desired);
                }
            }
        }
        self.render
            .sync_children(&mut self.backend, render_parent, &desired);
    }
}

impl<B: Backend> fmt::Debug for Tree<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("render", &self.render)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

fn produce(component: &Rc<dyn AnyComponent>, cell: &Rc<NodeCell>) -> Result<Element, ProducerError> {
    let _producing = cell.begin_produce();
    component
        .render(cell)
        .map_err(|source| ProducerError::new(cell.id(), component.component_type().name(), source))
}
