// LogWeave - app/tree.rs
//
// The hierarchy of views the user navigates: the root is the merge of every
// opened file, children are views derived from their parent (filters of
// filters, merges of siblings).
//
// Nodes live in an arena addressed by `NodeId`; ids are never reused. Each
// node also holds a small navigation index for direct jumps. Those indices
// are reused: a new node takes the lowest free one, and an index returns to
// the pool when the guard holding it is dropped with its node.

use crate::app::view::ViewId;
use crate::util::error::ViewError;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

/// Arena address of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn get(self) -> usize {
        self.0
    }
}

// =============================================================================
// Navigation index pool
// =============================================================================

#[derive(Debug, Default)]
struct NavPool {
    free: BTreeSet<usize>,
    next: usize,
}

impl NavPool {
    fn acquire(&mut self) -> usize {
        match self.free.pop_first() {
            Some(n) => n,
            None => {
                self.next += 1;
                self.next - 1
            }
        }
    }
}

/// An allocated navigation index; released when dropped.
#[derive(Debug)]
pub struct NavIndex {
    value: usize,
    pool: Rc<RefCell<NavPool>>,
}

impl NavIndex {
    pub fn value(&self) -> usize {
        self.value
    }
}

impl Drop for NavIndex {
    fn drop(&mut self) {
        self.pool.borrow_mut().free.insert(self.value);
    }
}

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug)]
struct Node {
    view: ViewId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    nav: NavIndex,
}

#[derive(Debug)]
pub struct ViewTree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    root_view: ViewId,
    focus: NodeId,
    by_nav: HashMap<usize, NodeId>,
    pool: Rc<RefCell<NavPool>>,
}

impl ViewTree {
    /// A tree holding only the root node, which has focus.
    pub fn new(root_view: ViewId) -> Self {
        let pool = Rc::new(RefCell::new(NavPool::default()));
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            root_view,
            focus: NodeId(0),
            by_nav: HashMap::new(),
            pool,
        };
        tree.insert(root_view, None);
        tree
    }

    fn insert(&mut self, view: ViewId, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let nav = NavIndex {
            value: self.pool.borrow_mut().acquire(),
            pool: Rc::clone(&self.pool),
        };
        self.by_nav.insert(nav.value, id);
        self.nodes.push(Some(Node {
            view,
            parent,
            children: Vec::new(),
            nav,
        }));
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, ViewError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ViewError::UnknownNode { id: id.0 })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn focus(&self) -> NodeId {
        self.focus
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn view(&self, id: NodeId) -> Result<ViewId, ViewError> {
        self.node(id).map(|n| n.view)
    }

    pub fn focused_view(&self) -> ViewId {
        self.view(self.focus).unwrap_or(self.root_view)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn nav_index(&self, id: NodeId) -> Option<usize> {
        self.node(id).ok().map(|n| n.nav.value())
    }

    pub fn node_for_view(&self, view: ViewId) -> Option<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .find_map(|(i, n)| n.as_ref().filter(|n| n.view == view).map(|_| NodeId(i)))
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach `view` under `parent` and focus it.
    pub fn add_child(&mut self, parent: NodeId, view: ViewId) -> Result<NodeId, ViewError> {
        self.node(parent)?;
        let id = self.insert(view, Some(parent));
        if let Some(Some(p)) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        self.focus = id;
        tracing::debug!(node = id.0, parent = parent.0, %view, "Tree: node added");
        Ok(id)
    }

    /// Detach `id` and its subtree.
    ///
    /// Returns the subtree's views, descendants before ancestors, for the
    /// caller to destroy. If focus was inside the subtree it moves to the
    /// next sibling, else the previous sibling, else the parent.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<ViewId>, ViewError> {
        if id == self.root {
            return Err(ViewError::RootRemoval);
        }
        let parent = self
            .node(id)?
            .parent
            .ok_or(ViewError::UnknownNode { id: id.0 })?;

        let siblings = self.children(parent).to_vec();
        let pos = siblings.iter().position(|&s| s == id).unwrap_or(0);
        let mut subtree = Vec::new();
        self.collect_post_order(id, &mut subtree);

        if subtree.contains(&self.focus) {
            self.focus = siblings
                .get(pos + 1)
                .or_else(|| pos.checked_sub(1).and_then(|p| siblings.get(p)))
                .copied()
                .unwrap_or(parent);
        }

        if let Some(Some(p)) = self.nodes.get_mut(parent.0) {
            p.children.retain(|&c| c != id);
        }

        let mut views = Vec::with_capacity(subtree.len());
        for node_id in subtree {
            if let Some(node) = self.nodes.get_mut(node_id.0).and_then(Option::take) {
                self.by_nav.remove(&node.nav.value());
                views.push(node.view);
                // `node.nav` drops here and frees its index.
            }
        }
        tracing::debug!(node = id.0, removed = views.len(), "Tree: subtree removed");
        Ok(views)
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.children(id) {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    /// Nodes in pre-order with their depth.
    fn pre_order(&self) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            for &child in self.children(id).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    // --- Focus movement. Each returns whether focus changed. ------------

    pub fn move_focus_to(&mut self, nav: usize) -> bool {
        match self.by_nav.get(&nav) {
            Some(&id) if id != self.focus => {
                self.focus = id;
                true
            }
            _ => false,
        }
    }

    pub fn move_focus_parent(&mut self) -> bool {
        match self.parent(self.focus) {
            Some(p) => {
                self.focus = p;
                true
            }
            None => false,
        }
    }

    pub fn move_focus_first_child(&mut self) -> bool {
        match self.children(self.focus).first() {
            Some(&c) => {
                self.focus = c;
                true
            }
            None => false,
        }
    }

    /// Next node at the same depth, crossing into the next subtree when the
    /// current parent has no further children.
    pub fn move_focus_next(&mut self) -> bool {
        let order = self.pre_order();
        let Some(pos) = order.iter().position(|(id, _)| *id == self.focus) else {
            return false;
        };
        let depth = order[pos].1;
        match order[pos + 1..].iter().find(|(_, d)| *d == depth) {
            Some(&(id, _)) => {
                self.focus = id;
                true
            }
            None => false,
        }
    }

    /// Previous node at the same depth; mirror of `move_focus_next`.
    pub fn move_focus_prev(&mut self) -> bool {
        let order = self.pre_order();
        let Some(pos) = order.iter().position(|(id, _)| *id == self.focus) else {
            return false;
        };
        let depth = order[pos].1;
        match order[..pos].iter().rev().find(|(_, d)| *d == depth) {
            Some(&(id, _)) => {
                self.focus = id;
                true
            }
            None => false,
        }
    }
}
