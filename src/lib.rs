//! # redblack-rs
//!
//! An ordered map built on a red-black tree that rebalances **top-down**:
//! both insertion and deletion repair the tree in a single descending pass,
//! so no recursion and no stack of visited parents is ever needed — the only
//! auxiliary state is two node references.
//!
//! Follows the leaf-valued red-black trees of Brass, *Advanced Data
//! Structures* (2008): interior nodes hold routing keys only, every entry
//! lives in a leaf, and the tree is always a full binary tree (every node
//! has zero or two children). Nodes are carved out of a slot arena with a
//! free list, so steady-state mutation causes no per-node heap traffic.
//!
//! ## Example
//!
//! ```rust
//! use redblack_rs::RbTree;
//!
//! let mut tree: RbTree<u32, &str> = RbTree::new();
//! assert!(tree.insert(1, "one"));
//! assert!(tree.insert(2, "two"));
//! assert!(!tree.insert(1, "uno")); // duplicate keys are refused
//!
//! assert_eq!(tree.get(&1), Some(&"one"));
//! assert_eq!(tree.remove(&2), Some("two"));
//! assert_eq!(tree.get(&2), None);
//! ```

#![forbid(unsafe_code)]

use core::cmp::Ordering;
use core::fmt;

// =============================================================================
// Configuration
// =============================================================================

/// Informational bound on tree height. A red-black tree stays under
/// `2 * log2(n + 1)`, far below this for any `u32`-indexable node count;
/// descent loops debug-assert against it.
const MAX_HEIGHT: usize = 128;

// =============================================================================
// Node model
// =============================================================================

/// Index of a node slot in the arena.
///
/// Handles are indices rather than pointers: a handle held across a release
/// can at worst observe a recycled slot (caught by debug assertions), never
/// dangle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct NodeRef(u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

#[derive(Clone)]
enum NodeKind<V> {
    /// Routing node. `key` separates the subtrees and equals the minimum
    /// key under `right`.
    Internal { left: NodeRef, right: NodeRef },
    /// Every stored value lives in a leaf.
    Leaf { value: V },
}

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    color: Color,
    kind: NodeKind<V>,
}

impl<K, V> Node<K, V> {
    #[inline]
    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    fn into_value(self) -> V {
        match self.kind {
            NodeKind::Leaf { value } => value,
            NodeKind::Internal { .. } => unreachable!("interior node holds no value"),
        }
    }
}

// =============================================================================
// Node arena
// =============================================================================

/// Fixed-size-slot arena with a LIFO free list.
///
/// Nodes are acquired only when a leaf splits and released only when a leaf
/// and its structural partner are spliced out, so the arena is the sole
/// source of allocation traffic for the whole tree. Backing storage never
/// shrinks on release; teardown is the bulk `Drop` of the vectors.
#[derive(Clone)]
struct NodeArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    /// Released slot indices, most recently freed on top.
    free: Vec<u32>,
}

impl<K, V> NodeArena<K, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of live (acquired and not yet released) nodes.
    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Hand out a slot holding `node`, recycling released slots first.
    ///
    /// Growth is fallible: when the host allocator refuses to extend the
    /// backing storage the node is handed back so the caller can roll back,
    /// with the arena untouched.
    fn acquire(&mut self, node: Node<K, V>) -> Result<NodeRef, Node<K, V>> {
        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx as usize].is_none());
            self.slots[idx as usize] = Some(node);
            return Ok(NodeRef(idx));
        }
        if self.slots.len() >= u32::MAX as usize {
            return Err(node);
        }
        if self.slots.try_reserve(1).is_err() {
            return Err(node);
        }
        // `release` must never allocate, so keep the free stack's capacity
        // ahead of the slot count while we are the ones allowed to fail.
        let needed = self.slots.len() + 1;
        if self.free.capacity() < needed && self.free.try_reserve(needed - self.free.len()).is_err()
        {
            return Err(node);
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Some(node));
        Ok(NodeRef(idx))
    }

    /// Move a node out and put its slot on the free list.
    fn release(&mut self, node: NodeRef) -> Node<K, V> {
        match self.slots[node.0 as usize].take() {
            Some(n) => {
                self.free.push(node.0);
                n
            }
            None => unreachable!("release of a vacant arena slot"),
        }
    }

    #[inline]
    fn node(&self, r: NodeRef) -> &Node<K, V> {
        match &self.slots[r.0 as usize] {
            Some(n) => n,
            None => unreachable!("read through a stale node handle"),
        }
    }

    #[inline]
    fn node_mut(&mut self, r: NodeRef) -> &mut Node<K, V> {
        match &mut self.slots[r.0 as usize] {
            Some(n) => n,
            None => unreachable!("write through a stale node handle"),
        }
    }

    /// Swap the keys of two distinct slots. Rotations keep every slot in
    /// place and move contents instead of re-parenting, so this is the only
    /// way key material travels between slots.
    fn swap_keys(&mut self, a: NodeRef, b: NodeRef) {
        debug_assert_ne!(a, b);
        let (lo, hi) = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        let (head, tail) = self.slots.split_at_mut(hi as usize);
        match (&mut head[lo as usize], &mut tail[0]) {
            (Some(x), Some(y)) => core::mem::swap(&mut x.key, &mut y.key),
            _ => unreachable!("key swap on a vacant arena slot"),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why an insertion was refused. The tree is untouched in either case.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InsertError {
    /// The key is already present; inserts never overwrite.
    DuplicateKey,
    /// The node arena could not grow. Recoverable: the tree is still valid
    /// and fully balanced, and later insertions may succeed.
    ArenaExhausted,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::DuplicateKey => f.write_str("key already present"),
            InsertError::ArenaExhausted => f.write_str("node arena exhausted"),
        }
    }
}

impl std::error::Error for InsertError {}

// =============================================================================
// Tree handle
// =============================================================================

/// Ordered map over a top-down red-black tree.
///
/// Interior nodes carry routing keys only (the separator equals the minimum
/// key of its right subtree); values live exclusively in leaves. Both
/// mutating operations run a single root-to-leaf pass that repairs every
/// potential violation *before* descending past it, tracking nothing but
/// the current node and one rebalancing pivot above it.
///
/// `K: Clone` because separator keys in interior nodes are copies minted
/// when a leaf splits.
#[derive(Clone)]
pub struct RbTree<K, V> {
    arena: NodeArena<K, V>,
    root: Option<NodeRef>,
    len: usize,
}

/// Where `current` sits beneath the rebalancing pivot `upper` when a
/// deletion fixup or the final splice fires: a direct child, or a grandchild
/// through `upper`'s child, on either side. The descent never lets the
/// pivot trail further behind than this.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DescentShape {
    LeftChild,
    LeftLeft,
    LeftRight,
    RightChild,
    RightRight,
    RightLeft,
}

impl<K, V> RbTree<K, V> {
    /// An empty tree. Allocates nothing until the first insertion.
    pub fn new() -> Self {
        Self {
            arena: NodeArena::new(),
            root: None,
            len: 0,
        }
    }

    /// Number of stored entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K: Ord + Clone, V> RbTree<K, V> {
    // =========================================================================
    // Node helpers
    // =========================================================================

    #[inline]
    fn color(&self, r: NodeRef) -> Color {
        self.arena.node(r).color
    }

    #[inline]
    fn set_color(&mut self, r: NodeRef, color: Color) {
        self.arena.node_mut(r).color = color;
    }

    #[inline]
    fn is_leaf(&self, r: NodeRef) -> bool {
        self.arena.node(r).is_leaf()
    }

    #[inline]
    fn key(&self, r: NodeRef) -> &K {
        &self.arena.node(r).key
    }

    #[inline]
    fn left(&self, r: NodeRef) -> NodeRef {
        match self.arena.node(r).kind {
            NodeKind::Internal { left, .. } => left,
            NodeKind::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    #[inline]
    fn right(&self, r: NodeRef) -> NodeRef {
        match self.arena.node(r).kind {
            NodeKind::Internal { right, .. } => right,
            NodeKind::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    #[inline]
    fn set_left(&mut self, r: NodeRef, child: NodeRef) {
        match &mut self.arena.node_mut(r).kind {
            NodeKind::Internal { left, .. } => *left = child,
            NodeKind::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    #[inline]
    fn set_right(&mut self, r: NodeRef, child: NodeRef) {
        match &mut self.arena.node_mut(r).kind {
            NodeKind::Internal { right, .. } => *right = child,
            NodeKind::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    #[inline]
    fn set_children(&mut self, r: NodeRef, new_left: NodeRef, new_right: NodeRef) {
        match &mut self.arena.node_mut(r).kind {
            NodeKind::Internal { left, right } => {
                *left = new_left;
                *right = new_right;
            }
            NodeKind::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    // =========================================================================
    // Rotations
    // =========================================================================
    //
    // Both rotations keep the slot `n` as the subtree root — its link from
    // the parent is never touched, which is what lets the descending pass
    // work without a parent chain. Child links are relinked and the two
    // slots' keys swapped; colors stay with their slots and are recolored
    // explicitly by callers.

    /// Rotate the subtree at `n` so its left child rises. `n.left` must be
    /// an interior node; rotating toward a leaf is a contract violation.
    fn rotate_right(&mut self, n: NodeRef) {
        let l = self.left(n);
        let (ll, lr) = (self.left(l), self.right(l));
        let nr = self.right(n);
        self.set_children(n, ll, l);
        self.set_children(l, lr, nr);
        self.arena.swap_keys(n, l);
    }

    /// Mirror of [`Self::rotate_right`]: the right child rises.
    fn rotate_left(&mut self, n: NodeRef) {
        let r = self.right(n);
        let (rl, rr) = (self.left(r), self.right(r));
        let nl = self.left(n);
        self.set_children(n, r, rr);
        self.set_children(r, nl, rl);
        self.arena.swap_keys(n, r);
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert a new entry. Returns `false` and leaves the tree untouched if
    /// the key is already present or the arena cannot grow.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.try_insert(key, value).is_ok()
    }

    /// Insert a new entry, reporting *why* a refused insertion failed.
    ///
    /// Runs one descending pass: every black node with two red children is
    /// repaired before the descent moves past it, so by the time the target
    /// leaf is reached it is guaranteed black and can be split into two red
    /// leaves without violating anything above.
    ///
    /// On failure the tree is structurally untouched; a failed insertion
    /// drops `key` and `value`.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<(), InsertError> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let leaf = Node {
                    key,
                    color: Color::Black,
                    kind: NodeKind::Leaf { value },
                };
                match self.arena.acquire(leaf) {
                    Ok(r) => {
                        self.root = Some(r);
                        self.len = 1;
                        return Ok(());
                    }
                    Err(_) => return Err(InsertError::ArenaExhausted),
                }
            }
        };

        let mut current = root;
        let mut upper: Option<NodeRef> = None;
        let mut depth = 0usize;

        while !self.is_leaf(current) {
            depth += 1;
            debug_assert!(depth <= MAX_HEIGHT);

            let (left, right) = (self.left(current), self.right(current));
            let next = if key < *self.key(current) { left } else { right };

            match self.color(current) {
                // A red node cannot root a pending violation: its children
                // are black by invariant.
                Color::Red => current = next,
                Color::Black
                    if self.color(left) == Color::Black
                        || self.color(right) == Color::Black =>
                {
                    upper = Some(current);
                    current = next;
                }
                Color::Black => {
                    // Both children red: resolve now, before descending,
                    // so the split at the bottom lands under a black leaf.
                    match upper {
                        None => {
                            // `current` is the root; recoloring its children
                            // black leaves every black-height unchanged.
                            self.set_color(left, Color::Black);
                            self.set_color(right, Color::Black);
                        }
                        Some(u) => self.fix_double_red(u, current),
                    }
                    current = next;
                    upper = Some(current);
                }
            }
        }

        // The descent always lands on a black leaf.
        debug_assert_eq!(self.color(current), Color::Black);
        let new_goes_right = match key.cmp(self.key(current)) {
            Ordering::Equal => return Err(InsertError::DuplicateKey),
            Ordering::Less => false,
            Ordering::Greater => true,
        };

        // Split the leaf: both entries move into fresh red leaves and the
        // old slot becomes the separator above them.
        let new_leaf = Node {
            key,
            color: Color::Red,
            kind: NodeKind::Leaf { value },
        };
        let new_leaf = match self.arena.acquire(new_leaf) {
            Ok(r) => r,
            Err(_) => return Err(InsertError::ArenaExhausted),
        };

        let old_key = self.key(current).clone();
        let old_kind = core::mem::replace(
            &mut self.arena.node_mut(current).kind,
            NodeKind::Internal {
                left: new_leaf,
                right: new_leaf,
            },
        );
        let old_leaf = Node {
            key: old_key,
            color: Color::Red,
            kind: old_kind,
        };
        let old_leaf = match self.arena.acquire(old_leaf) {
            Ok(r) => r,
            Err(node) => {
                // Second acquisition failed: restore the old entry in place
                // and roll the first one back.
                self.arena.node_mut(current).kind = node.kind;
                self.arena.release(new_leaf);
                return Err(InsertError::ArenaExhausted);
            }
        };

        if new_goes_right {
            // Separator must equal the minimum key of the right subtree,
            // which is now the freshly inserted key.
            let separator = self.key(new_leaf).clone();
            self.arena.node_mut(current).key = separator;
            self.set_children(current, old_leaf, new_leaf);
        } else {
            self.set_children(current, new_leaf, old_leaf);
        }

        self.len += 1;
        debug_assert_eq!(self.arena.live(), 2 * self.len - 1);
        Ok(())
    }

    /// `current` is black with two red children, at most two levels below
    /// `upper`. Recolor (direct child) or rotate once (zig-zig) or twice
    /// (zig-zag) so the pending red-red pair is resolved before the descent
    /// continues past it.
    fn fix_double_red(&mut self, upper: NodeRef, current: NodeRef) {
        let (cl, cr) = (self.left(current), self.right(current));
        if *self.key(current) < *self.key(upper) {
            let ul = self.left(upper);
            if current == ul {
                self.set_color(cl, Color::Black);
                self.set_color(cr, Color::Black);
                self.set_color(current, Color::Red);
            } else if current == self.left(ul) {
                self.rotate_right(upper);
                let (l, r) = (self.left(upper), self.right(upper));
                self.set_color(l, Color::Red);
                self.set_color(r, Color::Red);
                self.set_color(self.left(l), Color::Black);
                self.set_color(self.right(l), Color::Black);
            } else {
                debug_assert_eq!(current, self.right(ul));
                self.rotate_left(ul);
                self.rotate_right(upper);
                let (l, r) = (self.left(upper), self.right(upper));
                self.set_color(l, Color::Red);
                self.set_color(r, Color::Red);
                self.set_color(self.left(r), Color::Black);
                self.set_color(self.right(l), Color::Black);
            }
        } else {
            let ur = self.right(upper);
            if current == ur {
                self.set_color(cl, Color::Black);
                self.set_color(cr, Color::Black);
                self.set_color(current, Color::Red);
            } else if current == self.right(ur) {
                self.rotate_left(upper);
                let (l, r) = (self.left(upper), self.right(upper));
                self.set_color(l, Color::Red);
                self.set_color(r, Color::Red);
                self.set_color(self.left(r), Color::Black);
                self.set_color(self.right(r), Color::Black);
            } else {
                debug_assert_eq!(current, self.left(ur));
                self.rotate_right(ur);
                self.rotate_left(upper);
                let (l, r) = (self.left(upper), self.right(upper));
                self.set_color(l, Color::Red);
                self.set_color(r, Color::Red);
                self.set_color(self.left(r), Color::Black);
                self.set_color(self.right(l), Color::Black);
            }
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Remove `key`, returning its value.
    ///
    /// Returns `None` when the key is absent; the tree keeps its exact
    /// entry set either way. The pass mirrors insertion: it pushes a red
    /// node down the search path ahead of itself so that the leaf, once
    /// reached, always has a red structural partner to splice out with.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let root = self.root?;

        if self.is_leaf(root) {
            if key != self.key(root) {
                return None;
            }
            self.root = None;
            self.len = 0;
            return Some(self.arena.release(root).into_value());
        }

        let mut upper = root;
        if self.color(self.left(upper)) == Color::Black
            && self.color(self.right(upper)) == Color::Black
        {
            upper = self.prepare_root_for_removal(upper, key);
        }

        let mut current = upper;
        let mut depth = 0usize;
        while !self.is_leaf(current) {
            depth += 1;
            debug_assert!(depth <= MAX_HEIGHT);

            current = if key < self.key(current) {
                self.left(current)
            } else {
                self.right(current)
            };
            if self.color(current) == Color::Red || self.is_leaf(current) {
                continue;
            }
            if self.color(self.left(current)) == Color::Red
                || self.color(self.right(current)) == Color::Red
            {
                // A red child below keeps this level repairable later.
                upper = current;
            } else {
                current = self.fix_double_black(upper, current);
                upper = current;
            }
        }

        if key != self.key(current) {
            return None;
        }

        let value = self.splice_leaf(upper, current);
        self.len -= 1;
        debug_assert_eq!(
            self.arena.live(),
            if self.len == 0 { 0 } else { 2 * self.len - 1 }
        );
        Some(value)
    }

    /// One-time adjustment when both root children are black: recolor or
    /// rotate so the descent toward `key` starts with a red node within
    /// reach. Returns the node to descend from.
    fn prepare_root_for_removal(&mut self, root: NodeRef, key: &K) -> NodeRef {
        let (ul, ur) = (self.left(root), self.right(root));
        if key < self.key(root) {
            if self.is_leaf(ul) {
                if self.is_leaf(ur) {
                    self.set_color(ul, Color::Red);
                    self.set_color(ur, Color::Red);
                } else {
                    self.set_color(self.left(ur), Color::Black);
                    self.set_color(self.right(ur), Color::Black);
                    self.set_color(ur, Color::Red);
                }
                root
            } else if self.color(self.left(ul)) == Color::Red
                || self.color(self.right(ul)) == Color::Red
            {
                ul
            } else if self.color(self.right(ur)) == Color::Red {
                self.rotate_left(root);
                let (l, r) = (self.left(root), self.right(root));
                self.set_color(r, Color::Black);
                self.set_color(l, Color::Black);
                self.set_color(self.left(l), Color::Red);
                l
            } else if self.color(self.left(ur)) == Color::Red {
                self.rotate_right(ur);
                self.rotate_left(root);
                let (l, r) = (self.left(root), self.right(root));
                self.set_color(r, Color::Black);
                self.set_color(l, Color::Black);
                self.set_color(self.left(l), Color::Red);
                l
            } else {
                self.set_color(ul, Color::Red);
                self.set_color(ur, Color::Red);
                root
            }
        } else {
            if self.is_leaf(ur) {
                if self.is_leaf(ul) {
                    self.set_color(ul, Color::Red);
                    self.set_color(ur, Color::Red);
                } else {
                    self.set_color(self.left(ul), Color::Black);
                    self.set_color(self.right(ul), Color::Black);
                    self.set_color(ul, Color::Red);
                }
                root
            } else if self.color(self.left(ur)) == Color::Red
                || self.color(self.right(ur)) == Color::Red
            {
                ur
            } else if self.color(self.left(ul)) == Color::Red {
                self.rotate_right(root);
                let (l, r) = (self.left(root), self.right(root));
                self.set_color(r, Color::Black);
                self.set_color(l, Color::Black);
                self.set_color(self.right(r), Color::Red);
                r
            } else if self.color(self.right(ul)) == Color::Red {
                self.rotate_left(ul);
                self.rotate_right(root);
                let (l, r) = (self.left(root), self.right(root));
                self.set_color(r, Color::Black);
                self.set_color(l, Color::Black);
                self.set_color(self.right(r), Color::Red);
                r
            } else {
                self.set_color(ul, Color::Red);
                self.set_color(ur, Color::Red);
                root
            }
        }
    }

    /// Classify where `current` sits beneath `upper`.
    fn descent_shape(&self, upper: NodeRef, current: NodeRef) -> DescentShape {
        if self.key(current) < self.key(upper) {
            let ul = self.left(upper);
            if current == ul {
                DescentShape::LeftChild
            } else if current == self.left(ul) {
                DescentShape::LeftLeft
            } else {
                debug_assert_eq!(current, self.right(ul));
                DescentShape::LeftRight
            }
        } else {
            let ur = self.right(upper);
            if current == ur {
                DescentShape::RightChild
            } else if current == self.right(ur) {
                DescentShape::RightRight
            } else {
                debug_assert_eq!(current, self.left(ur));
                DescentShape::RightLeft
            }
        }
    }

    /// `current` is black, interior, with two black children — a latent
    /// black-height deficit. Resolve it in place so the path toward
    /// `current` regains a red node, keyed by `current`'s position under
    /// `upper` and the colors of the decisive nephew pair. Returns the node
    /// the descent resumes from (which becomes the new `upper`).
    ///
    /// In the direct-child shapes the sibling is red and the examined pair
    /// is its inner child's children; in the grandchild shapes the parent
    /// is red and the examined pair is the sibling's own children. Every
    /// arm preserves black-height.
    fn fix_double_black(&mut self, upper: NodeRef, current: NodeRef) -> NodeRef {
        match self.descent_shape(upper, current) {
            DescentShape::LeftChild => {
                let inner = self.left(self.right(upper));
                match (self.color(self.left(inner)), self.color(self.right(inner))) {
                    (Color::Black, Color::Black) => {
                        self.rotate_left(upper);
                        let l = self.left(upper);
                        self.set_color(l, Color::Black);
                        self.set_color(self.left(l), Color::Red);
                        self.set_color(self.right(l), Color::Red);
                        l
                    }
                    (Color::Red, _) => {
                        self.rotate_right(inner);
                        let ur = self.right(upper);
                        self.rotate_right(ur);
                        self.rotate_left(upper);
                        let (l, r) = (self.left(upper), self.right(upper));
                        self.set_color(l, Color::Black);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(r, Color::Red);
                        self.set_color(self.left(l), Color::Red);
                        l
                    }
                    (Color::Black, Color::Red) => {
                        let ur = self.right(upper);
                        self.rotate_right(ur);
                        self.rotate_left(upper);
                        let (l, r) = (self.left(upper), self.right(upper));
                        self.set_color(l, Color::Black);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(r, Color::Red);
                        self.set_color(self.left(l), Color::Red);
                        l
                    }
                }
            }
            DescentShape::LeftLeft => {
                let ul = self.left(upper);
                let sib = self.right(ul);
                match (self.color(self.left(sib)), self.color(self.right(sib))) {
                    (Color::Black, Color::Black) => {
                        self.set_color(current, Color::Red);
                        self.set_color(sib, Color::Red);
                        self.set_color(ul, Color::Black);
                        ul
                    }
                    (_, Color::Red) => {
                        self.rotate_left(ul);
                        let l = self.left(upper);
                        self.set_color(self.left(l), Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        let ll = self.left(l);
                        self.set_color(self.left(ll), Color::Red);
                        ll
                    }
                    (Color::Red, Color::Black) => {
                        self.rotate_right(sib);
                        self.rotate_left(ul);
                        let l = self.left(upper);
                        self.set_color(self.left(l), Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        let ll = self.left(l);
                        self.set_color(self.left(ll), Color::Red);
                        ll
                    }
                }
            }
            DescentShape::LeftRight => {
                let ul = self.left(upper);
                let sib = self.left(ul);
                match (self.color(self.left(sib)), self.color(self.right(sib))) {
                    (Color::Black, Color::Black) => {
                        self.set_color(sib, Color::Red);
                        self.set_color(current, Color::Red);
                        self.set_color(ul, Color::Black);
                        ul
                    }
                    (Color::Red, _) => {
                        self.rotate_right(ul);
                        let l = self.left(upper);
                        self.set_color(self.left(l), Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        let lr = self.right(l);
                        self.set_color(self.right(lr), Color::Red);
                        lr
                    }
                    (Color::Black, Color::Red) => {
                        self.rotate_left(sib);
                        self.rotate_right(ul);
                        let l = self.left(upper);
                        self.set_color(self.left(l), Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        let lr = self.right(l);
                        self.set_color(self.right(lr), Color::Red);
                        lr
                    }
                }
            }
            DescentShape::RightChild => {
                let inner = self.right(self.left(upper));
                match (self.color(self.right(inner)), self.color(self.left(inner))) {
                    (Color::Black, Color::Black) => {
                        self.rotate_right(upper);
                        let r = self.right(upper);
                        self.set_color(r, Color::Black);
                        self.set_color(self.right(r), Color::Red);
                        self.set_color(self.left(r), Color::Red);
                        r
                    }
                    (Color::Red, _) => {
                        self.rotate_left(inner);
                        let ul = self.left(upper);
                        self.rotate_left(ul);
                        self.rotate_right(upper);
                        let (l, r) = (self.left(upper), self.right(upper));
                        self.set_color(r, Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        self.set_color(self.right(r), Color::Red);
                        r
                    }
                    (Color::Black, Color::Red) => {
                        let ul = self.left(upper);
                        self.rotate_left(ul);
                        self.rotate_right(upper);
                        let (l, r) = (self.left(upper), self.right(upper));
                        self.set_color(r, Color::Black);
                        self.set_color(self.right(l), Color::Black);
                        self.set_color(l, Color::Red);
                        self.set_color(self.right(r), Color::Red);
                        r
                    }
                }
            }
            DescentShape::RightRight => {
                let ur = self.right(upper);
                let sib = self.left(ur);
                match (self.color(self.right(sib)), self.color(self.left(sib))) {
                    (Color::Black, Color::Black) => {
                        self.set_color(sib, Color::Red);
                        self.set_color(current, Color::Red);
                        self.set_color(ur, Color::Black);
                        ur
                    }
                    (_, Color::Red) => {
                        self.rotate_right(ur);
                        let r = self.right(upper);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(self.right(r), Color::Black);
                        self.set_color(r, Color::Red);
                        let rr = self.right(r);
                        self.set_color(self.right(rr), Color::Red);
                        rr
                    }
                    (Color::Red, Color::Black) => {
                        self.rotate_left(sib);
                        self.rotate_right(ur);
                        let r = self.right(upper);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(self.right(r), Color::Black);
                        self.set_color(r, Color::Red);
                        let rr = self.right(r);
                        self.set_color(self.right(rr), Color::Red);
                        rr
                    }
                }
            }
            DescentShape::RightLeft => {
                let ur = self.right(upper);
                let sib = self.right(ur);
                match (self.color(self.right(sib)), self.color(self.left(sib))) {
                    (Color::Black, Color::Black) => {
                        self.set_color(current, Color::Red);
                        self.set_color(sib, Color::Red);
                        self.set_color(ur, Color::Black);
                        ur
                    }
                    (Color::Red, _) => {
                        self.rotate_left(ur);
                        let r = self.right(upper);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(self.right(r), Color::Black);
                        self.set_color(r, Color::Red);
                        let rl = self.left(r);
                        self.set_color(self.left(rl), Color::Red);
                        rl
                    }
                    (Color::Black, Color::Red) => {
                        self.rotate_right(sib);
                        self.rotate_left(ur);
                        let r = self.right(upper);
                        self.set_color(self.left(r), Color::Black);
                        self.set_color(self.right(r), Color::Black);
                        self.set_color(r, Color::Red);
                        let rl = self.left(r);
                        self.set_color(self.left(rl), Color::Red);
                        rl
                    }
                }
            }
        }
    }

    /// Unlink the matched leaf and its structural partner, release both
    /// slots, and return the leaf's value.
    ///
    /// `upper` is the black node just above the leaf's parent with exactly
    /// one red node below it on the search side: either `upper`'s other
    /// child (then `upper` absorbs it and turns into whatever it was), or
    /// the leaf's own red parent (then the parent's other subtree takes the
    /// parent's place).
    fn splice_leaf(&mut self, upper: NodeRef, current: NodeRef) -> V {
        match self.descent_shape(upper, current) {
            DescentShape::LeftChild => {
                let partner = self.right(upper);
                debug_assert_eq!(self.color(partner), Color::Red);
                let partner = self.arena.release(partner);
                let node = self.arena.node_mut(upper);
                node.key = partner.key;
                node.kind = partner.kind;
                self.arena.release(current).into_value()
            }
            DescentShape::RightChild => {
                let partner = self.left(upper);
                debug_assert_eq!(self.color(partner), Color::Red);
                let partner = self.arena.release(partner);
                let node = self.arena.node_mut(upper);
                node.key = partner.key;
                node.kind = partner.kind;
                self.arena.release(current).into_value()
            }
            DescentShape::LeftLeft => {
                let parent = self.left(upper);
                debug_assert_eq!(self.color(parent), Color::Red);
                let survivor = self.right(parent);
                self.set_left(upper, survivor);
                self.arena.release(parent);
                self.arena.release(current).into_value()
            }
            DescentShape::LeftRight => {
                let parent = self.left(upper);
                debug_assert_eq!(self.color(parent), Color::Red);
                let survivor = self.left(parent);
                self.set_left(upper, survivor);
                self.arena.release(parent);
                self.arena.release(current).into_value()
            }
            DescentShape::RightRight => {
                let parent = self.right(upper);
                debug_assert_eq!(self.color(parent), Color::Red);
                let survivor = self.left(parent);
                self.set_right(upper, survivor);
                self.arena.release(parent);
                self.arena.release(current).into_value()
            }
            DescentShape::RightLeft => {
                let parent = self.right(upper);
                debug_assert_eq!(self.color(parent), Color::Red);
                let survivor = self.right(parent);
                self.set_right(upper, survivor);
                self.arena.release(parent);
                self.arena.release(current).into_value()
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up `key`. Pure routing descent: no mutation, no rebalancing,
    /// O(height). Concurrent lookups may share the tree freely.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut current = self.root?;
        let mut depth = 0usize;
        loop {
            depth += 1;
            debug_assert!(depth <= MAX_HEIGHT + 1);

            let node = self.arena.node(current);
            match &node.kind {
                NodeKind::Internal { left, right } => {
                    current = if key < &node.key { *left } else { *right };
                }
                NodeKind::Leaf { value } => {
                    return if key == &node.key { Some(value) } else { None };
                }
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

impl<K, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for RbTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbTree").field("len", &self.len).finish()
    }
}


#[cfg(test)]
mod proptests;
