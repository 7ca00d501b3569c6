use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::{Color, NodeKind, NodeRef, RbTree};

/// Check every structural invariant of the tree in one pass:
/// - the root is black
/// - no red node has a red child
/// - every root-to-leaf path crosses the same number of black nodes
/// - every interior node has two children and its key equals the minimum
///   key of its right subtree
/// - leaf keys are strictly increasing in symmetric order
/// - the number of reachable leaves equals `len` and the number of
///   reachable nodes equals the arena's live-slot count
fn validate<K: Ord + Clone + std::fmt::Debug, V>(tree: &RbTree<K, V>) {
    let root = match tree.root {
        None => {
            assert_eq!(tree.len, 0);
            assert_eq!(tree.arena.live(), 0);
            return;
        }
        Some(root) => root,
    };
    assert_eq!(tree.arena.node(root).color, Color::Black, "root must be black");

    let mut visited = 0usize;
    let mut leaves = 0usize;
    let mut black_height: Option<usize> = None;
    let mut prev_leaf_key: Option<K> = None;

    // Symmetric-order traversal over (node, blacks crossed above it).
    let mut stack: Vec<(NodeRef, usize)> = vec![(root, 0)];
    while let Some((r, blacks_above)) = stack.pop() {
        visited += 1;
        let node = tree.arena.node(r);
        let blacks = blacks_above + usize::from(node.color == Color::Black);
        match &node.kind {
            NodeKind::Internal { left, right } => {
                if node.color == Color::Red {
                    assert_eq!(
                        tree.arena.node(*left).color,
                        Color::Black,
                        "red node with red left child at key {:?}",
                        node.key
                    );
                    assert_eq!(
                        tree.arena.node(*right).color,
                        Color::Black,
                        "red node with red right child at key {:?}",
                        node.key
                    );
                }
                assert_eq!(
                    &node.key,
                    min_key(tree, *right),
                    "separator is not the minimum of the right subtree"
                );
                // Right pushed first so the left subtree is visited first.
                stack.push((*right, blacks));
                stack.push((*left, blacks));
            }
            NodeKind::Leaf { .. } => {
                leaves += 1;
                match black_height {
                    None => black_height = Some(blacks),
                    Some(h) => assert_eq!(blacks, h, "unequal black counts across paths"),
                }
                if let Some(prev) = &prev_leaf_key {
                    assert!(prev < &node.key, "leaf keys out of order");
                }
                prev_leaf_key = Some(node.key.clone());
            }
        }
    }

    assert_eq!(leaves, tree.len, "reachable leaves disagree with len");
    assert_eq!(visited, 2 * leaves - 1, "tree is not a full binary tree");
    assert_eq!(
        visited,
        tree.arena.live(),
        "arena holds live slots not reachable from the root"
    );
}

fn min_key<K: Ord + Clone, V>(tree: &RbTree<K, V>, mut r: NodeRef) -> &K {
    loop {
        match &tree.arena.node(r).kind {
            NodeKind::Internal { left, .. } => r = *left,
            NodeKind::Leaf { .. } => return &tree.arena.node(r).key,
        }
    }
}

fn leaf_entries<K: Ord + Clone, V: Clone>(tree: &RbTree<K, V>) -> Vec<(K, V)> {
    let mut out = Vec::with_capacity(tree.len);
    let mut stack: Vec<NodeRef> = tree.root.into_iter().collect();
    while let Some(r) = stack.pop() {
        match &tree.arena.node(r).kind {
            NodeKind::Internal { left, right } => {
                stack.push(*right);
                stack.push(*left);
            }
            NodeKind::Leaf { value } => out.push((tree.arena.node(r).key.clone(), value.clone())),
        }
    }
    out
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u16, u32),
    Remove(u16),
    Get(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Narrow key space so ops collide with live keys often.
    prop_oneof![
        4 => (0..256u16, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (0..256u16).prop_map(Op::Remove),
        1 => (0..256u16).prop_map(Op::Get),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn matches_btreemap_with_valid_structure(ops in prop::collection::vec(op_strategy(), 0..=800)) {
        let mut tree: RbTree<u16, u32> = RbTree::new();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    let inserted = tree.insert(k, v);
                    prop_assert_eq!(inserted, !model.contains_key(&k));
                    if inserted {
                        model.insert(k, v);
                    }
                }
                Op::Remove(k) => {
                    prop_assert_eq!(tree.remove(&k), model.remove(&k));
                }
                Op::Get(k) => {
                    prop_assert_eq!(tree.get(&k).copied(), model.get(&k).copied());
                }
            }
            prop_assert_eq!(tree.len(), model.len());
            validate(&tree);
        }

        let entries = leaf_entries(&tree);
        let expected: Vec<(u16, u32)> = model.into_iter().collect();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn inserted_keys_are_retrievable(keys in prop::collection::btree_set(any::<u32>(), 1..200)) {
        let mut tree: RbTree<u32, u32> = RbTree::new();
        for (i, &k) in keys.iter().enumerate() {
            prop_assert!(tree.insert(k, i as u32));
            validate(&tree);
        }
        for (i, &k) in keys.iter().enumerate() {
            prop_assert_eq!(tree.get(&k), Some(&(i as u32)));
        }
    }

    #[test]
    fn removed_keys_are_gone(keys in prop::collection::btree_set(any::<u16>(), 1..200)) {
        let mut tree: RbTree<u16, u16> = RbTree::new();
        for &k in &keys {
            prop_assert!(tree.insert(k, k));
        }
        let mut remaining = keys.len();
        for &k in &keys {
            prop_assert_eq!(tree.remove(&k), Some(k));
            prop_assert_eq!(tree.get(&k), None);
            remaining -= 1;
            prop_assert_eq!(tree.len(), remaining);
            validate(&tree);
        }
        prop_assert!(tree.is_empty());
    }

    #[test]
    fn absent_key_operations_do_not_disturb_entries(
        keys in prop::collection::btree_set(1..1000u32, 1..100),
        probes in prop::collection::vec(1..1000u32, 1..50),
    ) {
        let mut tree: RbTree<u32, u32> = RbTree::new();
        for &k in &keys {
            prop_assert!(tree.insert(k, k * 3));
        }
        let before = leaf_entries(&tree);
        for p in probes {
            if keys.contains(&p) {
                continue;
            }
            prop_assert_eq!(tree.remove(&p), None);
            prop_assert_eq!(tree.get(&p), None);
            // A miss may recolor internally but never changes the entries.
            prop_assert_eq!(leaf_entries(&tree), before.clone());
            validate(&tree);
        }
    }
}

// Exhaustive check over every ordering of a small key set: any insertion
// order yields the same entry set, and from each resulting tree any
// removal order drains cleanly with the structure valid throughout.
#[test]
fn all_permutations_of_small_sets() {
    let keys = [4u32, 1, 5, 3, 2];
    for_each_permutation(&keys, &mut |insert_order| {
        let mut tree: RbTree<u32, u32> = RbTree::new();
        for &k in insert_order {
            assert!(tree.insert(k, k + 100));
            validate(&tree);
        }
        for &k in &keys {
            assert_eq!(tree.get(&k), Some(&(k + 100)));
        }
        for_each_permutation(&keys, &mut |remove_order| {
            let mut t = tree.clone();
            for (i, &k) in remove_order.iter().enumerate() {
                assert_eq!(t.remove(&k), Some(k + 100));
                assert_eq!(t.len(), keys.len() - i - 1);
                validate(&t);
            }
            assert!(t.is_empty());
        });
    });
}

fn for_each_permutation<T: Copy>(items: &[T], f: &mut impl FnMut(&[T])) {
    let mut buf = items.to_vec();
    let n = buf.len();
    permute(&mut buf, n, f);
}

fn permute<T: Copy>(buf: &mut Vec<T>, k: usize, f: &mut impl FnMut(&[T])) {
    if k <= 1 {
        f(buf);
        return;
    }
    for i in 0..k {
        buf.swap(i, k - 1);
        permute(buf, k - 1, f);
        buf.swap(i, k - 1);
    }
}
