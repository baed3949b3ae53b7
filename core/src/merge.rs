//! # Merge: Identity-Aware Tree Union and Subtraction
//!
//! Feature modules contribute *fragments* to one live tree. `merge` grafts a
//! fragment into the tree, failing when two fragments would both put a leaf on
//! the same path. `subtract` removes exactly what one fragment grafted and
//! nothing else, even if another fragment with the same shape is mounted.
//!
//! Identity is carried by a [`MountId`] stamped on every fragment at
//! construction: a grafted subtree remembers which mount it came from, and
//! subtraction drops only subtrees stamped with the departing id.

use crate::error::StoreError;
use crate::path::KeyPath;
use crate::tree::{Branch, Tree};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of a single mount call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountId(Uuid);

impl MountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One module's contribution to a live tree, stamped with a fresh [`MountId`].
#[derive(Debug, Clone)]
pub struct Fragment<L> {
    id: MountId,
    children: Branch<L>,
}

impl<L> Fragment<L> {
    /// A fragment contributing `children` at the top level.
    pub fn new(children: Branch<L>) -> Self {
        Self {
            id: MountId::new(),
            children,
        }
    }

    /// A fragment contributing `tree` under a single key.
    pub fn rooted(key: impl Into<String>, tree: Tree<L>) -> Self {
        let mut children = Branch::new();
        children.insert(key.into(), tree);
        Self::new(children)
    }

    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn children(&self) -> &Branch<L> {
        &self.children
    }
}

#[derive(Debug, Clone)]
enum Slot<L> {
    /// A subtree taken whole from one fragment.
    Grafted { owner: MountId, tree: Tree<L> },
    /// A branch assembled from more than one fragment.
    Merged(BTreeMap<String, Slot<L>>),
}

impl<L: Clone> Slot<L> {
    /// Children of this slot as slots, or `None` for a leaf.
    fn children(&self) -> Option<BTreeMap<String, Slot<L>>> {
        match self {
            Slot::Merged(children) => Some(children.clone()),
            Slot::Grafted {
                owner,
                tree: Tree::Branch(children),
            } => Some(
                children
                    .iter()
                    .map(|(key, tree)| {
                        let slot = Slot::Grafted {
                            owner: *owner,
                            tree: tree.clone(),
                        };
                        (key.clone(), slot)
                    })
                    .collect(),
            ),
            Slot::Grafted {
                tree: Tree::Leaf(_),
                ..
            } => None,
        }
    }

    fn resolve(&self) -> Tree<L> {
        match self {
            Slot::Grafted { tree, .. } => tree.clone(),
            Slot::Merged(children) => Tree::Branch(
                children
                    .iter()
                    .map(|(key, slot)| (key.clone(), slot.resolve()))
                    .collect(),
            ),
        }
    }
}

/// The live, merged tree. Every operation returns a new tree; the receiver is
/// never mutated.
#[derive(Debug, Clone)]
pub struct MountTree<L> {
    children: BTreeMap<String, Slot<L>>,
}

impl<L> Default for MountTree<L> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
        }
    }
}

impl<L: Clone> MountTree<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Union of this tree and `fragment`.
    ///
    /// Keys only in `fragment` are grafted unchanged; keys on both sides are
    /// merged recursively. A leaf on either side of a shared key is a conflict.
    pub fn merge(&self, fragment: &Fragment<L>) -> Result<Self, StoreError> {
        let children = merge_slots(
            &self.children,
            fragment.id,
            &fragment.children,
            &KeyPath::new(),
        )?;
        Ok(Self { children })
    }

    /// This tree minus everything `fragment` grafted into it.
    ///
    /// Branches left empty are pruned. Subtracting a fragment that is no
    /// longer (or never was) mounted returns an identical tree.
    pub fn subtract(&self, fragment: &Fragment<L>) -> Self {
        Self {
            children: subtract_slots(&self.children, fragment.id, &fragment.children),
        }
    }

    /// The plain tree with mount bookkeeping stripped.
    pub fn resolve(&self) -> Tree<L> {
        Tree::Branch(
            self.children
                .iter()
                .map(|(key, slot)| (key.clone(), slot.resolve()))
                .collect(),
        )
    }
}

fn merge_slots<L: Clone>(
    x: &BTreeMap<String, Slot<L>>,
    owner: MountId,
    y: &Branch<L>,
    path: &KeyPath,
) -> Result<BTreeMap<String, Slot<L>>, StoreError> {
    let mut node = x.clone();

    for (key, incoming) in y {
        let child_path = path.child(key);
        let merged = match x.get(key) {
            None => Slot::Grafted {
                owner,
                tree: incoming.clone(),
            },
            Some(existing) => {
                let conflict = || StoreError::Conflict {
                    path: child_path.clone(),
                };
                let Tree::Branch(incoming) = incoming else {
                    return Err(conflict());
                };
                let existing = existing.children().ok_or_else(conflict)?;
                Slot::Merged(merge_slots(&existing, owner, incoming, &child_path)?)
            }
        };
        node.insert(key.clone(), merged);
    }

    Ok(node)
}

fn subtract_slots<L: Clone>(
    x: &BTreeMap<String, Slot<L>>,
    owner: MountId,
    y: &Branch<L>,
) -> BTreeMap<String, Slot<L>> {
    let mut node = BTreeMap::new();

    for (key, slot) in x {
        match (slot, y.get(key)) {
            (Slot::Grafted { owner: grafted_by, .. }, Some(_)) if *grafted_by == owner => {}
            (Slot::Merged(children), Some(Tree::Branch(departing))) => {
                let rest = subtract_slots(children, owner, departing);
                if !rest.is_empty() {
                    node.insert(key.clone(), Slot::Merged(rest));
                }
            }
            _ => {
                node.insert(key.clone(), slot.clone());
            }
        }
    }

    node
}

#[cfg(test)]
mod tests {
    use super::*;

    type T = Tree<&'static str>;

    fn fragment(tree: T) -> Fragment<&'static str> {
        match tree {
            Tree::Branch(children) => Fragment::new(children),
            Tree::Leaf(_) => Fragment::rooted("root", tree),
        }
    }

    fn paths(tree: &MountTree<&'static str>) -> Vec<String> {
        tree.resolve()
            .leaf_paths()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_merge_disjoint_is_order_independent() {
        let a = fragment(T::branch([
            ("one", T::branch([("two", "r2")])),
            ("four", T::leaf("r4")),
        ]));
        let b = fragment(T::branch([
            ("one", T::branch([("five", "r5")])),
            ("seven", T::leaf("r7")),
        ]));

        let ab = MountTree::new().merge(&a).unwrap().merge(&b).unwrap();
        let ba = MountTree::new().merge(&b).unwrap().merge(&a).unwrap();

        assert_eq!(ab.resolve(), ba.resolve());
        assert_eq!(paths(&ab), vec!["four", "one.five", "one.two", "seven"]);
    }

    #[test]
    fn test_merge_does_not_mutate_receiver() {
        let base = MountTree::new()
            .merge(&fragment(T::branch([("a", "ra")])))
            .unwrap();
        let _ = base.merge(&fragment(T::branch([("b", "rb")]))).unwrap();
        assert_eq!(paths(&base), vec!["a"]);
    }

    #[test]
    fn test_merge_conflict_names_path() {
        let base = MountTree::new()
            .merge(&fragment(T::branch([("root", T::branch([("foo", "f")]))])))
            .unwrap();

        let err = base.merge(&fragment(T::branch([("root", "whole")]))).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(err.path().map(ToString::to_string), Some("root".into()));

        let err = base
            .merge(&fragment(T::branch([(
                "root",
                T::branch([("bar", T::leaf("b")), ("foo", T::branch([("baz", "z")]))]),
            )])))
            .unwrap_err();
        assert_eq!(err.path().map(ToString::to_string), Some("root.foo".into()));
        assert!(err.to_string().contains("Conflict"));

        assert!(base
            .merge(&fragment(T::branch([("root", T::branch([("bar", "b")]))])))
            .is_ok());
    }

    #[test]
    fn test_mount_then_unmount_restores_tree() {
        let base = MountTree::new()
            .merge(&fragment(T::branch([("a", T::branch([("x", "rx")]))])))
            .unwrap();
        let extra = fragment(T::branch([("a", T::branch([("y", "ry")])), ("b", T::leaf("rb"))]));

        let mounted = base.merge(&extra).unwrap();
        assert_eq!(paths(&mounted), vec!["a.x", "a.y", "b"]);

        let restored = mounted.subtract(&extra);
        assert_eq!(restored.resolve(), base.resolve());

        let again = restored.subtract(&extra);
        assert_eq!(again.resolve(), base.resolve());
    }

    #[test]
    fn test_subtract_keeps_sibling_contribution() {
        let first = fragment(T::branch([("a", T::branch([("b", "r1")]))]));
        let second = fragment(T::branch([("a", T::branch([("c", "r2")]))]));

        let tree = MountTree::new().merge(&first).unwrap().merge(&second).unwrap();
        let tree = tree.subtract(&first);

        assert_eq!(paths(&tree), vec!["a.c"]);
    }

    #[test]
    fn test_subtract_is_identity_scoped() {
        let shared: T = T::branch([("foo", T::branch([("bar", "r")]))]);
        let base = MountTree::new()
            .merge(&fragment(T::branch([("foo", T::branch([("baz", "z")]))])))
            .unwrap();

        let first = fragment(shared.clone());
        let tree = base.merge(&first).unwrap().subtract(&first);

        let second = fragment(shared);
        let tree = tree.merge(&second).unwrap();
        // A stale handle for the first mount must not remove the second.
        let tree = tree.subtract(&first);
        assert_eq!(paths(&tree), vec!["foo.bar", "foo.baz"]);

        let tree = tree.subtract(&second);
        assert_eq!(paths(&tree), vec!["foo.baz"]);
    }

    #[test]
    fn test_subtract_everything_leaves_empty_tree() {
        let only = fragment(T::branch([("a", T::branch([("b", T::branch([("c", "r")]))]))]));
        let tree = MountTree::new().merge(&only).unwrap().subtract(&only);
        assert!(tree.is_empty());
    }
}
