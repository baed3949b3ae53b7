//! # Tree: Nested Key-to-(Leaf | Subtree) Mappings
//!
//! Reducer trees, subscriber trees and multiplexer tag targets all share this
//! shape. A node is either a `Leaf` carrying a handler (or tag), or a `Branch`
//! mapping keys to further nodes; traversals match on both cases exhaustively.

use crate::error::ValidationError;
use crate::path::KeyPath;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Children of a branch, ordered by key.
pub type Branch<L> = BTreeMap<String, Tree<L>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Tree<L> {
    Leaf(L),
    Branch(Branch<L>),
}

impl<L> Tree<L> {
    pub fn leaf(leaf: L) -> Self {
        Tree::Leaf(leaf)
    }

    /// Build a branch from `(key, child)` pairs. Later duplicates replace earlier ones.
    pub fn branch<K, T, I>(entries: I) -> Self
    where
        K: Into<String>,
        T: Into<Tree<L>>,
        I: IntoIterator<Item = (K, T)>,
    {
        Tree::Branch(
            entries
                .into_iter()
                .map(|(k, child)| (k.into(), child.into()))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Tree::Branch(Branch::new())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Tree::Leaf(_))
    }

    pub fn as_branch(&self) -> Option<&Branch<L>> {
        match self {
            Tree::Branch(children) => Some(children),
            Tree::Leaf(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Tree<L>> {
        self.as_branch().and_then(|children| children.get(key))
    }

    /// Paths of every leaf, depth first in key order.
    pub fn leaf_paths(&self) -> Vec<KeyPath> {
        let mut out = Vec::new();
        collect_leaf_paths(self, &KeyPath::new(), &mut out);
        out
    }

    /// Wrap this tree one level down under `key`.
    pub fn nest(self, key: impl Into<String>) -> Self {
        let mut children = Branch::new();
        children.insert(key.into(), self);
        Tree::Branch(children)
    }
}

fn collect_leaf_paths<L>(tree: &Tree<L>, path: &KeyPath, out: &mut Vec<KeyPath>) {
    match tree {
        Tree::Leaf(_) => out.push(path.clone()),
        Tree::Branch(children) => {
            for (key, child) in children {
                collect_leaf_paths(child, &path.child(key), out);
            }
        }
    }
}

impl<L> From<L> for Tree<L> {
    fn from(leaf: L) -> Self {
        Tree::Leaf(leaf)
    }
}

impl From<&str> for Tree<String> {
    fn from(tag: &str) -> Self {
        Tree::Leaf(tag.to_string())
    }
}

/// Parse a tag target from JSON: strings are tags, objects are branches,
/// anything else is rejected with its path.
impl TryFrom<Json> for Tree<String> {
    type Error = ValidationError;

    fn try_from(json: Json) -> Result<Self, Self::Error> {
        match json {
            Json::Object(_) => parse_tags(json, &KeyPath::new()),
            _ => Err(ValidationError::InvalidTarget {
                path: KeyPath::new(),
            }),
        }
    }
}

fn parse_tags(json: Json, path: &KeyPath) -> Result<Tree<String>, ValidationError> {
    match json {
        Json::String(tag) => Ok(Tree::Leaf(tag)),
        Json::Object(object) => {
            let mut children = Branch::new();
            for (key, child) in object {
                let child_path = path.child(&key);
                children.insert(key, parse_tags(child, &child_path)?);
            }
            Ok(Tree::Branch(children))
        }
        _ => Err(ValidationError::InvalidTarget { path: path.clone() }),
    }
}
