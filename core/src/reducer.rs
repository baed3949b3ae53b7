//! # Reducer Combinator
//!
//! Compiles a nested [`ReducerTree`] into one asynchronous reducer.
//!
//! * Every leaf runs concurrently with its own slice of the state.
//! * A leaf may be synchronous or asynchronous; both are awaited uniformly.
//! * If nothing changed (same key set, every leaf returned the same node),
//!   the combined reducer returns the *identical* state node it was given, so
//!   ancestors and subscribers can detect "no change" by identity.

use crate::BoxFuture;
use crate::action::Action;
use crate::error::{StoreError, ValidationError};
use crate::path::KeyPath;
use crate::tree::Tree;
use crate::value::{StateMap, Value};
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a single leaf reducer produces. `Ok(None)` is a contract violation.
pub type ReduceResult = anyhow::Result<Option<Value>>;

type ReduceFn = dyn Fn(Option<Value>, Action) -> BoxFuture<'static, ReduceResult> + Send + Sync;

/// A leaf reducer: `(previous slice, action) -> next slice`.
///
/// The previous slice is `None` until the reducer has produced a value, which
/// is where a reducer supplies its default.
#[derive(Clone)]
pub struct Reducer {
    run: Arc<ReduceFn>,
}

impl Reducer {
    /// A synchronous reducer that cannot fail.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<Value>, &Action) -> Option<Value> + Send + Sync + 'static,
    {
        Self::try_new(move |state, action| Ok(f(state, action)))
    }

    /// A synchronous reducer that may fail.
    pub fn try_new<F>(f: F) -> Self
    where
        F: Fn(Option<Value>, &Action) -> ReduceResult + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(
                move |state: Option<Value>, action: Action| -> BoxFuture<'static, ReduceResult> {
                    let result = f(state, &action);
                    Box::pin(std::future::ready(result))
                },
            ),
        }
    }

    /// An asynchronous reducer.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Value>, Action) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReduceResult> + Send + 'static,
    {
        Self {
            run: Arc::new(
                move |state: Option<Value>, action: Action| -> BoxFuture<'static, ReduceResult> {
                    Box::pin(f(state, action))
                },
            ),
        }
    }

    pub fn reduce(&self, state: Option<Value>, action: Action) -> BoxFuture<'static, ReduceResult> {
        (self.run)(state, action)
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reducer")
    }
}

pub type ReducerTree = Tree<Reducer>;

enum ReducerNode {
    Leaf(Reducer),
    Nested(CombinedReducer),
}

/// The compiled form of a [`ReducerTree`] branch.
pub struct CombinedReducer {
    path: KeyPath,
    children: BTreeMap<String, ReducerNode>,
}

/// Compile `tree` into a single reducer. The top of `tree` must be a branch.
pub fn combine_reducers(tree: &ReducerTree) -> Result<CombinedReducer, StoreError> {
    CombinedReducer::compile(tree, KeyPath::new())
}

impl CombinedReducer {
    fn compile(tree: &ReducerTree, path: KeyPath) -> Result<Self, StoreError> {
        let Tree::Branch(branch) = tree else {
            return Err(ValidationError::NotABranch { path }.into());
        };
        if branch.is_empty() {
            return Err(ValidationError::EmptyTree { path }.into());
        }

        let mut children = BTreeMap::new();
        for (key, child) in branch {
            let node = match child {
                Tree::Leaf(reducer) => ReducerNode::Leaf(reducer.clone()),
                Tree::Branch(_) => {
                    ReducerNode::Nested(CombinedReducer::compile(child, path.child(key))?)
                }
            };
            children.insert(key.clone(), node);
        }

        Ok(Self { path, children })
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Finalized keys at this level, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Run every leaf against its slice of `state`.
    ///
    /// `state` must be a mapping or absent (treated as empty). Fails on the
    /// first leaf failure or contract violation; no partial state escapes.
    pub fn reduce(
        &self,
        state: Option<Value>,
        action: Action,
    ) -> BoxFuture<'_, Result<Value, StoreError>> {
        Box::pin(async move {
            let empty = StateMap::new();
            let previous = match &state {
                None => &empty,
                Some(value) => value.as_map().ok_or_else(|| StoreError::Shape {
                    path: self.path.clone(),
                    found: value.kind(),
                })?,
            };

            let key_set_changed = !previous.keys().eq(self.children.keys());

            let slices = self.children.iter().map(|(key, node)| {
                let prior = previous.get(key).cloned();
                let action = action.clone();
                async move {
                    let next = match node {
                        ReducerNode::Leaf(reducer) => reducer
                            .reduce(prior.clone(), action.clone())
                            .await
                            .map_err(|source| StoreError::Reducer {
                                path: self.path.child(key),
                                source,
                            })?,
                        ReducerNode::Nested(nested) => {
                            Some(nested.reduce(prior.clone(), action.clone()).await?)
                        }
                    };
                    let next = next.ok_or_else(|| StoreError::ContractViolation {
                        action_type: action.type_label(),
                        path: self.path.child(key),
                    })?;
                    let changed = !Value::same(prior.as_ref(), Some(&next));
                    Ok::<_, StoreError>((key.clone(), next, changed))
                }
            });

            let results = try_join_all(slices).await?;
            let changed = key_set_changed || results.iter().any(|(_, _, changed)| *changed);

            match state {
                Some(state) if !changed => Ok(state),
                _ => Ok(Value::from_map(
                    results.into_iter().map(|(key, next, _)| (key, next)).collect(),
                )),
            }
        })
    }
}
