//! # Subscriber Combinator
//!
//! Compiles a nested [`SubscriberTree`] into one notifier. Each compiled
//! branch remembers the last slice it saw under every key and only invokes a
//! child when that slice is no longer the same node.

use crate::BoxFuture;
use crate::error::{StoreError, ValidationError};
use crate::path::KeyPath;
use crate::tree::Tree;
use crate::value::{StateMap, Value};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type NotifyResult = anyhow::Result<()>;

type NotifyFn = dyn Fn(Option<Value>) -> BoxFuture<'static, NotifyResult> + Send + Sync;

/// A leaf subscriber, handed its slice of the state (`None` once it disappears).
#[derive(Clone)]
pub struct Subscriber {
    run: Arc<NotifyFn>,
}

impl Subscriber {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        Self::try_new(move |state| {
            f(state);
            Ok(())
        })
    }

    pub fn try_new<F>(f: F) -> Self
    where
        F: Fn(Option<Value>) -> NotifyResult + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(move |state: Option<Value>| -> BoxFuture<'static, NotifyResult> {
                Box::pin(std::future::ready(f(state)))
            }),
        }
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NotifyResult> + Send + 'static,
    {
        Self {
            run: Arc::new(move |state: Option<Value>| -> BoxFuture<'static, NotifyResult> {
                Box::pin(f(state))
            }),
        }
    }

    pub fn notify(&self, state: Option<Value>) -> BoxFuture<'static, NotifyResult> {
        (self.run)(state)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscriber")
    }
}

pub type SubscriberTree = Tree<Subscriber>;

enum SubscriberNode {
    Leaf(Subscriber),
    Nested(CombinedSubscriber),
}

/// The compiled form of a [`SubscriberTree`] branch, with its change memo.
pub struct CombinedSubscriber {
    path: KeyPath,
    children: BTreeMap<String, SubscriberNode>,
    /// Last slice seen per key. A missing entry means "absent".
    memo: Mutex<StateMap>,
}

/// Compile `tree` into a single notifier. The top of `tree` must be a branch.
pub fn combine_subscribers(tree: &SubscriberTree) -> Result<CombinedSubscriber, StoreError> {
    CombinedSubscriber::compile(tree, KeyPath::new())
}

impl CombinedSubscriber {
    fn compile(tree: &SubscriberTree, path: KeyPath) -> Result<Self, StoreError> {
        let Tree::Branch(branch) = tree else {
            return Err(ValidationError::NotABranch { path }.into());
        };
        if branch.is_empty() {
            return Err(ValidationError::EmptyTree { path }.into());
        }

        let mut children = BTreeMap::new();
        for (key, child) in branch {
            let node = match child {
                Tree::Leaf(subscriber) => SubscriberNode::Leaf(subscriber.clone()),
                Tree::Branch(_) => {
                    SubscriberNode::Nested(CombinedSubscriber::compile(child, path.child(key))?)
                }
            };
            children.insert(key.clone(), node);
        }

        Ok(Self {
            path,
            children,
            memo: Mutex::new(StateMap::new()),
        })
    }

    /// Notify every child whose slice changed since the previous call.
    ///
    /// Invoked children run concurrently and are all awaited; the first
    /// failure (in key order) is reported once every child has settled.
    pub fn notify(&self, state: Option<Value>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let empty = StateMap::new();
            let current = match &state {
                None => &empty,
                Some(value) => value.as_map().ok_or_else(|| StoreError::Shape {
                    path: self.path.clone(),
                    found: value.kind(),
                })?,
            };

            let due: Vec<(&String, &SubscriberNode, Option<Value>)> = {
                let mut memo = self.memo.lock();
                self.children
                    .iter()
                    .filter_map(|(key, node)| {
                        let slice = current.get(key).cloned();
                        if Value::same(memo.get(key), slice.as_ref()) {
                            return None;
                        }
                        match &slice {
                            Some(value) => memo.insert(key.clone(), value.clone()),
                            None => memo.remove(key),
                        };
                        Some((key, node, slice))
                    })
                    .collect()
            };

            let outcomes = join_all(due.into_iter().map(|(key, node, slice)| async move {
                match node {
                    SubscriberNode::Leaf(subscriber) => {
                        subscriber
                            .notify(slice)
                            .await
                            .map_err(|source| StoreError::Subscriber {
                                path: self.path.child(key),
                                source,
                            })
                    }
                    SubscriberNode::Nested(nested) => nested.notify(slice).await,
                }
            }))
            .await;

            outcomes.into_iter().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls and keeps the last slice.
    #[derive(Clone, Default)]
    struct Spy {
        calls: Arc<AtomicUsize>,
        last: Arc<Mutex<Option<Value>>>,
    }

    impl Spy {
        fn subscriber(&self) -> Subscriber {
            let spy = self.clone();
            Subscriber::new(move |state| {
                spy.calls.fetch_add(1, Ordering::SeqCst);
                *spy.last.lock() = state;
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_json(&self) -> Option<serde_json::Value> {
            self.last.lock().as_ref().map(Value::to_json)
        }
    }

    #[tokio::test]
    async fn test_notifies_each_key_with_its_slice() {
        let (foo, bar) = (Spy::default(), Spy::default());
        let combined = combine_subscribers(&Tree::branch([
            ("foo", foo.subscriber()),
            ("bar", bar.subscriber()),
        ]))
        .unwrap();

        let state = Value::from_json(json!({ "foo": 1, "bar": { "x": 2 } }));
        combined.notify(Some(state)).await.unwrap();

        assert_eq!(foo.last_json(), Some(json!(1)));
        assert_eq!(bar.last_json(), Some(json!({ "x": 2 })));
    }

    #[tokio::test]
    async fn test_skips_unchanged_slices() {
        let (foo, bar) = (Spy::default(), Spy::default());
        let combined = combine_subscribers(&Tree::branch([
            ("foo", foo.subscriber()),
            ("bar", bar.subscriber()),
        ]))
        .unwrap();

        let bar_slice = Value::from_json(json!({ "x": 1 }));
        let first = Value::map([("foo", Value::from(1)), ("bar", bar_slice.clone())]);
        combined.notify(Some(first.clone())).await.unwrap();
        combined.notify(Some(first)).await.unwrap();
        assert_eq!((foo.calls(), bar.calls()), (1, 1));

        let second = Value::map([("foo", Value::from(2)), ("bar", bar_slice)]);
        combined.notify(Some(second)).await.unwrap();
        assert_eq!((foo.calls(), bar.calls()), (2, 1));
    }

    #[tokio::test]
    async fn test_disappearing_slice_is_reported_once() {
        let foo = Spy::default();
        let combined = combine_subscribers(&Tree::branch([("foo", foo.subscriber())])).unwrap();

        combined.notify(Some(Value::map([("foo", Value::from(1))]))).await.unwrap();
        combined.notify(Some(Value::empty_map())).await.unwrap();
        assert_eq!(foo.calls(), 2);
        assert_eq!(foo.last_json(), None);

        combined.notify(None).await.unwrap();
        assert_eq!(foo.calls(), 2);

        combined.notify(Some(Value::map([("foo", Value::from(1))]))).await.unwrap();
        assert_eq!(foo.calls(), 3);
    }

    #[tokio::test]
    async fn test_recursive_combination_memoizes_per_level() {
        let (x, y) = (Spy::default(), Spy::default());
        let combined = combine_subscribers(&Tree::branch([(
            "bar",
            Tree::branch([("x", x.subscriber()), ("y", y.subscriber())]),
        )]))
        .unwrap();

        let y_slice = Value::from_json(json!([0]));
        let s1 = Value::map([("bar", Value::map([("x", Value::from(1)), ("y", y_slice.clone())]))]);
        combined.notify(Some(s1)).await.unwrap();
        let s2 = Value::map([("bar", Value::map([("x", Value::from(2)), ("y", y_slice)]))]);
        combined.notify(Some(s2)).await.unwrap();

        assert_eq!(x.calls(), 2);
        assert_eq!(y.calls(), 1);
    }

    #[tokio::test]
    async fn test_async_children_all_settle_before_failure_is_reported() {
        let slow = Spy::default();
        let slow_spy = slow.clone();
        let slow_sub = Subscriber::from_async(move |state| {
            let spy = slow_spy.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                spy.calls.fetch_add(1, Ordering::SeqCst);
                *spy.last.lock() = state;
                Ok(())
            }
        });
        let failing = Subscriber::try_new(|_| Err(anyhow::anyhow!("listener exploded")));

        let combined =
            combine_subscribers(&Tree::branch([("a", failing), ("b", slow_sub)])).unwrap();
        let err = combined
            .notify(Some(Value::map([("a", Value::from(1)), ("b", Value::from(2))])))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Subscriber { .. }));
        assert_eq!(err.path().map(ToString::to_string), Some("a".into()));
        assert_eq!(slow.calls(), 1);
    }

    #[test]
    fn test_rejects_empty_trees() {
        assert!(combine_subscribers(&Tree::empty()).is_err());
        let nested = Tree::branch([("foo", Tree::<Subscriber>::empty())]);
        let err = combine_subscribers(&nested).err().unwrap();
        assert_eq!(err.path().map(ToString::to_string), Some("foo".into()));
    }

    #[tokio::test]
    async fn test_state_shape_mismatch() {
        let spy = Spy::default();
        let combined = combine_subscribers(&Tree::branch([(
            "foo",
            Tree::branch([("bar", spy.subscriber())]),
        )]))
        .unwrap();

        let err = combined
            .notify(Some(Value::from_json(json!({ "foo": "nope" }))))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Shape { found: "string", .. }));
    }
}
