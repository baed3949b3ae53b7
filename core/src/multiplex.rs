//! # Multiplexer
//!
//! Flattens a tagged subset of the state into one `tag -> value` map and
//! hands that map to a single subscriber whenever any tagged slice changes.
//!
//! ```text
//! target: { foo: "fooTag", bar: { baz: "bazTag" } }
//! state:  { foo: 4, bar: { baz: 6 } }       => { fooTag: 4, bazTag: 6 }
//! state:  { bar: { baz: 6 } }               => { bazTag: 6 }
//! ```

use crate::BoxFuture;
use crate::error::{StoreError, ValidationError};
use crate::path::KeyPath;
use crate::tree::Tree;
use crate::value::{StateMap, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Nested mapping from state keys to tag names.
pub type TagTree = Tree<String>;

/// The flattened view handed to a [`TagSubscriber`]. Absent slices have no entry.
pub type TagMap = BTreeMap<String, Value>;

type TagFn = dyn Fn(TagMap) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

#[derive(Clone)]
pub struct TagSubscriber {
    run: Arc<TagFn>,
}

impl TagSubscriber {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TagMap) + Send + Sync + 'static,
    {
        Self::try_new(move |tags| {
            f(tags);
            Ok(())
        })
    }

    pub fn try_new<F>(f: F) -> Self
    where
        F: Fn(TagMap) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(move |tags: TagMap| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(std::future::ready(f(tags)))
            }),
        }
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TagMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |tags: TagMap| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(f(tags))
            }),
        }
    }

    pub fn notify(&self, tags: TagMap) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.run)(tags)
    }
}

impl fmt::Debug for TagSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TagSubscriber")
    }
}

enum TraceNode {
    Tag(String),
    Nested(Tracer),
}

/// Walks the state along the target tree, folding changed leaves into a tag map.
struct Tracer {
    path: KeyPath,
    children: BTreeMap<String, TraceNode>,
    memo: Mutex<StateMap>,
}

impl Tracer {
    fn compile(
        tree: &TagTree,
        path: KeyPath,
        seen: &mut HashSet<String>,
    ) -> Result<Self, ValidationError> {
        let Tree::Branch(branch) = tree else {
            return Err(ValidationError::InvalidTarget { path });
        };

        let mut children = BTreeMap::new();
        for (key, child) in branch {
            let child_path = path.child(key);
            let node = match child {
                Tree::Leaf(tag) => {
                    if !seen.insert(tag.clone()) {
                        return Err(ValidationError::DuplicateTag {
                            tag: tag.clone(),
                            path: child_path,
                        });
                    }
                    TraceNode::Tag(tag.clone())
                }
                Tree::Branch(_) => TraceNode::Nested(Tracer::compile(child, child_path, seen)?),
            };
            children.insert(key.clone(), node);
        }

        Ok(Self {
            path,
            children,
            memo: Mutex::new(StateMap::new()),
        })
    }

    /// Fold changed slices of `state` into `tags`. Returns whether anything changed.
    fn trace(&self, tags: &mut TagMap, state: Option<&Value>) -> Result<bool, StoreError> {
        let empty = StateMap::new();
        let current = match state {
            None => &empty,
            Some(value) => value.as_map().ok_or_else(|| StoreError::Shape {
                path: self.path.clone(),
                found: value.kind(),
            })?,
        };

        let mut changed = false;
        for (key, node) in &self.children {
            let slice = current.get(key);
            {
                let mut memo = self.memo.lock();
                if Value::same(memo.get(key), slice) {
                    continue;
                }
                match slice {
                    Some(value) => memo.insert(key.clone(), value.clone()),
                    None => memo.remove(key),
                };
            }

            match node {
                TraceNode::Tag(tag) => {
                    match slice {
                        Some(value) => tags.insert(tag.clone(), value.clone()),
                        None => tags.remove(tag),
                    };
                    changed = true;
                }
                TraceNode::Nested(nested) => {
                    changed |= nested.trace(tags, slice)?;
                }
            }
        }

        Ok(changed)
    }
}

/// A subscriber that observes a tag target and reports a flattened [`TagMap`].
pub struct Multiplexer {
    tracer: Tracer,
    tags: Mutex<TagMap>,
    subscriber: TagSubscriber,
}

impl Multiplexer {
    /// Validate `target` and build the multiplexer. Tags must be unique across
    /// the whole target.
    pub fn new(target: &TagTree, subscriber: TagSubscriber) -> Result<Self, StoreError> {
        let mut seen = HashSet::new();
        let tracer = Tracer::compile(target, KeyPath::new(), &mut seen)?;
        Ok(Self {
            tracer,
            tags: Mutex::new(TagMap::new()),
            subscriber,
        })
    }

    /// Current flattened view.
    pub fn tags(&self) -> TagMap {
        self.tags.lock().clone()
    }

    /// Trace `state` and, if any tagged slice changed, invoke the subscriber
    /// with the updated map.
    pub fn notify(&self, state: Option<Value>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let next = {
                let mut tags = self.tags.lock();
                let mut next = tags.clone();
                if !self.tracer.trace(&mut next, state.as_ref())? {
                    return Ok(());
                }
                *tags = next.clone();
                next
            };

            self.subscriber
                .notify(next)
                .await
                .map_err(|source| StoreError::Subscriber {
                    path: self.tracer.path.clone(),
                    source,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording() -> (TagSubscriber, Arc<Mutex<Vec<serde_json::Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscriber = TagSubscriber::new(move |tags: TagMap| {
            let flat: serde_json::Map<_, _> =
                tags.into_iter().map(|(k, v)| (k, v.to_json())).collect();
            sink.lock().push(serde_json::Value::Object(flat));
        });
        (subscriber, seen)
    }

    fn target(json: serde_json::Value) -> TagTree {
        TagTree::try_from(json).unwrap()
    }

    #[tokio::test]
    async fn test_flattens_changed_tags() {
        let (subscriber, seen) = recording();
        let mux = Multiplexer::new(
            &target(json!({ "foo": "fooTag", "bar": { "bar": { "bar": "barTag" } } })),
            subscriber,
        )
        .unwrap();

        mux.notify(Some(Value::from_json(json!({ "foo": 4 })))).await.unwrap();
        mux.notify(Some(Value::from_json(json!({ "foo": 4, "bar": { "bar": { "bar": 6 } } }))))
            .await
            .unwrap();
        mux.notify(Some(Value::from_json(json!({ "bar": { "bar": { "bar": 6 } } }))))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                json!({ "fooTag": 4 }),
                json!({ "fooTag": 4, "barTag": 6 }),
                json!({ "barTag": 6 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_silent_when_nothing_changed() {
        let (subscriber, seen) = recording();
        let mux = Multiplexer::new(&target(json!({ "foo": "fooTag", "bar": "barTag" })), subscriber)
            .unwrap();

        for _ in 0..3 {
            mux.notify(Some(Value::from_json(json!({ "foo": 4, "bar": 5 }))))
                .await
                .unwrap();
        }

        assert_eq!(*seen.lock(), vec![json!({ "fooTag": 4, "barTag": 5 })]);
        assert_eq!(mux.tags().len(), 2);
    }

    #[tokio::test]
    async fn test_untagged_changes_are_ignored() {
        let (subscriber, seen) = recording();
        let mux = Multiplexer::new(&target(json!({ "foo": "fooTag" })), subscriber).unwrap();

        let foo = Value::from(1);
        mux.notify(Some(Value::map([("foo", foo.clone()), ("other", Value::from(1))])))
            .await
            .unwrap();
        mux.notify(Some(Value::map([("foo", foo), ("other", Value::from(2))])))
            .await
            .unwrap();

        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_duplicate_tag_fails_at_construction() {
        let (subscriber, _) = recording();
        let err = Multiplexer::new(
            &target(json!({ "foo": "fooTag", "bar": { "foo": "fooTag" } })),
            subscriber,
        )
        .err()
        .unwrap();

        assert!(err.to_string().contains("Duplicate tag"));
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::DuplicateTag { ref tag, .. }) if tag == "fooTag"
        ));
    }

    #[test]
    fn test_leaf_target_is_rejected() {
        let (subscriber, _) = recording();
        let err = Multiplexer::new(&Tree::leaf("fooTag".to_string()), subscriber)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Expected target"));
    }

    #[tokio::test]
    async fn test_state_shape_mismatch() {
        let (subscriber, seen) = recording();
        let mux = Multiplexer::new(&target(json!({ "foo": { "bar": "fooTag" } })), subscriber)
            .unwrap();

        let err = mux
            .notify(Some(Value::from_json(json!({ "foo": 233 }))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("state foo"));
        assert!(err.to_string().contains("type \"number\""));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_failure_propagates() {
        let mux = Multiplexer::new(
            &target(json!({ "foo": "fooTag" })),
            TagSubscriber::try_new(|_| Err(anyhow::anyhow!("boom"))),
        )
        .unwrap();

        let err = mux
            .notify(Some(Value::from_json(json!({ "foo": 1 }))))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Subscriber { .. }));
    }
}
