//! # Value: Shared State Nodes
//!
//! State is a tree of reference-counted, immutable nodes. Cloning a `Value`
//! is an `Arc` clone, so a reducer that hands back the state it was given
//! hands back the *same* node, and every change check downstream can tell.
//!
//! * **Maps** compare by identity.
//! * **Primitive scalars** (null, bool, number, string) compare by value.
//! * **Arrays** are scalars but compare by identity, like maps.
//!
//! "Absent" is modelled as `Option::<Value>::None`; JSON `null` is a defined value.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Children of a mapping node, ordered by key.
pub type StateMap = BTreeMap<String, Value>;

/// The payload behind a [`Value`].
#[derive(Debug, PartialEq)]
pub enum Node {
    Scalar(Json),
    Map(StateMap),
}

/// A reference-counted state node.
#[derive(Clone)]
pub struct Value {
    inner: Arc<Node>,
}

impl Value {
    /// Wrap a JSON value as a scalar leaf, without converting objects to maps.
    pub fn scalar(value: impl Into<Json>) -> Self {
        Self {
            inner: Arc::new(Node::Scalar(value.into())),
        }
    }

    /// Build a mapping node from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::from_map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_map(map: StateMap) -> Self {
        Self {
            inner: Arc::new(Node::Map(map)),
        }
    }

    pub fn empty_map() -> Self {
        Self::from_map(StateMap::new())
    }

    /// Convert JSON into a state tree. Objects become mapping nodes
    /// (recursively); everything else becomes a scalar.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Object(object) => Self::from_map(
                object
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
            other => Self::scalar(other),
        }
    }

    /// Render the tree back into JSON. Allocates; intended for tests,
    /// logging and hand-off to serializers.
    pub fn to_json(&self) -> Json {
        match self.node() {
            Node::Scalar(json) => json.clone(),
            Node::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn node(&self) -> &Node {
        &self.inner
    }

    pub fn as_map(&self) -> Option<&StateMap> {
        match self.node() {
            Node::Map(map) => Some(map),
            Node::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Json> {
        match self.node() {
            Node::Scalar(json) => Some(json),
            Node::Map(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(Json::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Json::as_str)
    }

    pub fn as_array(&self) -> Option<&Vec<Json>> {
        self.as_scalar().and_then(Json::as_array)
    }

    /// Child of a mapping node. `None` for missing keys and for scalars.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.node(), Node::Map(_))
    }

    /// Human-readable kind, used in shape diagnostics.
    pub fn kind(&self) -> &'static str {
        match self.node() {
            Node::Map(_) => "object",
            Node::Scalar(Json::Null) => "null",
            Node::Scalar(Json::Bool(_)) => "boolean",
            Node::Scalar(Json::Number(_)) => "number",
            Node::Scalar(Json::String(_)) => "string",
            Node::Scalar(Json::Array(_)) => "array",
            Node::Scalar(Json::Object(_)) => "object",
        }
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The change-detection rule shared by every combinator: identity for
    /// containers, value equality for primitives, and absent == absent.
    pub fn same(a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if Value::ptr_eq(a, b) {
                    return true;
                }
                match (a.node(), b.node()) {
                    (Node::Scalar(x), Node::Scalar(y)) => is_primitive(x) && x == y,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Number of live handles to this node.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

fn is_primitive(json: &Json) -> bool {
    !matches!(json, Json::Array(_) | Json::Object(_))
}

/// Structural equality. Use [`Value::same`] or [`Value::ptr_eq`] for change detection.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::ptr_eq(self, other) || self.node() == other.node()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(json)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::scalar(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::scalar(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::scalar(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::scalar(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::scalar(s)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.node() {
            Node::Scalar(json) => json.serialize(serializer),
            Node::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Value::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_converts_objects_to_maps() {
        let v = Value::from_json(json!({ "a": { "b": 1 }, "c": [1, 2] }));
        assert!(v.is_map());
        assert!(v.get("a").is_some_and(Value::is_map));
        assert_eq!(v.get("a").and_then(|a| a.get("b")).and_then(Value::as_i64), Some(1));
        assert_eq!(v.get("c").map(Value::kind), Some("array"));
        assert_eq!(v.to_json(), json!({ "a": { "b": 1 }, "c": [1, 2] }));
    }

    #[test]
    fn test_clone_is_same_node() {
        let v = Value::from_json(json!({ "a": 1 }));
        let w = v.clone();
        assert!(Value::ptr_eq(&v, &w));
        assert!(Value::same(Some(&v), Some(&w)));
        assert_eq!(v.ref_count(), 2);
    }

    #[test]
    fn test_equal_maps_are_not_same() {
        let a = Value::from_json(json!({ "a": 1 }));
        let b = Value::from_json(json!({ "a": 1 }));
        assert_eq!(a, b);
        assert!(!Value::same(Some(&a), Some(&b)));
    }

    #[test]
    fn test_primitives_compare_by_value() {
        assert!(Value::same(Some(&Value::from(3)), Some(&Value::from(3))));
        assert!(Value::same(Some(&Value::from("x")), Some(&Value::from("x"))));
        assert!(!Value::same(Some(&Value::from(3)), Some(&Value::from(4))));
        let a = Value::scalar(json!([1]));
        let b = Value::scalar(json!([1]));
        assert!(!Value::same(Some(&a), Some(&b)));
    }

    #[test]
    fn test_absent_and_null_differ() {
        let null = Value::scalar(Json::Null);
        assert!(Value::same(None, None));
        assert!(!Value::same(None, Some(&null)));
    }

    #[test]
    fn test_serde_round_trip_through_json_text() {
        let v = Value::from_json(json!({ "x": { "y": "z" } }));
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, v);
    }
}
