use crate::error::ValidationError;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Action type dispatched by `init_state`. Application code must not reuse it.
pub const INIT_ACTION_TYPE: &str = "@@tessera/INIT";

const TYPE_FIELD: &str = "type";

/// A dispatched action: a JSON object that always carries a `type` field.
///
/// Cheap to clone; every leaf reducer receives its own handle.
#[derive(Clone, PartialEq)]
pub struct Action {
    fields: Arc<Map<String, Json>>,
}

impl Action {
    pub fn new(action_type: impl Into<Json>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), action_type.into());
        Self {
            fields: Arc::new(fields),
        }
    }

    /// The reserved initialization action.
    pub fn init() -> Self {
        Self::new(INIT_ACTION_TYPE)
    }

    /// Set a payload field, returning the updated action.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        Arc::make_mut(&mut self.fields).insert(key.into(), value.into());
        self
    }

    pub fn action_type(&self) -> &Json {
        self.fields.get(TYPE_FIELD).unwrap_or(&Json::Null)
    }

    /// True if the `type` field is the string `action_type`.
    pub fn is(&self, action_type: &str) -> bool {
        self.action_type().as_str() == Some(action_type)
    }

    pub fn is_init(&self) -> bool {
        self.is(INIT_ACTION_TYPE)
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.fields.get(key)
    }

    /// The `type` field rendered for diagnostics: strings verbatim, anything else as JSON.
    pub fn type_label(&self) -> String {
        match self.action_type() {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_json(&self) -> Json {
        Json::Object((*self.fields).clone())
    }
}

impl TryFrom<Json> for Action {
    type Error = ValidationError;

    fn try_from(json: Json) -> Result<Self, Self::Error> {
        let fields = match json {
            Json::Object(fields) => fields,
            other => {
                return Err(ValidationError::ActionNotAnObject {
                    found: json_kind(&other),
                });
            }
        };
        if !fields.contains_key(TYPE_FIELD) {
            return Err(ValidationError::MissingActionType);
        }
        Ok(Self {
            fields: Arc::new(fields),
        })
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&*self.fields).finish()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_label())
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_and_payload() {
        let action = Action::new("add").with("amount", 3);
        assert!(action.is("add"));
        assert_eq!(action.get("amount"), Some(&json!(3)));
        assert_eq!(action.to_json(), json!({ "type": "add", "amount": 3 }));
    }

    #[test]
    fn test_rejects_non_objects() {
        for bad in [json!(233), json!("233"), json!([123, "233"])] {
            let err = Action::try_from(bad).unwrap_err();
            assert!(matches!(err, ValidationError::ActionNotAnObject { .. }));
            assert!(err.to_string().contains("plain objects"));
        }
    }

    #[test]
    fn test_requires_type_field() {
        let err = Action::try_from(json!({ "foo": "bar" })).unwrap_err();
        assert_eq!(err, ValidationError::MissingActionType);
        assert!(err.to_string().contains("\"type\""));
    }

    #[test]
    fn test_null_type_is_defined() {
        let action = Action::try_from(json!({ "type": null })).unwrap();
        assert_eq!(action.type_label(), "null");
    }

    #[test]
    fn test_with_does_not_touch_clones() {
        let base = Action::new("a");
        let extended = base.clone().with("x", 1);
        assert!(base.get("x").is_none());
        assert_eq!(extended.get("x"), Some(&json!(1)));
    }
}
