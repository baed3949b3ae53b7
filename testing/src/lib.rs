//! Test utilities for Tessera.
//!
//! * [`Probe`]: a call-recording spy usable as a subscriber or tag subscriber.
//! * [`constant`], [`counter`], [`tick`]: canned leaf reducers.

use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use tessera_core::{Action, Reducer, Subscriber, TagMap, TagSubscriber, Value};

/// Records every notification it receives.
///
/// Clones share one log, so a probe can be handed to the store and inspected
/// afterwards.
#[derive(Clone, Default)]
pub struct Probe {
    calls: Arc<Mutex<Vec<Option<Value>>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber(&self) -> Subscriber {
        let calls = self.calls.clone();
        Subscriber::new(move |state| calls.lock().push(state))
    }

    /// Records each tag map as a map value.
    pub fn tag_subscriber(&self) -> TagSubscriber {
        let calls = self.calls.clone();
        TagSubscriber::new(move |tags: TagMap| calls.lock().push(Some(Value::from_map(tags))))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// The most recent notification; `None` if never called or last called with nothing.
    pub fn last(&self) -> Option<Value> {
        self.calls.lock().last().cloned().flatten()
    }

    pub fn last_json(&self) -> Option<Json> {
        self.last().map(|value| value.to_json())
    }

    pub fn history_json(&self) -> Vec<Option<Json>> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.as_ref().map(Value::to_json))
            .collect()
    }
}

/// `(state = default) => state`
pub fn constant(default: impl Into<Value>) -> Reducer {
    let default = default.into();
    Reducer::new(move |state, _action| Some(state.unwrap_or_else(|| default.clone())))
}

/// Starts at zero and adds one for every action of type `action_type`.
pub fn counter(action_type: &str) -> Reducer {
    let action_type = action_type.to_string();
    Reducer::new(move |state, action: &Action| {
        if !action.is(&action_type) {
            return Some(state.unwrap_or_else(|| Value::from(0)));
        }
        let count = state.as_ref().and_then(Value::as_i64).unwrap_or(0);
        Some(Value::from(count + 1))
    })
}

/// `(state = start) => state + 1`, on every action.
pub fn tick(start: i64) -> Reducer {
    Reducer::new(move |state, _action| {
        let current = state.as_ref().and_then(Value::as_i64).unwrap_or(start);
        Some(Value::from(current + 1))
    })
}
