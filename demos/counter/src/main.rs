//! counter demo
//!
//! Two feature modules share one store: a counter mounted for the whole run
//! and a short-lived history module mounted and unmounted at runtime. A tagged
//! listener watches both; a middleware rejects negative amounts.

use anyhow::Result;
use serde_json::json;
use tessera::prelude::*;
use tessera::telemetry::init_stdout_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_stdout_tracing();

    let store = Store::builder()
        .name("counter-demo")
        .middleware(TraceActions)
        .middleware(|action: Action, next: Next| async move {
            if action.get("amount").and_then(|a| a.as_i64()).is_some_and(|a| a < 0) {
                return Err(StoreError::middleware(anyhow::anyhow!(
                    "negative amount rejected"
                )));
            }
            next.run(action).await
        })
        .build();

    let counter = store.mount_reducer(counter_module())?;
    let _watch = store.subscribe_tagged(
        TagTree::try_from(json!({ "counter": { "value": "count" }, "history": "history" }))?,
        TagSubscriber::new(|tags: TagMap| {
            let view: serde_json::Map<_, _> =
                tags.into_iter().map(|(tag, value)| (tag, value.to_json())).collect();
            let view = serde_json::Value::Object(view);
            tracing::info!(tags = %view, "watch");
        }),
    )?;

    store.init_state().await?;
    store.dispatch(Action::new("add").with("amount", 2)).await?;

    let history = store.mount_reducer(history_module())?;
    store.init_state().await?;
    for amount in [3, 5] {
        store.dispatch(Action::new("add").with("amount", amount)).await?;
    }
    if let Err(err) = store.dispatch(Action::new("add").with("amount", -1)).await {
        tracing::warn!(error = %err, "dispatch rejected");
    }

    history.unmount();
    store.init_state().await?;
    println!("final state: {:?}", store.state());

    counter.unmount();
    store.shutdown().await;
    Ok(())
}

// ============================================================
// Feature modules
// ============================================================

fn amount(action: &Action) -> i64 {
    action.get("amount").and_then(|a| a.as_i64()).unwrap_or(0)
}

fn counter_module() -> ReducerTree {
    Tree::branch([(
        "counter",
        Tree::branch([(
            "value",
            Reducer::new(|state, action| {
                let current = state.as_ref().and_then(Value::as_i64).unwrap_or(0);
                if action.is("add") {
                    Some(Value::from(current.saturating_add(amount(action))))
                } else {
                    state.or_else(|| Some(Value::from(0i64)))
                }
            }),
        )]),
    )])
}

fn history_module() -> ReducerTree {
    Tree::branch([(
        "history",
        Reducer::from_async(|state: Option<Value>, action: Action| async move {
            let mut entries = state
                .as_ref()
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if action.is("add") {
                entries.push(json!(amount(&action)));
                return Ok(Some(Value::from_json(serde_json::Value::Array(entries))));
            }
            Ok(state.or_else(|| Some(Value::from_json(json!([])))))
        }),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_saturates_instead_of_overflowing() -> Result<()> {
        let store = Store::new();
        let _counter = store.mount_reducer(counter_module())?;

        store.dispatch(Action::new("add").with("amount", i64::MAX)).await?;
        store.dispatch(Action::new("add").with("amount", 1)).await?;
        assert_eq!(
            store.state().map(|state| state.to_json()),
            Some(json!({ "counter": { "value": i64::MAX } }))
        );
        Ok(())
    }
}
