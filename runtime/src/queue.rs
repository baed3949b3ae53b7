//! Dispatch queue.
//!
//! Every dispatch takes its place in the queue at call time. A single worker
//! task per store drains the queue in FIFO order, so every reduce-then-notify
//! cycle starts only after the previous one has settled, successfully or not.
//!
//! With middleware installed the action is not known yet when the place is
//! taken: the job carries a [`Payload::Deferred`] channel that the end of the
//! middleware chain fills in. A chain that never reaches the base dispatch
//! drops the channel and the worker skips the job.

use crate::middleware::{Dispatch, DispatchFn};
use crate::store::Shared;
use futures_util::FutureExt;
use futures_util::future::{AbortHandle, AbortRegistration, Abortable, Aborted, join_all};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tessera_core::{Action, StoreError, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

pub(crate) enum Payload {
    Ready(Action),
    Deferred(oneshot::Receiver<Action>),
}

pub(crate) struct Job {
    payload: Payload,
    reply: oneshot::Sender<Result<Action, StoreError>>,
    abort: AbortRegistration,
    seq: u64,
}

fn closed() -> Dispatch {
    Box::pin(std::future::ready(Err(StoreError::Closed)))
}

/// Enqueue `action` behind every dispatch already submitted.
///
/// The job is queued before this returns; the future only waits for the reply.
pub(crate) fn enqueue(shared: &Shared, action: Action) -> Dispatch {
    submit(shared, Payload::Ready(action))
}

/// Take a place in the queue now and return the base dispatch that fills it.
///
/// The first call of the returned function hands its action to the reserved
/// job. Any further call (a middleware running `next` twice) queues at the tail.
pub(crate) fn reserve(shared: &Arc<Shared>) -> DispatchFn {
    let (sender, receiver) = oneshot::channel();
    let response = submit(shared, Payload::Deferred(receiver));
    let reserved = Mutex::new(Some((sender, response)));
    let weak = Arc::downgrade(shared);

    Arc::new(move |action: Action| -> Dispatch {
        if let Some((sender, response)) = reserved.lock().take() {
            // A failed send means the job was already superseded or the worker
            // is gone; the response reports which.
            let _ = sender.send(action);
            return response;
        }
        match weak.upgrade() {
            Some(shared) => enqueue(&shared, action),
            None => closed(),
        }
    })
}

fn submit(shared: &Shared, payload: Payload) -> Dispatch {
    let (reply, response) = oneshot::channel();
    let (handle, abort) = AbortHandle::new_pair();
    let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;

    let depth = {
        let queue = shared.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return closed();
        };
        let depth = shared.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job {
            payload,
            reply,
            abort,
            seq,
        };
        if sender.send(job).is_err() {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            return closed();
        }
        *shared.tail.lock() = Some(handle);
        depth
    };

    if depth > shared.config.queue_warn_depth {
        tracing::warn!(
            tessera.store = %shared.config.name,
            depth,
            threshold = shared.config.queue_warn_depth,
            "dispatch queue is backing up"
        );
    }

    Box::pin(async move { response.await.unwrap_or_else(|_| Err(StoreError::Closed)) })
}

/// Abort the most recently enqueued cycle if it has not settled yet.
pub(crate) fn abort_tail(shared: &Shared) {
    if let Some(handle) = shared.tail.lock().take() {
        handle.abort();
    }
}

pub(crate) async fn run_worker(shared: Weak<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let Some(store) = shared.upgrade() else {
            let _ = job.reply.send(Err(StoreError::Closed));
            continue;
        };

        let Job {
            payload,
            reply,
            abort,
            seq,
        } = job;
        let outcome = AssertUnwindSafe(Abortable::new(process(&store, payload, seq), abort))
            .catch_unwind()
            .await;
        store.pending.fetch_sub(1, Ordering::SeqCst);

        let result = match outcome {
            Ok(Ok(Some(result))) => result,
            // The middleware chain never reached the base dispatch.
            Ok(Ok(None)) => continue,
            Ok(Err(Aborted)) => {
                tracing::warn!(
                    tessera.store = %store.config.name,
                    tessera.seq = seq,
                    "cycle superseded"
                );
                Err(StoreError::Superseded)
            }
            Err(panic) => {
                let err = StoreError::panicked(panic.as_ref());
                tracing::error!(
                    tessera.store = %store.config.name,
                    tessera.seq = seq,
                    error = %err,
                    "cycle panicked"
                );
                Err(err)
            }
        };
        let _ = reply.send(result);
        drop(store);

        // Let the caller observe the state its own cycle produced before the
        // next queued cycle replaces it.
        tokio::task::yield_now().await;
    }
    tracing::debug!("dispatch worker stopped");
}

async fn process(
    shared: &Arc<Shared>,
    payload: Payload,
    seq: u64,
) -> Option<Result<Action, StoreError>> {
    let action = match payload {
        Payload::Ready(action) => action,
        Payload::Deferred(action) => action.await.ok()?,
    };

    let span = tracing::info_span!(
        "cycle",
        tessera.store = %shared.config.name,
        tessera.action = %action,
        tessera.seq = seq
    );
    let result = run_cycle(shared, action).instrument(span.clone()).await;
    if let Err(err) = &result {
        span.in_scope(|| tracing::warn!(error = %err, "cycle did not complete"));
    }
    Some(result)
}

async fn run_cycle(shared: &Arc<Shared>, action: Action) -> Result<Action, StoreError> {
    let reducer = shared.reducer.lock().clone();
    let previous = shared.state.lock().clone();

    let next = match reducer {
        Some(reducer) => reducer.reduce(Some(previous.clone()), action.clone()).await?,
        None => Value::empty_map(),
    };
    *shared.state.lock() = next.clone();

    let listeners = shared.listener_snapshot();
    let changed = !Value::ptr_eq(&previous, &next);
    tracing::debug!(changed, listeners = listeners.len(), "reduced");

    let outcomes = join_all(
        listeners
            .iter()
            .map(|listener| listener.notify(Some(next.clone()))),
    )
    .await;
    outcomes.into_iter().collect::<Result<(), _>>()?;

    Ok(action)
}
