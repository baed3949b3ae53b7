//! # Store
//!
//! Owns the live reducer tree, the current state, the listener registry and
//! the dispatch queue.
//!
//! * Everything mounted or subscribed is wrapped under [`ROOT_KEY`], so a single
//!   top-level reducer or subscriber needs no special casing.
//! * Dispatches are applied strictly in submission order by one worker task.
//! * The state is replaced only after a reduce step succeeds.

use crate::config::StoreConfig;
use crate::middleware::{Dispatch, Middleware, compose};
use crate::queue::{self, Job};
use futures_util::future::AbortHandle;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tessera_core::{
    Action, BoxFuture, CombinedReducer, CombinedSubscriber, Fragment, MountTree, Multiplexer,
    ROOT_KEY, Reducer, ReducerTree, StoreError, SubscriberTree, TagSubscriber, TagTree, Value,
    combine_reducers, combine_subscribers,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A registered, compiled notifier.
pub(crate) enum Listener {
    Tree(CombinedSubscriber),
    Multiplex(Multiplexer),
}

impl Listener {
    pub(crate) fn notify(&self, state: Option<Value>) -> BoxFuture<'_, Result<(), StoreError>> {
        match self {
            Listener::Tree(subscriber) => subscriber.notify(state),
            Listener::Multiplex(multiplexer) => multiplexer.notify(state),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    pub(crate) state: Mutex<Value>,
    pub(crate) reducer_tree: Mutex<MountTree<Reducer>>,
    /// `None` while nothing is mounted; cycles then produce an empty state.
    pub(crate) reducer: Mutex<Option<Arc<CombinedReducer>>>,
    pub(crate) listeners: Mutex<Vec<(Uuid, Arc<Listener>)>>,
    pub(crate) queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) tail: Mutex<Option<AbortHandle>>,
    pub(crate) pending: AtomicUsize,
    pub(crate) seq: AtomicU64,
}

impl Shared {
    pub(crate) fn listener_snapshot(&self) -> Vec<Arc<Listener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

/// Builder for [`Store`].
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl StoreBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a middleware. The first one added is the outermost.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Build the store and start its dispatch worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Store {
        let (sender, jobs) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config: self.config,
            state: Mutex::new(Value::empty_map()),
            reducer_tree: Mutex::new(MountTree::new()),
            reducer: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            queue: Mutex::new(Some(sender)),
            worker: Mutex::new(None),
            tail: Mutex::new(None),
            pending: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
        });

        let worker = tokio::spawn(queue::run_worker(Arc::downgrade(&shared), jobs));
        *shared.worker.lock() = Some(worker);

        tracing::debug!(
            tessera.store = %shared.config.name,
            middlewares = self.middlewares.len(),
            "store created"
        );
        Store {
            shared,
            middlewares: self.middlewares.into(),
        }
    }
}

type Middlewares = Arc<[Arc<dyn Middleware>]>;

/// Run `action` through `middlewares` into the queue of `shared`.
///
/// The queue position is taken before this returns. With middleware the chain
/// runs on its own task, so it completes even if the returned future is
/// dropped. A middleware must not await another dispatch on the same store
/// before calling `next`: that dispatch is queued behind this one.
fn dispatch_through(shared: &Arc<Shared>, middlewares: &Middlewares, action: Action) -> Dispatch {
    if middlewares.is_empty() {
        return queue::enqueue(shared, action);
    }

    let chain = compose(middlewares, queue::reserve(shared));
    let task = tokio::spawn(chain(action));
    Box::pin(async move {
        task.await
            .unwrap_or_else(|err| match err.try_into_panic() {
                Ok(panic) => Err(StoreError::panicked(panic.as_ref())),
                Err(_) => Err(StoreError::Closed),
            })
    })
}

/// A dynamically composable, asynchronous state container.
///
/// Cheap to clone; clones share the same state and queue.
///
/// ```rust,ignore
/// let store = Store::new();
/// let _counter = store.mount_reducer(Tree::branch([("counter", counter("increment"))]))?;
/// store.init_state().await?;
/// store.dispatch(Action::new("increment")).await?;
/// assert_eq!(store.state().unwrap().to_json(), json!({ "counter": 1 }));
/// ```
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
    middlewares: Middlewares,
}

impl Store {
    /// A store with default config and no middleware.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// The current state, or `None` if nothing has been reduced into it.
    pub fn state(&self) -> Option<Value> {
        self.shared.state.lock().get(ROOT_KEY).cloned()
    }

    /// Dot paths of every mounted leaf reducer.
    pub fn reducer_paths(&self) -> Vec<String> {
        self.shared
            .reducer_tree
            .lock()
            .resolve()
            .leaf_paths()
            .iter()
            .filter_map(|path| path.strip_prefix(ROOT_KEY))
            .map(|path| path.to_string())
            .collect()
    }

    /// Graft `tree` into the live reducer tree.
    ///
    /// Fails without touching the store if a leaf already exists on any path
    /// `tree` contributes to, or if `tree` has an empty branch.
    pub fn mount_reducer(&self, tree: impl Into<ReducerTree>) -> Result<Unmount, StoreError> {
        let fragment = Fragment::rooted(ROOT_KEY, tree.into());

        let mut current = self.shared.reducer_tree.lock();
        let merged = current.merge(&fragment)?;
        let compiled = combine_reducers(&merged.resolve())?;
        *current = merged;
        *self.shared.reducer.lock() = Some(Arc::new(compiled));
        drop(current);

        tracing::debug!(
            tessera.store = %self.shared.config.name,
            mount = %fragment.id(),
            "reducer mounted"
        );
        Ok(Unmount {
            shared: Arc::downgrade(&self.shared),
            fragment,
            done: AtomicBool::new(false),
        })
    }

    /// Register a subscriber, or a tree of subscribers mirroring the state shape.
    pub fn subscribe(&self, tree: impl Into<SubscriberTree>) -> Result<Unsubscribe, StoreError> {
        let combined = combine_subscribers(&tree.into().nest(ROOT_KEY))?;
        Ok(self.register(Listener::Tree(combined)))
    }

    /// Register a multiplexed subscriber that receives a flat tag map.
    pub fn subscribe_tagged(
        &self,
        target: impl Into<TagTree>,
        subscriber: TagSubscriber,
    ) -> Result<Unsubscribe, StoreError> {
        let multiplexer = Multiplexer::new(&target.into().nest(ROOT_KEY), subscriber)?;
        Ok(self.register(Listener::Multiplex(multiplexer)))
    }

    fn register(&self, listener: Listener) -> Unsubscribe {
        let id = Uuid::new_v4();
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        tracing::debug!(tessera.store = %self.shared.config.name, listener = %id, "subscribed");
        Unsubscribe {
            shared: Arc::downgrade(&self.shared),
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Send `action` through the middleware chain and the dispatch queue.
    ///
    /// The action's place in the queue is fixed before this returns, so
    /// dispatches are applied in call order and the returned future may be
    /// dropped without losing the action.
    pub fn dispatch(&self, action: Action) -> Dispatch {
        dispatch_through(&self.shared, &self.middlewares, action)
    }

    /// Validate a raw JSON action, then dispatch it.
    pub fn try_dispatch(&self, action: Json) -> Result<Dispatch, StoreError> {
        let action = Action::try_from(action)?;
        Ok(self.dispatch(action))
    }

    /// Abort the most recently queued cycle if it is still pending, then dispatch.
    ///
    /// The aborted dispatch resolves to [`StoreError::Superseded`]. Anything it
    /// already wrote to the state stays.
    pub fn dispatch_superseding(&self, action: Action) -> Dispatch {
        queue::abort_tail(&self.shared);
        self.dispatch(action)
    }

    /// Dispatch the reserved init action so every reducer materializes its default.
    pub fn init_state(&self) -> Dispatch {
        self.dispatch(Action::init())
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Dispatches queued or in flight.
    pub fn pending_dispatches(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Close the queue, let the worker finish what is already queued, and
    /// release every listener. Later dispatches fail with [`StoreError::Closed`].
    ///
    /// Must not be awaited from inside a reducer or subscriber of this store.
    pub async fn shutdown(&self) {
        drop(self.shared.queue.lock().take());
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::warn!(
                    tessera.store = %self.shared.config.name,
                    error = %err,
                    "dispatch worker failed"
                );
            }
        }
        self.shared.listeners.lock().clear();
        tracing::debug!(tessera.store = %self.shared.config.name, "store shut down");
    }

    /// A handle that does not keep the store alive, for reducers and
    /// subscribers that dispatch back into their own store.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            shared: Arc::downgrade(&self.shared),
            middlewares: self.middlewares.clone(),
        }
    }
}

/// Non-owning [`Store`] handle. See [`Store::downgrade`].
#[derive(Clone)]
pub struct WeakStore {
    shared: Weak<Shared>,
    middlewares: Middlewares,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.shared.upgrade().map(|shared| Store {
            shared,
            middlewares: self.middlewares.clone(),
        })
    }

    /// Dispatch through the full pipeline; fails with [`StoreError::Closed`]
    /// once the store is gone.
    pub fn dispatch(&self, action: Action) -> Dispatch {
        match self.shared.upgrade() {
            Some(shared) => dispatch_through(&shared, &self.middlewares, action),
            None => Box::pin(std::future::ready(Err(StoreError::Closed))),
        }
    }
}

/// Handle returned by [`Store::mount_reducer`].
pub struct Unmount {
    shared: Weak<Shared>,
    fragment: Fragment<Reducer>,
    done: AtomicBool,
}

impl Unmount {
    /// Remove exactly what this mount added. Returns `true` only on the call
    /// that removed it.
    pub fn unmount(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        // Checked under the tree lock so concurrent calls agree on who removed it.
        let mut current = shared.reducer_tree.lock();
        if self.done.load(Ordering::SeqCst) {
            return false;
        }
        let rest = current.subtract(&self.fragment);
        let compiled = if rest.is_empty() {
            None
        } else {
            match combine_reducers(&rest.resolve()) {
                Ok(compiled) => Some(Arc::new(compiled)),
                Err(err) => {
                    tracing::error!(error = %err, "remaining reducer tree is invalid");
                    return false;
                }
            }
        };
        self.done.store(true, Ordering::SeqCst);
        *current = rest;
        *shared.reducer.lock() = compiled;
        drop(current);

        tracing::debug!(
            tessera.store = %shared.config.name,
            mount = %self.fragment.id(),
            "reducer unmounted"
        );
        true
    }
}

/// Handle returned by [`Store::subscribe`] and [`Store::subscribe_tagged`].
pub struct Unsubscribe {
    shared: Weak<Shared>,
    id: Uuid,
    done: AtomicBool,
}

impl Unsubscribe {
    /// Remove this registration. Returns `true` only on the call that removed it.
    ///
    /// A notification round already in progress still reaches the listener.
    pub fn unsubscribe(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        let mut listeners = shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        before != listeners.len()
    }
}
