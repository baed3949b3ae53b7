//! Runtime-agnostic building blocks for a composable state container.
//!
//! Trees of reducers and subscribers are merged from independently mounted
//! fragments ([`merge`]), compiled into single asynchronous combinators
//! ([`reducer`], [`subscriber`], [`multiplex`]) and driven by a store that
//! lives in `tessera-runtime`.

pub mod action;
pub mod error;
pub mod merge;
pub mod multiplex;
pub mod path;
pub mod reducer;
pub mod subscriber;
pub mod tree;
pub mod value;

use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future. Every combinator hands these out so trees of
/// handlers can recurse without naming their future types.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use action::{Action, INIT_ACTION_TYPE};
pub use error::{StoreError, StoreResult, ValidationError};
pub use merge::{Fragment, MountId, MountTree};
pub use multiplex::{Multiplexer, TagMap, TagSubscriber, TagTree};
pub use path::{KeyPath, ROOT_KEY};
pub use reducer::{CombinedReducer, ReduceResult, Reducer, ReducerTree, combine_reducers};
pub use subscriber::{
    CombinedSubscriber, NotifyResult, Subscriber, SubscriberTree, combine_subscribers,
};
pub use tree::{Branch, Tree};
pub use value::{Node, StateMap, Value};

pub mod prelude {
    pub use crate::action::Action;
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::multiplex::{TagMap, TagSubscriber, TagTree};
    pub use crate::reducer::{Reducer, ReducerTree};
    pub use crate::subscriber::{Subscriber, SubscriberTree};
    pub use crate::tree::Tree;
    pub use crate::value::Value;
}
