pub mod config;
pub mod middleware;
mod queue;
pub mod store;

pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::middleware::{Dispatch, Middleware, Next, TraceActions};
    pub use crate::store::{Store, Unmount, Unsubscribe, WeakStore};
}

pub use config::StoreConfig;
pub use middleware::{Dispatch, DispatchFn, Middleware, Next, TraceActions, compose};
pub use store::{Store, StoreBuilder, Unmount, Unsubscribe, WeakStore};
