//! Tessera facade crate.
//!
//! Re-exports the core combinators and the runtime store behind a single
//! entry point, plus a tracing initialiser for binaries and demos.

pub use tessera_core as core;
pub use tessera_runtime as runtime;

pub use tessera_core::{
    Action, Reducer, StoreError, Subscriber, TagSubscriber, TagTree, Tree, Value,
};
pub use tessera_runtime::{Store, StoreConfig};

pub mod telemetry;

pub mod prelude {
    pub use tessera_core::prelude::*;
    pub use tessera_runtime::prelude::*;
}
