//! Connection multiplexing and process-wide state.
//!
//! - **`listener`**: the `mio` readiness loop owning the connection table
//! - **`context`**: configuration, hook table and plugin registry

pub mod context;
pub mod listener;

pub use context::{Context, Filter, Hooks};
pub use listener::Server;
