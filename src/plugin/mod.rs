//! Runtime-loadable handler modules.
//!
//! A module is a native library exporting a query entry point that describes
//! the module and enumerates the handlers it exports. The registry keeps two
//! fixed-capacity tables: loaded modules keyed by file name (always containing
//! a `.`) and handlers keyed by bare symbol name (never containing one).
//!
//! - **`ffi`**: the C ABI and the `libloading` based loader
//! - **`module`**: the `Module`/`Loader` traits and the `Handler` reference
//! - **`registry`**: load/unload protocol and the two tables
//! - **`control`**: the built-in administrative module (list, load, install...)

pub mod control;
pub mod ffi;
pub mod module;
pub mod registry;

pub use module::{Descriptor, Handler, Loader, Module};
pub use registry::PluginRegistry;

use thiserror::Error;

/// Longest module or handler name, including room for a terminator.
pub const NAME_CAPACITY: usize = 32;

/// Character that marks a module entry as opposed to a callable handler.
pub const MODULE_SEPARATOR: char = '.';

/// Failures of the load/unload protocol. The messages are what the control
/// module reports to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("library name is too long.")]
    NameTooLong,
    #[error("library name is not correct.")]
    BadName,
    #[error("library has already loaded.")]
    AlreadyLoaded,
    #[error("library has not been loaded.")]
    NotLoaded,
    #[error("can not unload current running plugin.")]
    Protected,
    #[error("hash is full.")]
    TableFull,
    #[error("{0}")]
    Open(String),
}
