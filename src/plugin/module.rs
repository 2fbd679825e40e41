use std::fmt;
use std::io;
use std::path::Path;

use crate::http::exchange::Exchange;
use crate::plugin::ffi::HandlerFn;
use crate::plugin::registry::PluginRegistry;

/// Upper bound on descriptors read from one module, in case a module's
/// enumeration never terminates.
pub const MAX_DESCRIPTORS: usize = 1024;

/// Handler implemented inside the server process with access to the registry.
pub type BuiltinFn = fn(&mut PluginRegistry, &mut Exchange<'_>) -> io::Result<()>;

/// A callable handler reference as stored in the handler table.
#[derive(Clone, Copy)]
pub enum Handler {
    Native(HandlerFn),
    Builtin(BuiltinFn),
}

impl Handler {
    /// Whether both references point at the same function.
    pub fn same_as(&self, other: &Handler) -> bool {
        match (self, other) {
            (Handler::Native(a), Handler::Native(b)) => *a as usize == *b as usize,
            (Handler::Builtin(a), Handler::Builtin(b)) => *a as usize == *b as usize,
            _ => false,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Native(func) => write!(f, "Native({:#x})", *func as usize),
            Handler::Builtin(func) => write!(f, "Builtin({:#x})", *func as usize),
        }
    }
}

/// One exported handler as announced by its module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub note: String,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            note: note.into(),
        }
    }
}

/// A loaded module. Dropping it closes the underlying library.
pub trait Module: Send {
    /// Module-level note, `None` if the module refuses to describe itself.
    fn describe(&self) -> Option<String>;

    /// The `index`-th exported handler, `None` past the end of the list.
    fn descriptor(&self, index: usize) -> Option<Descriptor>;

    /// Resolves an exported handler symbol.
    fn resolve(&self, symbol: &str) -> Option<Handler>;

    /// Called right before the module is unloaded.
    fn cleanup(&self) {}

    fn descriptors(&self) -> Vec<Descriptor> {
        (0..MAX_DESCRIPTORS)
            .map_while(|index| self.descriptor(index))
            .collect()
    }
}

/// Opens modules from the filesystem.
pub trait Loader: Send {
    /// Opens the library at `path`. Fails with a human-readable message if it
    /// cannot be opened or lacks the query entry point.
    fn open(&self, path: &Path) -> Result<Box<dyn Module>, String>;
}
