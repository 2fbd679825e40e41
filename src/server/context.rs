use std::io;
use std::net::TcpStream;
use std::path::Path;

use crate::config::Config;
use crate::http::exchange::Exchange;
use crate::http::files;
use crate::http::pages;
use crate::http::response::StatusCode;
use crate::http::writer;
use crate::plugin::PluginRegistry;

/// Outcome of the request filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Route the request normally.
    Continue,
    /// The filter already answered; skip routing.
    Handled,
}

pub type SendHook = fn(&mut TcpStream, &[u8]) -> io::Result<()>;
pub type ErrorPageHook = fn(&mut Exchange<'_>, StatusCode, Option<&str>) -> io::Result<()>;
pub type FileHook = fn(&mut Exchange<'_>, &Path) -> io::Result<()>;
pub type FolderHook = fn(&mut Exchange<'_>, &Path, &str) -> io::Result<()>;
pub type FilterHook = fn(&mut Exchange<'_>) -> io::Result<Filter>;

/// Replaceable functions the server calls at fixed points of a request.
#[derive(Clone, Copy)]
pub struct Hooks {
    pub send: SendHook,
    pub error_page: ErrorPageHook,
    pub static_file: FileHook,
    pub static_folder: FolderHook,
    /// Runs before routing, if set.
    pub filter: Option<FilterHook>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            send: writer::send_all::<TcpStream>,
            error_page: pages::error_page,
            static_file: files::send_file,
            static_folder: files::send_folder,
            filter: None,
        }
    }
}

/// Process-wide state shared by the event loop and the dispatcher.
pub struct Context {
    pub config: Config,
    pub hooks: Hooks,
    pub registry: PluginRegistry,
}

impl Context {
    pub fn new(config: Config, registry: PluginRegistry) -> Self {
        Self {
            config,
            hooks: Hooks::default(),
            registry,
        }
    }
}
