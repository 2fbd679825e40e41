//! C ABI shared with native modules.
//!
//! A module exports
//!
//! ```c
//! int ember_module_query(int index, ember_plugin_info *out);   /* required */
//! int ember_module_cleanup(void);                               /* optional */
//! ```
//!
//! `index == 0` fills `out->note` with the module note; `index >= 1` fills
//! `{name, note}` of the `index`-th exported handler; a negative return ends
//! the list. Every handler has the signature of [`HandlerFn`] and answers the
//! request through the callbacks in [`RawExchange`].

use std::ffi::{CStr, c_char, c_int, c_void};
use std::path::Path;

use libloading::Library;

use crate::http::exchange::Exchange;
use crate::http::response::{ResponseBuilder, StatusCode};
use crate::plugin::module::{Descriptor, Handler, Loader, Module};

pub const QUERY_SYMBOL: &str = "ember_module_query";
pub const CLEANUP_SYMBOL: &str = "ember_module_cleanup";

#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub note: *const c_char,
}

impl PluginInfo {
    pub const fn empty() -> Self {
        Self {
            name: std::ptr::null(),
            note: std::ptr::null(),
        }
    }
}

pub type QueryFn = unsafe extern "C" fn(index: c_int, out: *mut PluginInfo) -> c_int;
pub type CleanupFn = unsafe extern "C" fn() -> c_int;
pub type HandlerFn =
    unsafe extern "C" fn(exchange: *mut RawExchange, param: *const u8, len: usize) -> c_int;

/// The request as seen by a native handler.
///
/// `context` is opaque to the module and must be passed back to the
/// callbacks. All callbacks return 0 on success and -1 on I/O failure.
#[repr(C)]
pub struct RawExchange {
    pub socket: c_int,
    pub context: *mut c_void,
    /// Writes raw bytes to the client.
    pub send: unsafe extern "C" fn(context: *mut c_void, data: *const u8, len: usize) -> c_int,
    /// Sends a complete response; a null content type means `text/plain`.
    pub reply: unsafe extern "C" fn(
        context: *mut c_void,
        code: c_int,
        content_type: *const c_char,
        body: *const u8,
        len: usize,
    ) -> c_int,
    /// Sends the server's status page; the message may be null.
    pub error_page:
        unsafe extern "C" fn(context: *mut c_void, code: c_int, message: *const c_char) -> c_int,
    /// Sends a file through the static-file hook. Relative paths resolve
    /// against the static root.
    pub send_file: unsafe extern "C" fn(context: *mut c_void, path: *const c_char) -> c_int,
}

/// Calls a native handler for `exchange` with the exchange's parameter blob.
pub fn invoke(handler: HandlerFn, exchange: &mut Exchange<'_>) -> c_int {
    let context: *mut Exchange<'_> = exchange;
    // SAFETY: `context` is valid for the whole call; the parameter slice and
    // the callbacks are both reached through it.
    let (socket, param, len) = unsafe {
        let param = (*context).param();
        ((*context).socket(), param.as_ptr(), param.len())
    };
    let mut raw = RawExchange {
        socket: socket as c_int,
        context: context.cast(),
        send: raw_send,
        reply: raw_reply,
        error_page: raw_error_page,
        send_file: raw_send_file,
    };
    // SAFETY: the handler was resolved from a module that declared it with
    // the `HandlerFn` signature.
    unsafe { handler(&mut raw, param, len) }
}

unsafe fn exchange_from<'a>(context: *mut c_void) -> &'a mut Exchange<'a> {
    // SAFETY: `context` was produced by `invoke` and outlives the handler call.
    unsafe { &mut *context.cast::<Exchange<'a>>() }
}

unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: the module guarantees `data` points to `len` readable bytes.
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null strings from modules are NUL-terminated.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn status_of(code: c_int) -> StatusCode {
    StatusCode::from_u16(u16::try_from(code).unwrap_or(500))
}

unsafe extern "C" fn raw_send(context: *mut c_void, data: *const u8, len: usize) -> c_int {
    let exchange = unsafe { exchange_from(context) };
    let data = unsafe { byte_slice(data, len) };
    match exchange.send(data) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

unsafe extern "C" fn raw_reply(
    context: *mut c_void,
    code: c_int,
    content_type: *const c_char,
    body: *const u8,
    len: usize,
) -> c_int {
    let exchange = unsafe { exchange_from(context) };
    let content_type = unsafe { c_string(content_type) }.unwrap_or_else(|| "text/plain".into());
    let body = unsafe { byte_slice(body, len) }.to_vec();
    let response = ResponseBuilder::new(status_of(code))
        .header("Content-Type", content_type)
        .body(body)
        .build();
    match exchange.respond(response) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

unsafe extern "C" fn raw_error_page(
    context: *mut c_void,
    code: c_int,
    message: *const c_char,
) -> c_int {
    let exchange = unsafe { exchange_from(context) };
    let message = unsafe { c_string(message) };
    match exchange.error_page(status_of(code), message.as_deref()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

unsafe extern "C" fn raw_send_file(context: *mut c_void, path: *const c_char) -> c_int {
    let exchange = unsafe { exchange_from(context) };
    let Some(path) = (unsafe { c_string(path) }) else {
        return -1;
    };
    let path = exchange.config().base_dir.join(path);
    match exchange.send_file(&path) {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(socket = exchange.socket(), path = %path.display(), error = %e, "Native send_file failed");
            -1
        }
    }
}

/// A module backed by a native shared library.
pub struct NativeModule {
    query: QueryFn,
    cleanup: Option<CleanupFn>,
    library: Library,
}

impl NativeModule {
    fn query(&self, index: usize) -> Option<PluginInfo> {
        let index = c_int::try_from(index).ok()?;
        let mut info = PluginInfo::empty();
        // SAFETY: `query` comes from the still-open library and `info` is a
        // valid out-pointer.
        let rc = unsafe { (self.query)(index, &mut info) };
        (rc >= 0).then_some(info)
    }
}

impl Module for NativeModule {
    fn describe(&self) -> Option<String> {
        let info = self.query(0)?;
        // SAFETY: pointers returned by the query entry point are static
        // strings of the library.
        Some(unsafe { c_string(info.note) }.unwrap_or_default())
    }

    fn descriptor(&self, index: usize) -> Option<Descriptor> {
        let info = self.query(index + 1)?;
        // SAFETY: as in `describe`.
        let name = unsafe { c_string(info.name) }?;
        let note = unsafe { c_string(info.note) }.unwrap_or_default();
        Some(Descriptor { name, note })
    }

    fn resolve(&self, symbol: &str) -> Option<Handler> {
        // SAFETY: exported handler symbols have the `HandlerFn` signature by
        // contract of the module ABI.
        let func = unsafe { self.library.get::<HandlerFn>(symbol.as_bytes()) }.ok()?;
        Some(Handler::Native(*func))
    }

    fn cleanup(&self) {
        if let Some(cleanup) = self.cleanup {
            // SAFETY: resolved from the still-open library.
            unsafe {
                cleanup();
            }
        }
    }
}

/// Loads modules with the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl Loader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>, String> {
        // SAFETY: loading a library runs its initializers; modules are
        // trusted code installed by the administrator.
        let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;

        // SAFETY: symbol types follow the module ABI documented above.
        let query = unsafe { library.get::<QueryFn>(QUERY_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| format!("can not find query interface: {e}"))?;
        let cleanup = unsafe { library.get::<CleanupFn>(CLEANUP_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol);

        Ok(Box::new(NativeModule {
            query,
            cleanup,
            library,
        }))
    }
}
