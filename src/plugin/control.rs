//! Built-in administrative module.
//!
//! Every handler answers with a JSON object carrying a `status` field that is
//! either `"success"` or a human-readable error.

use std::fs;
use std::io;
use std::ops::Range;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::http::exchange::Exchange;
use crate::http::response::Response;
use crate::plugin::module::{BuiltinFn, Descriptor, Handler, Module};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::NAME_CAPACITY;

const NOTE: &str = "http plugin control interface, return data in json format.";

/// Longest multipart boundary line accepted by `plugin_install`.
const BOUNDARY_CAPACITY: usize = 256;

const SUCCESS: &str = "success";

const HANDLERS: &[(&str, &str, BuiltinFn)] = &[
    ("plugin_list", "list all loaded plugins.", plugin_list),
    (
        "plugin_list_interface",
        "list all functions by the plugin name.",
        plugin_list_interface,
    ),
    (
        "plugin_load",
        "load plugin by its file name from the module directory.",
        plugin_load,
    ),
    ("plugin_unload", "unload plugin by its name.", plugin_unload),
    (
        "plugin_install",
        "install plugin from a multipart upload and load it.",
        plugin_install,
    ),
    (
        "plugin_uninstall",
        "unload plugin and remove it from the module directory.",
        plugin_uninstall,
    ),
];

/// The control module. Its handlers run in-process with access to the
/// registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlModule;

impl Module for ControlModule {
    fn describe(&self) -> Option<String> {
        Some(NOTE.to_string())
    }

    fn descriptor(&self, index: usize) -> Option<Descriptor> {
        HANDLERS
            .get(index)
            .map(|(name, note, _)| Descriptor::new(*name, *note))
    }

    fn resolve(&self, symbol: &str) -> Option<Handler> {
        HANDLERS
            .iter()
            .find(|(name, _, _)| *name == symbol)
            .map(|(_, _, func)| Handler::Builtin(*func))
    }
}

fn reply(ex: &mut Exchange<'_>, body: Value) -> io::Result<()> {
    ex.respond(Response::json(&body))
}

fn reply_status(ex: &mut Exchange<'_>, status: &str) -> io::Result<()> {
    reply(ex, json!({ "status": status }))
}

/// Validates a module name passed as a parameter.
fn module_param(param: &[u8]) -> Result<String, &'static str> {
    if param.is_empty() {
        return Err("plugin name is empty.");
    }
    if param.len() >= NAME_CAPACITY {
        return Err("plugin name is too long.");
    }
    let name = std::str::from_utf8(param).map_err(|_| "plugin name is incorrect.")?;
    if name.contains(['/', '\\']) {
        return Err("plugin name is incorrect.");
    }
    Ok(name.to_string())
}

fn plugin_list(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let plugins: Vec<Value> = registry
        .modules()
        .into_iter()
        .map(|m| match m.note {
            Some(note) => json!({ "name": m.name, "note": note, "status": "loaded" }),
            None => json!({ "name": m.name, "status": "error" }),
        })
        .collect();
    reply(ex, json!({ "status": SUCCESS, "plugins": plugins }))
}

fn plugin_list_interface(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let name = match module_param(ex.param()) {
        Ok(name) => name,
        Err(msg) => return reply_status(ex, msg),
    };
    let Ok(interfaces) = registry.interfaces(&name) else {
        return reply_status(ex, "no matched plugin.");
    };
    let interfaces: Vec<Value> = interfaces
        .into_iter()
        .map(|i| json!({ "name": i.name, "note": i.note, "status": i.status.as_str() }))
        .collect();
    reply(ex, json!({ "status": SUCCESS, "interfaces": interfaces }))
}

fn plugin_load(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let name = match module_param(ex.param()) {
        Ok(name) => name,
        Err(msg) => return reply_status(ex, msg),
    };
    let path = ex.config().module_dir().join(&name);
    match registry.load(&path) {
        Ok(_) => reply_status(ex, SUCCESS),
        Err(e) => reply_status(ex, &e.to_string()),
    }
}

fn plugin_unload(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let name = match module_param(ex.param()) {
        Ok(name) => name,
        Err(msg) => return reply_status(ex, msg),
    };
    match registry.unload(&name) {
        Ok(()) => reply_status(ex, SUCCESS),
        Err(e) => reply_status(ex, &e.to_string()),
    }
}

/// Parts of a single-file multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    /// Byte range of the file content within the body.
    pub content: Range<usize>,
}

/// Locates the file name and content of a multipart body whose first line is
/// the boundary.
pub fn parse_upload(body: &[u8]) -> Result<Upload, &'static str> {
    let line_end = find(body, b"\r\n").ok_or("data is not correct.")?;
    if line_end >= BOUNDARY_CAPACITY {
        return Err("boundary is too long.");
    }
    let boundary = &body[..line_end];

    const FILENAME: &[u8] = b"filename=\"";
    let name_start = find(&body[line_end..], FILENAME).ok_or("can not find file name.")?
        + line_end
        + FILENAME.len();
    let name_len = body[name_start..]
        .iter()
        .position(|&b| b == b'"')
        .ok_or("can not get file name.")?;
    let name_end = name_start + name_len;
    let file_name = module_param(&body[name_start..name_end])?;

    let content_start = find(&body[name_end..], b"\r\n\r\n").ok_or("no content begin mark.")?
        + name_end
        + 4;

    let mut end_mark = Vec::with_capacity(boundary.len() + 2);
    end_mark.extend_from_slice(b"\r\n");
    end_mark.extend_from_slice(boundary);
    let content_end = rfind(&body[content_start..], &end_mark).ok_or("no end of content.")?
        + content_start;

    Ok(Upload {
        file_name,
        content: content_start..content_end,
    })
}

fn plugin_install(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let upload = match parse_upload(ex.param()) {
        Ok(upload) => upload,
        Err(msg) => return reply_status(ex, msg),
    };
    if registry.is_loaded(&upload.file_name) {
        return reply_status(ex, "unload exists plugin first.");
    }

    let path = ex.config().module_dir().join(&upload.file_name);
    if let Err(e) = ex.persist_param(upload.content.clone(), &path) {
        warn!(path = %path.display(), error = %e, "Failed to store uploaded module");
        return reply_status(ex, "can not open file.");
    }
    info!(
        module = %upload.file_name,
        bytes = upload.content.len(),
        "Module uploaded"
    );

    match registry.load(&path) {
        Ok(_) => reply_status(ex, SUCCESS),
        Err(e) => {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "Failed to remove rejected module");
            }
            reply_status(ex, &e.to_string())
        }
    }
}

fn plugin_uninstall(registry: &mut PluginRegistry, ex: &mut Exchange<'_>) -> io::Result<()> {
    let name = match module_param(ex.param()) {
        Ok(name) => name,
        Err(msg) => return reply_status(ex, msg),
    };
    if let Err(e) = registry.unload(&name) {
        return reply_status(ex, &e.to_string());
    }
    let path = ex.config().module_dir().join(&name);
    if let Err(e) = fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "Failed to remove module file");
    }
    reply_status(ex, SUCCESS)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
