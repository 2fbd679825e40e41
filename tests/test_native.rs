mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::{exchange, get, json, response_head, start};
use ember::plugin::ffi::NativeLoader;
use ember::plugin::registry::InterfaceStatus;
use ember::plugin::{Loader, Module, PluginRegistry, RegistryError};

/// Module exercising every callback of the handler ABI. Defining
/// `CLEANUP_MARKER` adds a cleanup entry point that appends to that file.
const MODULE_SOURCE: &str = r#"
#include <stddef.h>
#include <stdio.h>
#include <string.h>

typedef struct {
    const char *name;
    const char *note;
} ember_plugin_info;

typedef struct {
    int socket;
    void *context;
    int (*send)(void *context, const unsigned char *data, size_t len);
    int (*reply)(void *context, int code, const char *content_type,
                 const unsigned char *body, size_t len);
    int (*error_page)(void *context, int code, const char *message);
    int (*send_file)(void *context, const char *path);
} ember_exchange;

static const ember_plugin_info entries[] = {
    { NULL, "native fixture" },
    { "nat_echo", "echo the parameter" },
    { "nat_raw", "raw response through send" },
    { "nat_teapot", "status page" },
    { "nat_file", "file named by the parameter" },
    { "nat_bad_code", "reply with an invalid status" },
    { "nat_fail", "report an I/O failure" },
    { "nat_missing", "announced but not exported" },
};

int ember_module_query(int index, ember_plugin_info *out)
{
    if (index < 0 || (size_t)index >= sizeof(entries) / sizeof(entries[0]))
        return -1;
    *out = entries[index];
    return 0;
}

#ifdef CLEANUP_MARKER
int ember_module_cleanup(void)
{
    FILE *f = fopen(CLEANUP_MARKER, "a");
    if (f == NULL)
        return -1;
    fputs("cleanup\n", f);
    fclose(f);
    return 0;
}
#endif

int nat_echo(ember_exchange *ex, const unsigned char *param, size_t len)
{
    return ex->reply(ex->context, 200, "text/plain", param, len);
}

int nat_raw(ember_exchange *ex, const unsigned char *param, size_t len)
{
    static const char response[] =
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nraw";
    (void)param;
    (void)len;
    return ex->send(ex->context, (const unsigned char *)response, sizeof(response) - 1);
}

int nat_teapot(ember_exchange *ex, const unsigned char *param, size_t len)
{
    (void)param;
    (void)len;
    return ex->error_page(ex->context, 418, "native teapot");
}

int nat_file(ember_exchange *ex, const unsigned char *param, size_t len)
{
    char path[256];
    if (len >= sizeof(path))
        return ex->error_page(ex->context, 413, NULL);
    memcpy(path, param, len);
    path[len] = '\0';
    return ex->send_file(ex->context, path);
}

int nat_bad_code(ember_exchange *ex, const unsigned char *param, size_t len)
{
    (void)param;
    (void)len;
    return ex->reply(ex->context, -7, NULL, (const unsigned char *)"odd", 3);
}

int nat_fail(ember_exchange *ex, const unsigned char *param, size_t len)
{
    (void)ex;
    (void)param;
    (void)len;
    return -1;
}
"#;

/// A valid shared library that is not a module.
const PLAIN_SOURCE: &str = "int unrelated(void) { return 0; }\n";

const HANDLERS: [&str; 7] = [
    "nat_echo",
    "nat_raw",
    "nat_teapot",
    "nat_file",
    "nat_bad_code",
    "nat_fail",
    "nat_missing",
];

/// Builds `source` into the shared library `out`.
fn compile(source: &str, out: &Path, defines: &[String]) -> PathBuf {
    let src = out.with_extension("c");
    fs::write(&src, source).unwrap();
    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let status = Command::new(&compiler)
        .args(["-shared", "-fPIC", "-o"])
        .arg(out)
        .arg(&src)
        .args(defines)
        .status()
        .unwrap_or_else(|e| panic!("running {compiler}: {e}"));
    assert!(status.success(), "{compiler} failed on {}", src.display());
    fs::remove_file(&src).unwrap();
    out.to_path_buf()
}

fn compile_module(dir: &Path, marker: Option<&Path>) -> PathBuf {
    let defines: Vec<String> = marker
        .map(|m| format!("-DCLEANUP_MARKER=\"{}\"", m.display()))
        .into_iter()
        .collect();
    compile(MODULE_SOURCE, &dir.join("nat.so"), &defines)
}

fn open_error(path: &Path) -> String {
    match NativeLoader.open(path) {
        Ok(_) => panic!("{} opened as a module", path.display()),
        Err(e) => e,
    }
}

fn native_registry() -> PluginRegistry {
    PluginRegistry::new(Box::new(NativeLoader), 4, 16)
}

#[test]
fn test_loader_rejects_non_library() {
    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("junk.so");
    fs::write(&junk, b"not a shared object").unwrap();

    assert!(!open_error(&junk).is_empty());

    let err = native_registry().load(&junk).unwrap_err();
    assert!(matches!(err, RegistryError::Open(_)));
}

#[test]
fn test_loader_requires_query_entry_point() {
    let dir = tempfile::tempdir().unwrap();
    let plain = compile(PLAIN_SOURCE, &dir.path().join("plain.so"), &[]);

    let message = open_error(&plain);
    assert!(message.starts_with("can not find query interface"), "{message}");
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_system_library_is_not_a_module() {
    let message = open_error(Path::new("libc.so.6"));
    assert!(message.starts_with("can not find query interface"), "{message}");
}

#[test]
fn test_query_enumerates_note_then_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let path = compile_module(dir.path(), None);
    let module = NativeLoader.open(&path).unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(module.describe().as_deref(), Some("native fixture"));

    let descriptors = module.descriptors();
    let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, HANDLERS);
    assert_eq!(descriptors[0].note, "echo the parameter");
    assert_eq!(descriptors[6].note, "announced but not exported");
    assert!(module.descriptor(HANDLERS.len()).is_none());

    assert!(module.resolve("nat_echo").is_some());
    assert!(module.resolve("nat_missing").is_none());
}

#[test]
fn test_registry_loads_native_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = compile_module(dir.path(), None);
    let mut registry = native_registry();

    assert_eq!(registry.load(&path).unwrap(), "nat.so");
    assert_eq!(registry.handler_count(), HANDLERS.len() - 1);
    assert!(registry.handler("nat_missing").is_none());

    let interfaces = registry.interfaces("nat.so").unwrap();
    for interface in &interfaces {
        let expected = if interface.name == "nat_missing" {
            InterfaceStatus::NotFound
        } else {
            InterfaceStatus::Loaded
        };
        assert_eq!(interface.status, expected, "{}", interface.name);
    }

    // No cleanup entry point: unloading still succeeds.
    registry.unload("nat.so").unwrap();
    assert_eq!(registry.handler_count(), 0);
}

#[test]
fn test_cleanup_runs_once_on_unload() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("cleaned");
    let path = compile_module(dir.path(), Some(&marker));
    let mut registry = native_registry();

    registry.load(&path).unwrap();
    assert!(!marker.exists());
    registry.unload("nat.so").unwrap();
    assert_eq!(fs::read_to_string(&marker).unwrap(), "cleanup\n");

    registry.load(&path).unwrap();
    registry.unload("nat.so").unwrap();
    assert_eq!(fs::read_to_string(&marker).unwrap(), "cleanup\ncleanup\n");
}

#[test]
fn test_native_handlers_answer_through_callbacks() {
    let server = start(NativeLoader, |config, root| {
        compile_module(&config.module_dir(), Some(&root.join("cleaned")));
        fs::write(root.join("hello.txt"), "hello native").unwrap();
        config.preload = vec!["nat.so".to_string()];
    });

    assert_eq!(get(server.addr, "/cgi-bin/nat_echo?abc"), (200, b"abc".to_vec()));
    assert_eq!(get(server.addr, "/cgi-bin/nat_echo"), (200, Vec::new()));
    assert_eq!(get(server.addr, "/cgi-bin/nat_raw"), (200, b"raw".to_vec()));

    let (status, body) = get(server.addr, "/cgi-bin/nat_teapot");
    assert_eq!(status, 418);
    assert!(String::from_utf8_lossy(&body).contains("native teapot"));

    assert_eq!(
        get(server.addr, "/cgi-bin/nat_file?hello.txt"),
        (200, b"hello native".to_vec())
    );
    assert_eq!(get(server.addr, "/cgi-bin/nat_file?absent.txt").0, 404);

    let raw = exchange(server.addr, b"GET /cgi-bin/nat_bad_code HTTP/1.1\r\n\r\n");
    assert!(response_head(&raw).starts_with("HTTP/1.1 500 Internal Server Error"));

    let raw = exchange(server.addr, b"GET /cgi-bin/nat_fail HTTP/1.1\r\n\r\n");
    assert!(raw.is_empty());
}

#[test]
fn test_native_module_unload_and_reload() {
    let server = start(NativeLoader, |config, root| {
        compile_module(&config.module_dir(), Some(&root.join("cleaned")));
        config.preload = vec!["nat.so".to_string()];
    });
    let marker = server.root.path().join("cleaned");

    let (_, body) = get(server.addr, "/cgi-bin/plugin_list_interface?nat.so");
    let listing = json(&body);
    assert_eq!(listing["status"], "success");
    let interfaces = listing["interfaces"].as_array().unwrap();
    assert_eq!(interfaces.len(), HANDLERS.len());
    assert_eq!(interfaces[0]["name"], "nat_echo");
    assert_eq!(interfaces[0]["status"], "loaded");
    assert_eq!(interfaces[6]["name"], "nat_missing");
    assert_eq!(interfaces[6]["status"], "not found");

    let (_, body) = get(server.addr, "/cgi-bin/plugin_unload?nat.so");
    assert_eq!(json(&body)["status"], "success");
    assert_eq!(fs::read_to_string(&marker).unwrap(), "cleanup\n");
    assert_eq!(get(server.addr, "/cgi-bin/nat_echo?abc").0, 404);

    let (_, body) = get(server.addr, "/cgi-bin/plugin_load?nat.so");
    assert_eq!(json(&body)["status"], "success");
    assert_eq!(get(server.addr, "/cgi-bin/nat_echo?again"), (200, b"again".to_vec()));
}
