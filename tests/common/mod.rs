#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_int;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ember::config::Config;
use ember::plugin::ffi::{HandlerFn, RawExchange};
use ember::plugin::{Descriptor, Handler, Loader, Module};
use ember::server::Server;
use tempfile::TempDir;

pub unsafe extern "C" fn echo(ex: *mut RawExchange, param: *const u8, len: usize) -> c_int {
    unsafe { ((*ex).reply)((*ex).context, 200, c"text/plain".as_ptr(), param, len) }
}

/// Answers with the parameter length and the sum of its bytes.
pub unsafe extern "C" fn measure(ex: *mut RawExchange, param: *const u8, len: usize) -> c_int {
    let bytes = if len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(param, len) }
    };
    let sum: u64 = bytes.iter().map(|&b| b as u64).sum();
    let text = format!("{len}:{sum}");
    unsafe {
        ((*ex).reply)(
            (*ex).context,
            200,
            std::ptr::null(),
            text.as_ptr(),
            text.len(),
        )
    }
}

pub unsafe extern "C" fn teapot(ex: *mut RawExchange, _param: *const u8, _len: usize) -> c_int {
    unsafe { ((*ex).error_page)((*ex).context, 418, c"short and stout".as_ptr()) }
}

pub unsafe extern "C" fn broken(_ex: *mut RawExchange, _param: *const u8, _len: usize) -> c_int {
    -1
}

/// A second, distinct `echo` used to provoke name conflicts.
pub unsafe extern "C" fn echo_again(ex: *mut RawExchange, param: *const u8, len: usize) -> c_int {
    unsafe { echo(ex, param, len) }
}

/// What a fake library exports.
#[derive(Clone)]
pub struct FakeLibrary {
    pub note: Option<String>,
    pub handlers: Vec<(&'static str, HandlerFn)>,
    /// Names announced by the query entry point without an exported symbol.
    pub missing: Vec<&'static str>,
}

impl FakeLibrary {
    pub fn new(note: &str) -> Self {
        Self {
            note: Some(note.to_string()),
            handlers: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn handler(mut self, name: &'static str, func: HandlerFn) -> Self {
        self.handlers.push((name, func));
        self
    }

    pub fn missing(mut self, name: &'static str) -> Self {
        self.missing.push(name);
        self
    }
}

pub struct FakeModule {
    library: FakeLibrary,
    cleanups: Arc<AtomicUsize>,
}

impl Module for FakeModule {
    fn describe(&self) -> Option<String> {
        self.library.note.clone()
    }

    fn descriptor(&self, index: usize) -> Option<Descriptor> {
        let names = self
            .library
            .handlers
            .iter()
            .map(|(name, _)| *name)
            .chain(self.library.missing.iter().copied());
        names
            .enumerate()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| Descriptor::new(name, format!("{name} handler")))
    }

    fn resolve(&self, symbol: &str) -> Option<Handler> {
        self.library
            .handlers
            .iter()
            .find(|(name, _)| *name == symbol)
            .map(|(_, func)| Handler::Native(*func))
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens fake libraries by file name. The file must exist on disk.
#[derive(Clone, Default)]
pub struct FakeLoader {
    catalog: HashMap<String, FakeLibrary>,
    pub cleanups: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &str, library: FakeLibrary) -> Self {
        self.catalog.insert(name.to_string(), library);
        self
    }
}

impl Loader for FakeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>, String> {
        if !path.is_file() {
            return Err(format!(
                "{}: cannot open shared object file",
                path.display()
            ));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let library = self
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| "can not find query interface".to_string())?;
        Ok(Box::new(FakeModule {
            library,
            cleanups: Arc::clone(&self.cleanups),
        }))
    }
}

/// Creates a placeholder file standing in for a library.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake library").unwrap();
    path
}

/// A server running on a background thread with a temporary static root.
pub struct TestServer {
    pub addr: SocketAddr,
    pub root: TempDir,
}

impl TestServer {
    pub fn module_dir(&self) -> PathBuf {
        self.root.path().join("cgi-bin")
    }
}

pub fn test_config(root: &Path) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        base_dir: root.to_path_buf(),
        ..Config::default()
    }
}

/// Starts a server. `setup` may adjust the config and prepare files in the
/// root before binding.
pub fn start(loader: impl Loader + 'static, setup: impl FnOnce(&mut Config, &Path)) -> TestServer {
    start_with(loader, setup, |_| {})
}

/// Like [`start`], with access to the bound server before its loop runs.
pub fn start_with(
    loader: impl Loader + 'static,
    setup: impl FnOnce(&mut Config, &Path),
    customize: impl FnOnce(&mut Server),
) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    std::fs::create_dir_all(config.module_dir()).unwrap();
    setup(&mut config, root.path());

    let mut server = Server::with_loader(config, Box::new(loader)).unwrap();
    customize(&mut server);
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run(Arc::new(AtomicBool::new(false))));
    TestServer { addr, root }
}

/// Sends raw request bytes and reads until the server closes the socket.
pub fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(request).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

pub fn get(addr: SocketAddr, target: &str) -> (u16, Vec<u8>) {
    let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    split_response(&exchange(addr, request.as_bytes()))
}

pub fn post(addr: SocketAddr, target: &str, body: &[u8]) -> (u16, Vec<u8>) {
    let mut request = format!(
        "POST {target} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    split_response(&exchange(addr, &request))
}

/// Status code and body of a raw response.
pub fn split_response(raw: &[u8]) -> (u16, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = std::str::from_utf8(&raw[..end]).unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("response has no status code");
    (status, raw[end + 4..].to_vec())
}

/// Raw header block of a response.
pub fn response_head(raw: &[u8]) -> String {
    let end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

/// Demo module used by most end-to-end tests.
pub fn demo_loader() -> FakeLoader {
    FakeLoader::new().module(
        "demo.so",
        FakeLibrary::new("demo handlers")
            .handler("echo", echo)
            .handler("measure", measure)
            .handler("teapot", teapot)
            .handler("broken", broken),
    )
}
