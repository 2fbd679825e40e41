use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::http::exchange::Exchange;
use crate::http::mime;
use crate::http::pages;
use crate::http::response::{Response, StatusCode, http_date};
use crate::http::writer::serialize_head;

/// Longest static path accepted, in bytes.
pub const PATH_CAPACITY: usize = 256;

const CHUNK_SIZE: usize = 4096;
const INDEX_FILE: &str = "index.html";

/// Resolves the static path `uri` under `base_dir` and sends it.
pub fn serve(ex: &mut Exchange<'_>, base_dir: &Path, uri: &str) -> io::Result<()> {
    if uri.len() >= PATH_CAPACITY {
        return ex.error_page(StatusCode::PayloadTooLarge, None);
    }
    if uri.contains("..") {
        return ex.error_page(StatusCode::Forbidden, None);
    }
    let decoded = match urlencoding::decode(uri) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return ex.error_page(StatusCode::BadRequest, None),
    };
    if decoded.contains("..") {
        return ex.error_page(StatusCode::Forbidden, None);
    }

    let path = local_path(base_dir, &decoded);
    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {
            let index = path.join(INDEX_FILE);
            if index.is_file() {
                ex.send_file(&index)
            } else {
                ex.send_folder(&path, &decoded)
            }
        }
        Ok(_) if decoded.ends_with('/') => ex.error_page(StatusCode::NotFound, None),
        Ok(_) => ex.send_file(&path),
        Err(e) => ex.error_page(status_for(&e), None),
    }
}

fn local_path(base_dir: &Path, decoded: &str) -> PathBuf {
    let relative = decoded.trim_start_matches('/');
    if relative.is_empty() {
        base_dir.to_path_buf()
    } else {
        base_dir.join(relative)
    }
}

fn status_for(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        _ => StatusCode::Forbidden,
    }
}

/// Default static file hook: streams the file in fixed-size chunks.
pub fn send_file(ex: &mut Exchange<'_>, path: &Path) -> io::Result<()> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return ex.error_page(status_for(&e), None),
    };
    let len = file.metadata()?.len().to_string();
    let date = http_date();
    let server = ex.config().server_name.clone();
    let head = serialize_head(
        StatusCode::Ok,
        &[
            ("Server", &server),
            ("Content-Type", mime::from_path(path)),
            ("Content-Length", &len),
            ("Date", &date),
            ("Connection", "close"),
        ],
    );
    ex.send(&head)?;

    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        ex.send(&chunk[..n])?;
    }
    tracing::debug!(socket = ex.socket(), path = %path.display(), bytes = %len, "File sent");
    Ok(())
}

/// Default folder hook: lists the directory entries, directories first.
pub fn send_folder(ex: &mut Exchange<'_>, path: &Path, uri: &str) -> io::Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => return ex.error_page(status_for(&e), None),
    };
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => dirs.push(format!("{name}/")),
            _ => files.push(name),
        }
    }
    dirs.sort();
    files.sort();
    dirs.extend(files);

    ex.respond(Response::html(StatusCode::Ok, pages::render_folder(uri, &dirs)))
}
