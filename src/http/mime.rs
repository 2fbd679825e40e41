//! File extension to content type mapping.

use std::path::Path;

const DEFAULT_TYPE: &str = "application/octet-stream";

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("xml", "text/xml"),
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("tiff", "image/tiff"),
    ("gz", "application/gzip"),
    ("pdf", "application/pdf"),
    ("rtf", "application/rtf"),
    ("zip", "application/zip"),
    ("wav", "audio/x-wav"),
    ("mov", "video/quicktime"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
];

/// Content type for an extension (without the dot), case-insensitive.
pub fn from_extension(ext: &str) -> &'static str {
    MIME_TYPES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_TYPE)
}

pub fn from_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(from_extension)
        .unwrap_or(DEFAULT_TYPE)
}
