use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use std::collections::HashMap;
use thiserror::Error;

/// Blank line separating the request head from the body.
pub const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request head is incomplete")]
    Incomplete,
}

impl ParseError {
    /// Status code the client receives for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedMethod => StatusCode::NotImplemented,
            ParseError::Incomplete => StatusCode::PayloadTooLarge,
            ParseError::InvalidRequest | ParseError::InvalidHeader => StatusCode::BadRequest,
        }
    }
}

/// Parses a request head.
///
/// `buf` may extend past the head; parsing stops at the first blank line.
/// Returns the request and the offset of the first body byte.
pub fn parse_request_head(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str =
        std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let method = Method::from_token(method_str).ok_or(ParseError::UnsupportedMethod)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    // Headers
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        headers.insert(key.trim().to_string(), value.trim().to_string());
    }

    let request = Request {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
    };

    Ok((request, headers_end + HEADER_END.len()))
}

/// Position of the header terminator, if present.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}
