use std::fs;
use std::io;
use std::ops::Range;
use std::path::Path;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::serialize_response;
use crate::server::context::Hooks;

/// Where a handler's parameter blob comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Empty,
    /// Raw query of the request target, starting at this byte offset.
    Query(usize),
    /// The whole request body.
    Body,
}

/// One request being answered: the connection plus what a handler needs to
/// write its response.
pub struct Exchange<'a> {
    conn: &'a mut Connection,
    config: &'a Config,
    hooks: &'a Hooks,
    param: Param,
}

impl<'a> Exchange<'a> {
    pub fn new(conn: &'a mut Connection, config: &'a Config, hooks: &'a Hooks) -> Self {
        Self {
            conn,
            config,
            hooks,
            param: Param::Empty,
        }
    }

    pub fn set_param(&mut self, param: Param) {
        self.param = param;
    }

    pub fn socket(&self) -> u32 {
        self.conn.socket()
    }

    pub fn request(&self) -> Option<&Request> {
        self.conn.request()
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// The parameter blob bound by the router.
    pub fn param(&self) -> &[u8] {
        match self.param {
            Param::Empty => &[],
            Param::Query(start) => self
                .conn
                .request()
                .and_then(|req| req.target.as_bytes().get(start..))
                .unwrap_or(&[]),
            Param::Body => self.conn.body(),
        }
    }

    /// Writes raw bytes to the client through the send hook.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (self.hooks.send)(self.conn.stream(), data)
    }

    pub fn respond(&mut self, mut response: Response) -> io::Result<()> {
        response
            .headers
            .entry("Server".to_string())
            .or_insert_with(|| self.config.server_name.clone());
        let bytes = serialize_response(&response);
        self.send(&bytes)
    }

    /// Renders a status page through the error page hook.
    pub fn error_page(&mut self, status: StatusCode, message: Option<&str>) -> io::Result<()> {
        let hook = self.hooks.error_page;
        hook(self, status, message)
    }

    pub fn send_file(&mut self, path: &Path) -> io::Result<()> {
        let hook = self.hooks.static_file;
        hook(self, path)
    }

    pub fn send_folder(&mut self, path: &Path, uri: &str) -> io::Result<()> {
        let hook = self.hooks.static_folder;
        hook(self, path, uri)
    }

    /// Saves `range` of the parameter blob as the file `dest`.
    ///
    /// A body that was received into a mapped scratch file is renamed into
    /// place rather than copied.
    pub fn persist_param(&mut self, range: Range<usize>, dest: &Path) -> io::Result<()> {
        if range.end > self.param().len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "range exceeds parameter",
            ));
        }
        match self.param {
            Param::Body => self.conn.persist_body(range, dest),
            _ => fs::write(dest, &self.param()[range]),
        }
    }
}
