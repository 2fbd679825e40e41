use std::fs;
use std::io::{self, Read};
use std::net::TcpStream;
use std::ops::Range;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::http::body::{BodyStorage, MappedBody};
use crate::http::parser::{HEADER_END, ParseError, find_headers_end, parse_request_head};
use crate::http::request::Request;
use crate::http::response::StatusCode;

/// Size of the per-connection header buffer.
pub const HEADER_CAPACITY: usize = 4096;

/// Where large bodies go once they no longer fit in memory.
#[derive(Debug, Clone)]
pub struct SpillPolicy {
    /// Largest body kept in a heap buffer.
    pub heap_limit: usize,
    /// Directory for mapped scratch files.
    pub dir: PathBuf,
}

/// What a readiness event did to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed.
    Pending,
    /// The request is complete (or rejected) and must be dispatched.
    Ready,
    /// The peer closed the connection before the request was complete.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Complete,
}

/// Receive state of one accepted socket.
pub struct Connection {
    stream: TcpStream,
    serial: u64,
    head: Box<[u8; HEADER_CAPACITY]>,
    head_used: usize,
    body_offset: usize,
    body_target: usize,
    body_received: usize,
    body: BodyStorage,
    phase: Phase,
    request: Option<Request>,
    rejection: Option<StatusCode>,
    last_activity: Instant,
}

impl Connection {
    /// Wraps an accepted socket. `serial` makes scratch file names unique
    /// even when the OS reuses a descriptor.
    pub fn new(stream: TcpStream, serial: u64) -> Self {
        Self {
            stream,
            serial,
            head: Box::new([0u8; HEADER_CAPACITY]),
            head_used: 0,
            body_offset: 0,
            body_target: 0,
            body_received: 0,
            body: BodyStorage::Inline,
            phase: Phase::Header,
            request: None,
            rejection: None,
            last_activity: Instant::now(),
        }
    }

    pub fn socket(&self) -> u32 {
        self.stream.as_raw_fd() as u32
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Status to answer with instead of routing, if the head was unusable.
    pub fn rejection(&self) -> Option<StatusCode> {
        self.rejection
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Drains the socket until it would block, advancing the state machine.
    pub fn on_readable(&mut self, spill: &SpillPolicy) -> io::Result<Progress> {
        self.last_activity = Instant::now();
        loop {
            match self.phase {
                Phase::Complete => return Ok(Progress::Ready),
                Phase::Header => {
                    if self.head_used == HEADER_CAPACITY {
                        self.reject(ParseError::Incomplete.status());
                        return Ok(Progress::Ready);
                    }
                    let n = match self.stream.read(&mut self.head[self.head_used..]) {
                        Ok(0) => return Ok(Progress::Closed),
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Progress::Pending);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    };
                    // Only the new bytes plus a possible split terminator need scanning.
                    let scan_from = self.head_used.saturating_sub(HEADER_END.len() - 1);
                    self.head_used += n;
                    if let Some(pos) = find_headers_end(&self.head[scan_from..self.head_used]) {
                        self.finish_head(scan_from + pos + HEADER_END.len(), spill)?;
                    }
                }
                Phase::Body => {
                    let n = match self.read_body() {
                        Ok(0) => return Ok(Progress::Closed),
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Progress::Pending);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    };
                    self.body_received += n;
                    if self.body_received == self.body_target {
                        self.phase = Phase::Complete;
                    }
                }
            }
        }
    }

    /// Reads into the unfilled part of the active body storage.
    fn read_body(&mut self) -> io::Result<usize> {
        let Self {
            stream,
            head,
            body,
            body_offset,
            body_received,
            body_target,
            ..
        } = self;
        let dst: &mut [u8] = match body {
            BodyStorage::Inline => {
                &mut head[*body_offset + *body_received..*body_offset + *body_target]
            }
            BodyStorage::Heap(buf) => &mut buf[*body_received..*body_target],
            BodyStorage::Mapped(map) => &mut map.as_mut_slice()[*body_received..*body_target],
        };
        stream.read(dst)
    }

    fn reject(&mut self, status: StatusCode) {
        self.rejection = Some(status);
        self.phase = Phase::Complete;
    }

    /// Parses the head ending at `body_offset` and picks body storage.
    fn finish_head(&mut self, body_offset: usize, spill: &SpillPolicy) -> io::Result<()> {
        let request = match parse_request_head(&self.head[..self.head_used]) {
            Ok((request, _)) => request,
            Err(e) => {
                tracing::debug!(socket = self.socket(), error = %e, "Rejecting request head");
                self.reject(e.status());
                return Ok(());
            }
        };

        let target = request.content_length();
        let arrived = (self.head_used - body_offset).min(target);

        tracing::debug!(
            socket = self.socket(),
            method = request.method.as_str(),
            target = %request.target,
            content_length = target,
            keep_alive = request.keep_alive(),
            "Request head received"
        );

        self.request = Some(request);
        self.body_offset = body_offset;
        self.body_target = target;
        self.body_received = arrived;

        if arrived == target {
            self.phase = Phase::Complete;
            return Ok(());
        }

        let prefix = &self.head[body_offset..body_offset + arrived];
        if body_offset + target <= HEADER_CAPACITY {
            self.body = BodyStorage::Inline;
        } else if target <= spill.heap_limit {
            self.body = BodyStorage::heap(target, prefix);
        } else {
            let path = spill.dir.join(format!(".body-{}-{}.tmp", self.socket(), self.serial));
            let mut mapped = MappedBody::create(path, target)?;
            mapped.as_mut_slice()[..arrived].copy_from_slice(prefix);
            self.body = BodyStorage::Mapped(mapped);
        }
        tracing::debug!(socket = self.socket(), storage = self.body.kind(), "Receiving body");
        self.phase = Phase::Body;
        Ok(())
    }

    /// The received body. Complete once the connection reported `Ready`.
    pub fn body(&self) -> &[u8] {
        match &self.body {
            BodyStorage::Inline => {
                &self.head[self.body_offset..self.body_offset + self.body_received]
            }
            BodyStorage::Heap(buf) => &buf[..self.body_received],
            BodyStorage::Mapped(map) => {
                let bytes = map.as_slice();
                &bytes[..self.body_received.min(bytes.len())]
            }
        }
    }

    /// Saves `range` of the body as the file `dest`.
    ///
    /// Mapped bodies are renamed into place instead of copied.
    pub fn persist_body(&mut self, range: Range<usize>, dest: &Path) -> io::Result<()> {
        match &mut self.body {
            BodyStorage::Mapped(map) => map.persist(range, dest),
            _ => fs::write(dest, &self.body()[range]),
        }
    }
}
