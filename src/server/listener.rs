use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context as _;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::config::{Config, IdlePolicy};
use crate::http::connection::{Connection, Progress, SpillPolicy};
use crate::http::router;
use crate::plugin::control::ControlModule;
use crate::plugin::ffi::NativeLoader;
use crate::plugin::{Loader, PluginRegistry};
use crate::server::context::Context;
use crate::table::SocketTable;

/// Token of the listening socket. Connections use their descriptor.
const LISTENER: Token = Token(usize::MAX);

/// What to do after one `accept` call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptStep {
    /// Try again right away.
    Retry,
    /// The queue is empty until the next readiness event.
    Drained,
    /// Sockets may still be queued but cannot be taken now; retry next turn.
    Backlog,
}

fn accept_step(error: &io::Error) -> AcceptStep {
    match error.kind() {
        io::ErrorKind::WouldBlock => AcceptStep::Drained,
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => AcceptStep::Retry,
        _ => AcceptStep::Backlog,
    }
}

/// The single-threaded readiness loop: accepts sockets, assembles requests
/// and hands complete ones to the dispatcher.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: SocketTable<Connection>,
    context: Context,
    spill: SpillPolicy,
    serial: u64,
    /// Set when accepting stopped before the queue was drained. Readiness
    /// is edge-triggered, so the next turn must accept without an event.
    backlog: bool,
}

impl Server {
    /// Binds the configured address with native module loading.
    pub fn bind(config: Config) -> anyhow::Result<Self> {
        Self::with_loader(config, Box::new(NativeLoader))
    }

    /// Binds the configured address, registers the control module and loads
    /// the preload list through `loader`.
    pub fn with_loader(config: Config, loader: Box<dyn Loader>) -> anyhow::Result<Self> {
        let module_dir = config.module_dir();
        fs::create_dir_all(&module_dir)
            .with_context(|| format!("creating module directory {}", module_dir.display()))?;

        let mut registry = PluginRegistry::new(loader, config.max_modules, config.max_handlers);
        registry
            .install_builtin(&config.control_module, Box::new(ControlModule))
            .with_context(|| format!("registering control module {}", config.control_module))?;
        for name in &config.preload {
            match registry.load(&module_dir.join(name)) {
                Ok(_) => {}
                Err(e) => warn!(module = %name, error = %e, "Preload failed"),
            }
        }

        let listener = TcpListener::bind(&config.listen_addr)
            .with_context(|| format!("binding {}", config.listen_addr))?;
        listener.set_nonblocking(true)?;

        let poll = Poll::new().context("creating poller")?;
        poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )?;

        info!("Listening on {}", listener.local_addr()?);

        let spill = SpillPolicy {
            heap_limit: config.heap_body_limit,
            dir: module_dir,
        };
        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_connections + 1),
            listener,
            connections: SocketTable::with_capacity(config.max_connections),
            context: Context::new(config, registry),
            spill,
            serial: 0,
            backlog: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Runs the loop until `shutdown` is set or the poller fails.
    ///
    /// The flag is checked once per wait, so stopping takes at most one poll
    /// timeout.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            self.turn()?;
        }
        info!(connections = self.connections.len(), "Event loop stopped");
        Ok(())
    }

    /// One wait plus the handling of everything it reported.
    pub fn turn(&mut self) -> io::Result<()> {
        let timeout = self.context.config.poll_timeout();
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        let tokens: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        let policy = self.context.config.idle_policy;
        if tokens.is_empty() && policy == IdlePolicy::Sweep {
            self.sweep();
        }

        let mut accepted = false;
        for token in tokens {
            if token == LISTENER {
                self.accept_all();
                accepted = true;
            } else if let Ok(socket) = u32::try_from(token.0) {
                self.drive(socket);
            }
        }
        if self.backlog && !accepted {
            self.accept_all();
        }

        if policy == IdlePolicy::PerConnection {
            self.evict_idle();
        }
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => match accept_step(&e) {
                    AcceptStep::Retry => continue,
                    AcceptStep::Drained => {
                        self.backlog = false;
                        return;
                    }
                    AcceptStep::Backlog => {
                        warn!(error = %e, "Accept failed, retrying next turn");
                        self.backlog = true;
                        return;
                    }
                },
            };

            if self.connections.is_full() {
                warn!(%peer, "Connection table full, closing socket");
                continue;
            }
            if let Err(e) = self.admit(stream) {
                warn!(%peer, error = %e, "Failed to register connection");
            }
        }
    }

    fn admit(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;

        self.serial += 1;
        let conn = Connection::new(stream, self.serial);
        let socket = conn.socket();
        if let Err(e) = self.connections.insert(socket, conn) {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            return Err(io::Error::other(e));
        }
        debug!(socket, "Connection accepted");
        Ok(())
    }

    fn drive(&mut self, socket: u32) {
        let Some(conn) = self.connections.get_mut(&socket) else {
            return;
        };
        match conn.on_readable(&self.spill) {
            Ok(Progress::Pending) => {}
            Ok(Progress::Ready) => {
                if let Some(conn) = self.detach(socket) {
                    self.dispatch(conn);
                }
            }
            Ok(Progress::Closed) => {
                debug!(socket, "Peer closed before request was complete");
                self.detach(socket);
            }
            Err(e) => {
                debug!(socket, error = %e, "Receive failed");
                self.detach(socket);
            }
        }
    }

    /// Removes a connection from the table and the poller. Dropping the
    /// returned value closes the socket.
    fn detach(&mut self, socket: u32) -> Option<Connection> {
        let conn = self.connections.remove(&socket)?;
        self.unregister(&conn);
        Some(conn)
    }

    fn unregister(&self, conn: &Connection) {
        let fd = conn.socket() as i32;
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(socket = fd, error = %e, "Deregister failed");
        }
    }

    fn dispatch(&mut self, mut conn: Connection) {
        let socket = conn.socket();
        let send_timeout = self.context.config.send_timeout();
        let stream = conn.stream();
        let prepared = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_write_timeout(Some(send_timeout)));
        if let Err(e) = prepared {
            debug!(socket, error = %e, "Failed to switch socket to blocking mode");
            return;
        }

        if let Err(e) = router::dispatch(&mut self.context, &mut conn) {
            debug!(socket, error = %e, "Response not delivered");
        }
        debug!(socket, "Connection closed");
    }

    /// Evicts every connection. Runs when a wait times out with no events.
    fn sweep(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let evicted = self.connections.drain();
        for (_, conn) in &evicted {
            self.unregister(conn);
        }
        info!(count = evicted.len(), "Idle sweep evicted connections");
    }

    fn evict_idle(&mut self) {
        let now = Instant::now();
        let limit = self.context.config.poll_timeout();
        let idle: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) >= limit)
            .map(|(socket, _)| *socket)
            .collect();
        for socket in idle {
            debug!(socket, "Evicting idle connection");
            self.detach(socket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_errors_are_classified() {
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(accept_step(&would_block), AcceptStep::Drained);

        let interrupted = io::Error::from(io::ErrorKind::Interrupted);
        assert_eq!(accept_step(&interrupted), AcceptStep::Retry);

        // EMFILE: queued sockets stay queued without a new edge.
        let no_files = io::Error::from_raw_os_error(24);
        assert_eq!(accept_step(&no_files), AcceptStep::Backlog);
    }
}
