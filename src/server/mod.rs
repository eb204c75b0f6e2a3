//! Single-threaded readiness reactor.
//!
//! One `mio::Poll` watches the listening sockets, every client socket and
//! the pipes of running CGI programs. Everything is non-blocking and
//! edge-triggered: each handler drains its source until would-block and
//! resumes on the next notification.

pub mod listener;
pub mod registry;
pub mod tls;
pub mod transport;

use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use rustls::ServerConfig;
use tracing::{debug, info, warn};

use crate::cgi::{self, build_env, parse_cgi_output, CgiContext, CgiInput, CgiOutput, CgiProcess};
use crate::config::{Config, ServerSettings};
use crate::http::connection::{CgiLink, Connection, Flush};
use crate::http::handler::{synthetic, Dispatch, Handler};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use listener::{Listener, Scheme};
use registry::{ConnectionRegistry, Teardown};
use transport::Transport;

const WAKE: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 1024;

/// Everything the reactor keeps in its registry.
pub enum Endpoint {
    Client(Connection),
    CgiInput(CgiInput),
    CgiOutput(CgiOutput),
}

impl Endpoint {
    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            Endpoint::Client(conn) => registry.deregister(conn.transport().socket()),
            Endpoint::CgiInput(input) => registry.deregister(input.pipe()),
            Endpoint::CgiOutput(output) => registry.deregister(output.pipe()),
        }
    }
}

impl Teardown for Endpoint {
    fn teardown(&mut self) {
        match self {
            Endpoint::Client(conn) => conn.close(),
            // dropping the pipe closes it
            Endpoint::CgiInput(_) => {}
            Endpoint::CgiOutput(output) => output.abort(),
        }
    }
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }
}

pub struct Server {
    poll: Poll,
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
    listeners: Vec<Listener>,
    registry: ConnectionRegistry<Endpoint>,
    tls: Option<Arc<ServerConfig>>,
    handler: Handler,
    cgi_program: Option<PathBuf>,
    cgi_output_limit: usize,
    settings: ServerSettings,
    /// Open client connections; CGI pipes are not counted.
    clients: usize,
    /// Finished CGI programs waiting to be reaped.
    children: Vec<Child>,
    stopped: bool,
}

impl Server {
    pub fn bind(config: &Config) -> anyhow::Result<Self> {
        let poll = Poll::new().context("Failed to create poll instance")?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE).context("Failed to create waker")?);

        let mut listeners = vec![listener::bind(&config.server.listen_addr, Scheme::Http)?];

        let tls = match &config.tls {
            Some(settings) => {
                let context = tls::load_server_config(&settings.cert, &settings.key)?;
                listeners.push(listener::bind(&settings.listen_addr, Scheme::Https)?);
                Some(context)
            }
            None => None,
        };

        for listener in &mut listeners {
            poll.registry()
                .register(&mut listener.socket, listener.token, Interest::READABLE)
                .context("Failed to register listener")?;
        }

        let handler = Handler::new(
            config.static_files.root.clone(),
            config.cgi.as_ref().map(|cgi| cgi.prefix.clone()),
        );

        // each client may hold two CGI pipes besides its socket
        let capacity = config.server.max_connections.saturating_mul(3);

        Ok(Self {
            poll,
            waker,
            requested: Arc::new(AtomicBool::new(false)),
            listeners,
            registry: ConnectionRegistry::with_capacity(capacity),
            tls,
            handler,
            cgi_program: config.cgi.as_ref().map(|cgi| cgi.program.clone()),
            cgi_output_limit: config.cgi.as_ref().map_or(0, |cgi| cgi.max_output_bytes),
            settings: config.server.clone(),
            clients: 0,
            children: Vec::new(),
            stopped: false,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
            requested: Arc::clone(&self.requested),
        }
    }

    /// Address of the plain HTTP listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.scheme == Scheme::Http)
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "listener closed"))?
            .local_addr()
    }

    pub fn tls_local_addr(&self) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.scheme == Scheme::Https)
            .and_then(|l| l.local_addr().ok())
    }

    /// Runs the event loop until a shutdown is requested.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.requested.load(Ordering::SeqCst) {
            let timeout = self.next_timeout();
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                self.shutdown();
                return Err(e).context("Poll failed");
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE {
                    continue;
                }

                if let Some(index) = self.listeners.iter().position(|l| l.token == token) {
                    self.accept_all(index);
                    continue;
                }

                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                let writable = event.is_writable() || event.is_write_closed();
                self.dispatch(token, readable, writable);
            }

            self.sweep_idle();
            self.reap_children();
        }

        self.shutdown();
        Ok(())
    }

    /// Tears everything down. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        for mut listener in self.listeners.drain(..) {
            let _ = self.poll.registry().deregister(&mut listener.socket);
        }

        for token in self.registry.keys() {
            self.close(token);
        }
        let leftover = self.registry.clear();
        self.clients = 0;

        for mut child in self.children.drain(..) {
            let _ = child.kill();
            let _ = child.wait();
        }

        self.tls = None;
        info!(leftover, "Server shut down");
    }

    /// Time until the oldest idle client expires, capped at one window.
    fn next_timeout(&self) -> Duration {
        let window = self.settings.idle_timeout();
        let now = Instant::now();

        self.registry
            .iter()
            .filter_map(|(_, entry)| match entry {
                Endpoint::Client(conn) if !conn.is_awaiting_cgi() => {
                    Some(window.saturating_sub(conn.idle_for(now)))
                }
                _ => None,
            })
            .min()
            .unwrap_or(window)
            .max(Duration::from_millis(1))
    }

    fn accept_all(&mut self, index: usize) {
        loop {
            let (sock, peer) = match self.listeners[index].accept() {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            };
            let scheme = self.listeners[index].scheme;

            if self.clients >= self.settings.max_connections {
                self.reject(sock, peer, scheme);
                continue;
            }

            let local = sock.local_addr().or_else(|_| self.listeners[index].local_addr());
            let admitted = local
                .map_err(anyhow::Error::from)
                .and_then(|local| self.admit(sock, peer, local, scheme));
            if let Err(e) = admitted {
                warn!(%peer, error = %e, "Failed to admit connection");
            }
        }
    }

    /// Turns away a connection accepted at the ceiling.
    fn reject(&mut self, mut sock: TcpStream, peer: SocketAddr, scheme: Scheme) {
        if scheme == Scheme::Https {
            debug!(%peer, "Connection limit reached, dropping TLS connection");
            return;
        }

        let response = synthetic(StatusCode::ServiceUnavailable);
        info!(
            %peer,
            request = "-",
            status = response.status.as_u16(),
            size = response.size(),
            "Response"
        );
        if let Err(e) = ResponseWriter::new(&response).write_to(&mut sock) {
            debug!(%peer, error = %e, "Failed to send 503");
        }
        let _ = sock.shutdown(Shutdown::Write);
    }

    fn admit(&mut self, sock: TcpStream, peer: SocketAddr, local: SocketAddr, scheme: Scheme) -> anyhow::Result<()> {
        anyhow::ensure!(!self.registry.is_full(), "connection registry is full");

        let transport = match scheme {
            Scheme::Http => Transport::Plain(sock),
            Scheme::Https => {
                let context = self.tls.as_ref().context("TLS listener without a TLS context")?;
                Transport::tls(sock, tls::new_session(context)?)
            }
        };

        let mut conn = Connection::new(transport, peer, local);
        let token = Token(conn.transport().as_raw_fd() as usize);

        self.poll.registry().register(
            conn.transport().socket(),
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.registry.insert(token, Endpoint::Client(conn))?;
        self.clients += 1;

        debug!(%peer, ?scheme, "Accepted connection");
        Ok(())
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        match self.registry.get(token) {
            Some(Endpoint::Client(_)) => {
                if readable {
                    self.read_client(token);
                }
                if writable {
                    self.flush_client(token);
                }
            }
            Some(Endpoint::CgiInput(_)) => self.on_cgi_input(token),
            Some(Endpoint::CgiOutput(_)) => self.on_cgi_output(token),
            None => {}
        }
    }

    fn read_client(&mut self, token: Token) {
        if self.refill(token) {
            self.process_buffered(token);
        }
    }

    /// Reads what the client sent. Returns `false` if the connection was
    /// closed instead.
    fn refill(&mut self, token: Token) -> bool {
        let limit = self.settings.max_request_bytes;
        let Some(Endpoint::Client(conn)) = self.registry.get_mut(token) else {
            return false;
        };

        let peer = conn.peer();
        match conn.fill(limit) {
            Ok(status) if status.eof => {
                debug!(%peer, "Peer closed connection");
                self.close(token);
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(%peer, error = %e, "Read failed");
                self.close(token);
                false
            }
        }
    }

    /// Answers every complete request already buffered, stopping when a
    /// response has to wait for the socket or for a CGI program.
    fn process_buffered(&mut self, token: Token) {
        let limit = self.settings.max_request_bytes;

        loop {
            let Some(Endpoint::Client(conn)) = self.registry.get_mut(token) else {
                return;
            };
            if !conn.is_reading() {
                return;
            }

            let request = match conn.next_request() {
                Ok(Some(request)) => request,
                Ok(None) if conn.has_unread(limit) => {
                    // consumed requests made room for bytes left on the socket
                    if !self.refill(token) {
                        return;
                    }
                    continue;
                }
                Ok(None) => {
                    if conn.buffered() >= limit {
                        debug!(peer = %conn.peer(), "Request exceeds buffer limit");
                        self.respond(token, None, synthetic(StatusCode::BadRequest));
                    }
                    return;
                }
                Err(e) => {
                    debug!(peer = %conn.peer(), error = %e, "Malformed request");
                    self.respond(token, None, synthetic(StatusCode::BadRequest));
                    return;
                }
            };

            match self.handler.handle(&request) {
                Dispatch::Ready(response) => {
                    self.respond(token, Some(request.request_line()), response)
                }
                Dispatch::Cgi => self.start_cgi(token, &request),
            }
        }
    }

    /// Queues `response` and writes as much of it as the socket takes.
    fn respond(&mut self, token: Token, request_line: Option<String>, response: Response) {
        let Some(Endpoint::Client(conn)) = self.registry.get_mut(token) else {
            return;
        };

        info!(
            peer = %conn.peer(),
            request = request_line.as_deref().unwrap_or("-"),
            status = response.status.as_u16(),
            size = response.size(),
            "Response"
        );
        conn.begin_response(&response);

        if let Some(Flush::Done { close: true }) = self.write_pending(token) {
            self.close(token);
        }
    }

    fn flush_client(&mut self, token: Token) {
        match self.write_pending(token) {
            Some(Flush::Done { close: true }) => self.close(token),
            Some(Flush::Done { close: false }) => self.read_client(token),
            _ => {}
        }
    }

    fn write_pending(&mut self, token: Token) -> Option<Flush> {
        let (result, peer) = match self.registry.get_mut(token) {
            Some(Endpoint::Client(conn)) => (conn.flush(), conn.peer()),
            _ => return None,
        };

        match result {
            Ok(flush) => Some(flush),
            Err(e) => {
                warn!(%peer, error = %e, "Write failed");
                self.close(token);
                None
            }
        }
    }

    fn start_cgi(&mut self, token: Token, request: &Request) {
        let Some(Endpoint::Client(conn)) = self.registry.get(token) else {
            return;
        };
        let peer = conn.peer();
        let ctx = (peer, conn.local(), conn.is_tls());

        match self.launch_cgi(token, request, ctx) {
            Ok(link) => {
                if let Some(Endpoint::Client(conn)) = self.registry.get_mut(token) {
                    conn.await_cgi(link);
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "CGI launch failed");
                let response = synthetic(StatusCode::InternalServerError);
                self.respond(token, Some(request.request_line()), response);
            }
        }
    }

    fn launch_cgi(
        &mut self,
        token: Token,
        request: &Request,
        (remote_addr, local_addr, secure): (SocketAddr, SocketAddr, bool),
    ) -> anyhow::Result<CgiLink> {
        let program = self.cgi_program.as_ref().context("no CGI program configured")?;
        let prefix = self.handler.cgi_prefix().unwrap_or_default();
        anyhow::ensure!(
            self.registry.len() + 2 <= self.registry.capacity(),
            "connection registry is full"
        );

        let ctx = CgiContext {
            prefix,
            remote_addr,
            local_addr,
            secure,
        };
        let env = build_env(request, &ctx);
        let CgiProcess { child, stdin, stdout } = cgi::spawn(program, &env, !request.body.is_empty())?;

        let mut output = CgiOutput::new(
            stdout,
            token,
            child,
            self.cgi_output_limit,
            request.keep_alive(),
            request.request_line(),
        );
        let output_token = Token(output.pipe().as_raw_fd() as usize);
        if let Err(e) = self
            .poll
            .registry()
            .register(output.pipe(), output_token, Interest::READABLE)
        {
            output.abort();
            return Err(e.into());
        }
        self.registry.insert(output_token, Endpoint::CgiOutput(output))?;

        let input_token = match stdin {
            Some(pipe) => {
                let mut input = CgiInput::new(pipe, token, request.body.clone());
                let input_token = Token(input.pipe().as_raw_fd() as usize);
                if let Err(e) = self
                    .poll
                    .registry()
                    .register(input.pipe(), input_token, Interest::WRITABLE)
                {
                    self.close_entry(output_token);
                    return Err(e.into());
                }
                self.registry.insert(input_token, Endpoint::CgiInput(input))?;
                Some(input_token)
            }
            None => None,
        };

        Ok(CgiLink {
            input: input_token,
            output: output_token,
        })
    }

    fn on_cgi_input(&mut self, token: Token) {
        let Some(Endpoint::CgiInput(input)) = self.registry.get_mut(token) else {
            return;
        };
        let owner = input.owner();

        match input.pump() {
            Ok(false) => return,
            Ok(true) => {}
            // the program may exit without reading its input
            Err(e) => debug!(error = %e, "CGI stdin closed early"),
        }

        self.close_entry(token);
        if let Some(Endpoint::Client(conn)) = self.registry.get_mut(owner) {
            conn.detach_cgi_input();
        }
    }

    fn on_cgi_output(&mut self, token: Token) {
        let Some(Endpoint::CgiOutput(output)) = self.registry.get_mut(token) else {
            return;
        };

        let drained = output.drain();
        if let Ok(false) = drained {
            return;
        }

        let owner = output.owner();
        let request_line = output.request_line.clone();
        let response = match drained {
            Ok(_) => {
                if let Some(child) = output.take_child() {
                    self.children.push(child);
                }
                match parse_cgi_output(output.output()) {
                    Ok(reply) => reply.into_response(!output.keep_alive),
                    Err(e) => {
                        warn!(error = %e, "Bad CGI output");
                        synthetic(StatusCode::InternalServerError)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "CGI stdout read failed");
                output.abort();
                synthetic(StatusCode::InternalServerError)
            }
        };

        self.close_entry(token);

        let link = match self.registry.get_mut(owner) {
            Some(Endpoint::Client(conn)) => conn.take_cgi_link(),
            _ => None,
        };
        if let Some(input) = link.and_then(|link| link.input) {
            self.close_entry(input);
        }

        self.respond(owner, Some(request_line), response);
        self.process_buffered(owner);
    }

    /// Closes a client together with any CGI exchange it is waiting on.
    fn close(&mut self, token: Token) {
        let (is_client, link) = match self.registry.get(token) {
            Some(Endpoint::Client(conn)) => (true, conn.cgi_link()),
            Some(_) => (false, None),
            None => return,
        };

        if let Some(link) = link {
            if let Some(input) = link.input {
                self.close_entry(input);
            }
            self.close_entry(link.output);
        }

        if let (true, Some(Endpoint::Client(conn))) = (is_client, self.registry.get(token)) {
            debug!(peer = %conn.peer(), "Closed connection");
        }
        if self.close_entry(token) && is_client {
            self.clients = self.clients.saturating_sub(1);
        }
    }

    /// Deregisters and tears down a single registry entry.
    fn close_entry(&mut self, token: Token) -> bool {
        let Some(entry) = self.registry.get_mut(token) else {
            return false;
        };
        if let Err(e) = entry.deregister(self.poll.registry()) {
            debug!(error = %e, "Deregister failed");
        }
        self.registry.remove(token).is_some()
    }

    /// Sends 408 to clients silent for a full window; closes writers that
    /// made no progress for as long.
    fn sweep_idle(&mut self) {
        let window = self.settings.idle_timeout();
        let now = Instant::now();

        let expired: Vec<(Token, bool)> = self
            .registry
            .iter()
            .filter_map(|(token, entry)| match entry {
                Endpoint::Client(conn) if !conn.is_awaiting_cgi() && conn.idle_for(now) >= window => {
                    Some((token, conn.is_reading()))
                }
                _ => None,
            })
            .collect();

        for (token, reading) in expired {
            if reading {
                self.respond(token, None, synthetic(StatusCode::RequestTimeout));
            } else {
                debug!(?token, "Closing stalled connection");
                self.close(token);
            }
        }
    }

    fn reap_children(&mut self) {
        self.children
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
