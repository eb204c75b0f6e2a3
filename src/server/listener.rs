use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;

use anyhow::Context;
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use tracing::info;

/// Which protocol a listening socket speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A bound, non-blocking listening socket.
pub struct Listener {
    pub socket: TcpListener,
    pub token: Token,
    pub scheme: Scheme,
}

/// Binds `addr` ("host:port"); the socket is keyed by its own descriptor.
pub fn bind(addr: &str, scheme: Scheme) -> anyhow::Result<Listener> {
    let resolved: SocketAddr = addr
        .to_socket_addrs()
        .with_context(|| format!("Invalid listen address {addr}"))?
        .next()
        .with_context(|| format!("Listen address {addr} resolved to nothing"))?;

    let socket = TcpListener::bind(resolved)
        .with_context(|| format!("Failed to bind {resolved}"))?;
    let token = Token(socket.as_raw_fd() as usize);

    info!("Listening on {} ({:?})", socket.local_addr()?, scheme);

    Ok(Listener {
        socket,
        token,
        scheme,
    })
}

impl Listener {
    /// Accepts one pending connection; `None` once the backlog is empty.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.socket.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
