use std::io::{self, ErrorKind, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::Token;

use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::transport::{ReadStatus, Transport};

/// Pipe endpoints of the CGI program answering this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgiLink {
    pub input: Option<Token>,
    pub output: Token,
}

pub enum ConnectionState {
    Reading,
    AwaitingCgi(CgiLink),
    Writing { writer: ResponseWriter, close: bool },
    Closed,
}

/// Outcome of pushing a pending response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Nothing was queued.
    Idle,
    /// Bytes remain; wait for the next writable notification.
    Pending,
    /// The response is fully sent.
    Done { close: bool },
}

/// One client connection as seen by the event loop.
pub struct Connection {
    transport: Transport,
    peer: SocketAddr,
    local: SocketAddr,
    buffer: BytesMut,
    state: ConnectionState,
    /// The last read stopped at the buffer limit.
    capped: bool,
    last_activity: Instant,
}

impl Connection {
    pub fn new(transport: Transport, peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            transport,
            peer,
            local,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            capped: false,
            last_activity: Instant::now(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Address the client connected to.
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    pub fn transport(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn is_reading(&self) -> bool {
        matches!(self.state, ConnectionState::Reading)
    }

    pub fn is_awaiting_cgi(&self) -> bool {
        matches!(self.state, ConnectionState::AwaitingCgi(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    /// Bytes received but not yet consumed by a request.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Reads whatever the transport has, up to `limit` buffered bytes.
    pub fn fill(&mut self, limit: usize) -> io::Result<ReadStatus> {
        let status = self.transport.read_available(&mut self.buffer, limit)?;
        self.capped = status.capped;
        if status.bytes > 0 {
            self.touch();
        }
        Ok(status)
    }

    /// Whether the socket may still hold bytes that did not fit the last
    /// read and the buffer now has room for them.
    ///
    /// No readiness edge arrives for data already queued, so the caller
    /// has to read again on its own.
    pub fn has_unread(&self, limit: usize) -> bool {
        self.capped && self.buffer.len() < limit
    }

    /// Takes the next complete request off the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. Nothing is consumed on error.
    pub fn next_request(&mut self) -> Result<Option<Request>, ParseError> {
        match parse_http_request(&self.buffer) {
            Ok((request, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some(request))
            }
            Err(ParseError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Queues `response`; the caller drives it out with [`Connection::flush`].
    pub fn begin_response(&mut self, response: &Response) {
        self.state = ConnectionState::Writing {
            writer: ResponseWriter::new(response),
            close: response.close,
        };
        self.touch();
    }

    pub fn await_cgi(&mut self, link: CgiLink) {
        self.state = ConnectionState::AwaitingCgi(link);
        self.touch();
    }

    /// Detaches the CGI pipes, leaving the connection ready for a response.
    pub fn take_cgi_link(&mut self) -> Option<CgiLink> {
        match self.state {
            ConnectionState::AwaitingCgi(link) => {
                self.state = ConnectionState::Reading;
                Some(link)
            }
            _ => None,
        }
    }

    /// Forgets the stdin pipe once the body has been delivered.
    pub fn detach_cgi_input(&mut self) {
        if let ConnectionState::AwaitingCgi(link) = &mut self.state {
            link.input = None;
        }
    }

    pub fn cgi_link(&self) -> Option<CgiLink> {
        match self.state {
            ConnectionState::AwaitingCgi(link) => Some(link),
            _ => None,
        }
    }

    pub fn flush(&mut self) -> io::Result<Flush> {
        let ConnectionState::Writing { writer, close } = &mut self.state else {
            // TLS handshake records may still be queued
            return match self.transport.flush() {
                Err(e) if e.kind() != ErrorKind::WouldBlock => Err(e),
                _ => Ok(Flush::Idle),
            };
        };

        if !writer.write_to(&mut self.transport)? {
            return Ok(Flush::Pending);
        }

        let close = *close;
        self.state = if close {
            ConnectionState::Closed
        } else {
            ConnectionState::Reading
        };
        self.touch();

        Ok(Flush::Done { close })
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn close(&mut self) {
        if !self.is_closed() {
            self.transport.close();
            self.state = ConnectionState::Closed;
        }
    }
}
