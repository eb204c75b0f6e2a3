//! Byte transport underneath a client connection.
//!
//! The event loop reads and writes through [`Transport`] without caring
//! whether the socket is wrapped in a TLS session.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use bytes::BytesMut;
use mio::net::TcpStream;
use rustls::ServerConnection;

const READ_CHUNK: usize = 4096;

/// Result of draining a transport after a readable notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatus {
    /// Plaintext bytes appended to the buffer.
    pub bytes: usize,
    /// The peer finished sending.
    pub eof: bool,
    /// Reading stopped at the buffer limit; the socket may hold more.
    pub capped: bool,
}

pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

/// A socket plus the TLS session layered over it.
pub struct TlsStream {
    sock: TcpStream,
    session: ServerConnection,
}

impl Transport {
    pub fn tls(sock: TcpStream, session: ServerConnection) -> Self {
        Transport::Tls(Box::new(TlsStream { sock, session }))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// The socket to register with the poll instance.
    pub fn socket(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(sock) => sock,
            Transport::Tls(tls) => &mut tls.sock,
        }
    }

    /// Reads everything currently available into `buf`, stopping at
    /// would-block, end of stream, or once `buf` holds `limit` bytes.
    pub fn read_available(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<ReadStatus> {
        match self {
            Transport::Plain(sock) => read_plain(sock, buf, limit),
            Transport::Tls(tls) => tls.read_available(buf, limit),
        }
    }

    /// Sends `close_notify` on TLS sessions. Plain sockets need nothing
    /// before they are dropped.
    pub fn close(&mut self) {
        if let Transport::Tls(tls) = self {
            tls.session.send_close_notify();
            let _ = tls.flush_records();
        }
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Transport::Plain(sock) => sock.as_raw_fd(),
            Transport::Tls(tls) => tls.sock.as_raw_fd(),
        }
    }
}

/// Writes go to the socket directly or through the TLS session.
///
/// For TLS, `flush` reports `WouldBlock` while encrypted records are still
/// queued for the socket.
impl Write for Transport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.write(data),
            Transport::Tls(tls) => {
                if !tls.flush_records()? {
                    return Err(ErrorKind::WouldBlock.into());
                }
                let n = tls.session.writer().write(data)?;
                tls.flush_records()?;
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(sock) => sock.flush(),
            Transport::Tls(tls) => {
                if tls.flush_records()? {
                    Ok(())
                } else {
                    Err(ErrorKind::WouldBlock.into())
                }
            }
        }
    }
}

fn read_plain(sock: &mut TcpStream, buf: &mut BytesMut, limit: usize) -> io::Result<ReadStatus> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut status = ReadStatus::default();

    while buf.len() < limit {
        let want = (limit - buf.len()).min(chunk.len());
        match sock.read(&mut chunk[..want]) {
            Ok(0) => {
                status.eof = true;
                break;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                status.bytes += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    status.capped = !status.eof && buf.len() >= limit;
    Ok(status)
}

impl TlsStream {
    fn read_available(&mut self, buf: &mut BytesMut, limit: usize) -> io::Result<ReadStatus> {
        let mut status = ReadStatus::default();

        while buf.len() < limit {
            let blocked = match self.session.read_tls(&mut self.sock) {
                Ok(0) => {
                    status.eof = true;
                    false
                }
                Ok(_) => false,
                Err(e) if e.kind() == ErrorKind::WouldBlock => true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let state = match self.session.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    // deliver the alert before giving up on the session
                    let _ = self.flush_records();
                    return Err(io::Error::new(ErrorKind::InvalidData, e));
                }
            };

            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let start = buf.len();
                buf.resize(start + pending, 0);
                self.session.reader().read_exact(&mut buf[start..])?;
                status.bytes += pending;
            }

            if state.peer_has_closed() {
                status.eof = true;
            }

            if status.eof || blocked {
                break;
            }
        }

        // handshake messages produced while processing
        self.flush_records()?;

        status.capped = !status.eof && buf.len() >= limit;
        Ok(status)
    }

    /// Writes queued TLS records to the socket. Returns `false` if the socket
    /// would block before the queue drained.
    fn flush_records(&mut self) -> io::Result<bool> {
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.sock) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
