use std::io::{self, ErrorKind, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes a response as `status-line CRLF (header CRLF)* CRLF body`.
///
/// The returned buffer is exactly `resp.real_size()` bytes long.
pub fn serialize_response(resp: &Response) -> Bytes {
    let mut buf = BytesMut::with_capacity(resp.real_size());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.put_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    // Body
    buf.put_slice(&resp.body);

    buf.freeze()
}

/// A serialized response plus how much of it has reached the transport.
///
/// Writes stop at the first would-block; the event loop calls
/// [`ResponseWriter::write_to`] again on the next writable notification.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    /// Pushes as much of the response as `stream` accepts.
    ///
    /// Returns `Ok(true)` once every byte was written and flushed, `Ok(false)`
    /// if the stream would block first.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> io::Result<bool> {
        while self.written < self.buffer.len() {
            match stream.write(&self.buffer[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => self.written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        match stream.flush() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.buffer.len()
    }
}
