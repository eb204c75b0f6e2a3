use bytes::Bytes;

use crate::cgi::CgiError;
use crate::http::handler::preamble;
use crate::http::parser::find_headers_end;
use crate::http::response::{Response, StatusCode};

/// Headers the server owns; a program's values for these are discarded.
const SERVER_OWNED: &[&str] = &["Connection", "Content-Length", "Date", "Server"];

/// A CGI program's reply, split into status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiReply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Splits raw program output into a reply.
///
/// The header block ends at the first blank line (CR LF CR LF, or LF LF for
/// programs that skip carriage returns). The status comes from a leading
/// `HTTP/x.y` status line, a `Status` header, or a bare `Location` (302),
/// in that order, and defaults to 200.
pub fn parse_cgi_output(raw: &[u8]) -> Result<CgiReply, CgiError> {
    let (head, body) = split_head(raw).ok_or(CgiError::MalformedOutput("missing header block"))?;
    let head = std::str::from_utf8(head).map_err(|_| CgiError::MalformedOutput("header block is not UTF-8"))?;

    let mut status = None;
    let mut headers = Vec::new();
    let mut location = false;

    for (index, line) in head.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if index == 0 && line.starts_with("HTTP/") {
            let code = line
                .split(' ')
                .nth(1)
                .ok_or(CgiError::MalformedOutput("status line without a code"))?;
            status = Some(parse_code(code)?);
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or(CgiError::MalformedOutput("header line without a colon"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(CgiError::MalformedOutput("empty header name"));
        }

        if name.eq_ignore_ascii_case("Status") {
            let code = value.split(' ').next().unwrap_or_default();
            status = Some(parse_code(code)?);
            continue;
        }
        if name.eq_ignore_ascii_case("Location") {
            location = true;
        }
        if SERVER_OWNED.iter().any(|owned| name.eq_ignore_ascii_case(owned)) {
            continue;
        }

        headers.push((name.to_string(), value.to_string()));
    }

    let status = match status {
        Some(status) => status,
        None if location => StatusCode::Found,
        None => StatusCode::Ok,
    };

    Ok(CgiReply {
        status,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

fn split_head(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = find_headers_end(raw).map(|end| (end - 4, end));
    let lf = raw
        .windows(2)
        .position(|pair| pair == b"\n\n")
        .map(|at| (at, at + 2));

    let (head_end, body_start) = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };
    Some((&raw[..head_end], &raw[body_start..]))
}

fn parse_code(code: &str) -> Result<StatusCode, CgiError> {
    match code.parse::<u16>() {
        Ok(code) if (100..=999).contains(&code) => Ok(StatusCode::from_u16(code)),
        _ => Err(CgiError::MalformedOutput("invalid status code")),
    }
}

impl CgiReply {
    /// Wraps the reply in the server's own framing headers.
    pub fn into_response(self, close: bool) -> Response {
        let close = close || self.status.forces_close();
        let builder = self
            .headers
            .into_iter()
            .fold(preamble(self.status, close), |builder, (name, value)| {
                builder.append_header(name, value)
            });

        builder.body(self.body).build()
    }
}
