use bytes::Bytes;
use thiserror::Error;

use crate::http::request::{is_token, Method, Request};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The header block (or the declared body) has not fully arrived yet.
    #[error("request is incomplete")]
    Incomplete,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
}

/// Position in the CR LF CR LF terminator scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Start,
    Cr,
    CrLf,
    CrLfCr,
}

/// Locates the end of the header block.
///
/// Returns the offset just past the first CR LF CR LF, or `None` if the
/// span does not contain one.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    let mut state = ScanState::Start;

    for (i, &byte) in buf.iter().enumerate() {
        state = match (state, byte) {
            (ScanState::Start, b'\r') => ScanState::Cr,
            (ScanState::Cr, b'\n') => ScanState::CrLf,
            (ScanState::CrLf, b'\r') => ScanState::CrLfCr,
            (ScanState::CrLfCr, b'\n') => return Some(i + 1),
            // a stray CR may still begin the terminator
            (_, b'\r') => ScanState::Cr,
            _ => ScanState::Start,
        };
    }

    None
}

/// Tokenizes one request from the front of `buf`.
///
/// On success returns the request, body included, and the number of bytes
/// it occupied. Empty lines preceding the request line are skipped.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let mut skipped = 0;
    while buf[skipped..].starts_with(b"\r\n") {
        skipped += 2;
    }
    let buf = &buf[skipped..];

    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let head = std::str::from_utf8(&buf[..headers_end - 4])
        .map_err(|_| ParseError::InvalidRequestLine)?;

    let mut lines = head.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
    let (method, uri, version) = parse_request_line(request_line)?;

    // Headers
    let mut headers = Vec::new();
    for line in lines {
        headers.push(parse_header_line(line)?);
    }

    // Body
    let content_length = resolve_content_length(&headers)?.unwrap_or(0);
    let total = headers_end
        .checked_add(content_length)
        .ok_or(ParseError::InvalidContentLength)?;

    if buf.len() < total {
        return Err(ParseError::Incomplete);
    }

    let request = Request {
        method,
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
        body: Bytes::copy_from_slice(&buf[headers_end..total]),
    };

    Ok((request, skipped + total))
}

fn parse_request_line(line: &str) -> Result<(Method, &str, &str), ParseError> {
    let mut parts = line.split(' ');

    let method = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let uri = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;

    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = Method::from_str(method).ok_or(ParseError::InvalidRequestLine)?;

    if uri.is_empty() || uri.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(ParseError::InvalidRequestLine);
    }

    if !is_http_version(version) {
        return Err(ParseError::InvalidRequestLine);
    }

    Ok((method, uri, version))
}

/// `HTTP/` followed by a major and optional minor version number.
fn is_http_version(version: &str) -> bool {
    let Some(number) = version.strip_prefix("HTTP/") else {
        return false;
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    match number.split_once('.') {
        Some((major, minor)) => all_digits(major) && all_digits(minor),
        None => all_digits(number),
    }
}

fn parse_header_line(line: &str) -> Result<(String, String), ParseError> {
    let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

    if !is_token(name) {
        return Err(ParseError::InvalidHeader);
    }

    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if value.bytes().any(|b| (b < b' ' && b != b'\t') || b == 0x7f) {
        return Err(ParseError::InvalidHeader);
    }

    Ok((name.to_string(), value.to_string()))
}

/// Reads the case-sensitive `Content-Length` header.
///
/// Repeated headers must agree.
fn resolve_content_length(headers: &[(String, String)]) -> Result<Option<usize>, ParseError> {
    let mut resolved = None;

    for (_, value) in headers.iter().filter(|(name, _)| name == "Content-Length") {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength);
        }
        let length: usize = value
            .parse()
            .map_err(|_| ParseError::InvalidContentLength)?;

        match resolved {
            Some(previous) if previous != length => {
                return Err(ParseError::InvalidContentLength);
            }
            _ => resolved = Some(length),
        }
    }

    Ok(resolved)
}
