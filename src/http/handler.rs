//! Static-file response builder.
//!
//! Status derivation is strictly ordered: version check, CGI routing, method
//! dispatch, then filesystem errors. Once a terminal code is chosen nothing
//! later in the chain replaces it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use url::Url;

use crate::http::mime::mime_type;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "Liso/1.0";

/// What the event loop should do with a parsed request.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this response.
    Ready(Response),
    /// Hand the request to the CGI gateway; the reply comes later.
    Cgi,
}

/// Builds responses for requests against a document root.
#[derive(Debug, Clone)]
pub struct Handler {
    root: PathBuf,
    cgi_prefix: Option<String>,
}

/// Intermediate result of method dispatch, before headers are assembled.
struct Outcome {
    status: StatusCode,
    body: Bytes,
    content_length: usize,
    file: Option<ServedFile>,
}

struct ServedFile {
    path: PathBuf,
    modified: SystemTime,
}

impl Outcome {
    fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: Bytes::new(),
            content_length: 0,
            file: None,
        }
    }
}

impl Handler {
    pub fn new(root: impl Into<PathBuf>, cgi_prefix: Option<String>) -> Self {
        Self {
            root: root.into(),
            cgi_prefix,
        }
    }

    pub fn cgi_prefix(&self) -> Option<&str> {
        self.cgi_prefix.as_deref()
    }

    /// Whether `request` is routed to the CGI gateway.
    pub fn is_cgi(&self, request: &Request) -> bool {
        self.cgi_prefix
            .as_deref()
            .is_some_and(|prefix| request.path().starts_with(prefix))
    }

    pub fn handle(&self, request: &Request) -> Dispatch {
        if request.version != "HTTP/1.1" {
            let outcome = Outcome::status(StatusCode::HttpVersionNotSupported);
            return Dispatch::Ready(assemble(outcome, Some(request)));
        }

        if self.is_cgi(request) {
            return Dispatch::Cgi;
        }

        let outcome = match request.method {
            Method::GET | Method::HEAD => self.serve_file(request),
            Method::POST => self.store_body(request),
            _ => Outcome::status(StatusCode::NotImplemented),
        };

        Dispatch::Ready(assemble(outcome, Some(request)))
    }

    /// Maps a URI path onto the filesystem below the root.
    ///
    /// Dot segments are collapsed first, so the result never leaves the root.
    /// Percent-escapes are kept as-is.
    pub fn resolve(&self, uri_path: &str) -> Option<PathBuf> {
        let base = Url::parse("http://localhost/").ok()?;
        let url = base.join(uri_path).ok()?;
        let relative = url.path().trim_start_matches('/');

        Some(self.root.join(relative))
    }

    fn serve_file(&self, request: &Request) -> Outcome {
        let Some(path) = self.resolve(request.path()) else {
            return Outcome::status(StatusCode::NotFound);
        };

        let (path, meta) = match stat(&path) {
            Ok(meta) if meta.is_dir() => {
                let index = path.join("index.html");
                match stat(&index) {
                    Ok(meta) => (index, meta),
                    Err(status) => return Outcome::status(status),
                }
            }
            Ok(meta) => (path, meta),
            Err(status) => return Outcome::status(status),
        };

        if !meta.is_file() {
            return Outcome::status(StatusCode::NotFound);
        }

        let Ok(modified) = meta.modified() else {
            return Outcome::status(StatusCode::InternalServerError);
        };

        let (body, content_length) = if request.method == Method::GET {
            match fs::read(&path) {
                Ok(contents) => {
                    let len = contents.len();
                    (Bytes::from(contents), len)
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read file");
                    return Outcome::status(StatusCode::InternalServerError);
                }
            }
        } else {
            (Bytes::new(), meta.len() as usize)
        };

        Outcome {
            status: StatusCode::Ok,
            body,
            content_length,
            file: Some(ServedFile { path, modified }),
        }
    }

    fn store_body(&self, request: &Request) -> Outcome {
        if request.content_length().is_none() {
            return Outcome::status(StatusCode::LengthRequired);
        }

        let Some(path) = self.resolve(request.path()) else {
            return Outcome::status(StatusCode::InternalServerError);
        };

        match fs::write(&path, &request.body) {
            Ok(()) => Outcome::status(StatusCode::Ok),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to store request body");
                Outcome::status(StatusCode::InternalServerError)
            }
        }
    }
}

fn stat(path: &Path) -> Result<fs::Metadata, StatusCode> {
    fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => StatusCode::NotFound,
        _ => StatusCode::InternalServerError,
    })
}

/// Starts a response with the headers every reply carries, in order:
/// `Date`, `Connection` and `Server`.
pub fn preamble(status: StatusCode, close: bool) -> ResponseBuilder {
    ResponseBuilder::new(status)
        .header("Date", httpdate::fmt_http_date(SystemTime::now()))
        .header("Connection", if close { "close" } else { "keep-alive" })
        .header("Server", SERVER_NAME)
        .close(close)
}

/// Builds a response that has no request behind it (timeouts, overload,
/// unparseable input).
pub fn synthetic(status: StatusCode) -> Response {
    assemble(Outcome::status(status), None)
}

fn assemble(outcome: Outcome, request: Option<&Request>) -> Response {
    let close = outcome.status.forces_close() || request.is_some_and(|r| !r.keep_alive());

    let mut builder = preamble(outcome.status, close)
        .header("Content-Length", outcome.content_length.to_string());

    if let (StatusCode::Ok, Some(file)) = (outcome.status, &outcome.file) {
        builder = builder
            .header("Content-Type", mime_type(&file.path))
            .header("Last-Modified", httpdate::fmt_http_date(file.modified));
    }

    builder.body(outcome.body).build()
}
