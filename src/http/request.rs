use bytes::Bytes;

/// HTTP request methods.
///
/// The server implements GET, HEAD and POST. Any other syntactically valid
/// method token is still tokenized (as `Other`) so the response builder can
/// answer it with 501 instead of the tokenizer rejecting it as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Store the request body at the target
    POST,
    PUT,
    DELETE,
    OPTIONS,
    PATCH,
    /// Any other method token
    Other(String),
}

/// Represents a parsed HTTP request from a client.
///
/// Header names keep the exact spelling the client sent and are looked up
/// case-sensitively. Headers stay in arrival order.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request-target exactly as received (e.g., "/index.html?x=1")
    pub uri: String,
    /// HTTP version token (e.g., "HTTP/1.1")
    pub version: String,
    /// Request headers in the order they were received
    pub headers: Vec<(String, String)>,
    /// Request body, `Content-Length` bytes long
    pub body: Bytes,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Returns `true` when `s` is a non-empty RFC 7230 token.
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

impl Method {
    /// Parses an HTTP method token.
    ///
    /// Method names are case-sensitive: `"get"` is a valid token but not GET.
    ///
    /// # Returns
    ///
    /// `None` if `s` is not a valid token.
    ///
    /// # Example
    ///
    /// ```
    /// # use liso::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("BREW"), Some(Method::Other("BREW".into())));
    /// assert_eq!(Method::from_str("G T"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other if is_token(other) => Method::Other(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            uri: None,
            version: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Appends a header; repeated names are kept as separate entries.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            uri: self.uri.ok_or("uri missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Request {
    /// Retrieves the first header whose name matches `key` exactly.
    ///
    /// The comparison is case-sensitive: `header("Content-Length")` does not
    /// see a `content-length` line.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// The declared body length, if a well-formed `Content-Length` is present.
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// HTTP/1.1 defaults to keep-alive; only an explicit `Connection: close`
    /// turns it off.
    pub fn keep_alive(&self) -> bool {
        !self
            .header("Connection")
            .map(|v| v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// The request-target without its query string.
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }

    /// The query string (without the `?`), or `""` when there is none.
    pub fn query(&self) -> &str {
        self.uri.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    /// `METHOD URI VERSION`, as used in access log lines.
    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }
}
