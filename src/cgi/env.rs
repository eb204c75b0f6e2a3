use std::net::SocketAddr;

use crate::http::handler::SERVER_NAME;
use crate::http::request::Request;

/// Request headers passed to CGI programs as `HTTP_*` variables.
const FORWARDED_HEADERS: &[(&str, &str)] = &[
    ("Accept", "HTTP_ACCEPT"),
    ("Referer", "HTTP_REFERER"),
    ("Accept-Encoding", "HTTP_ACCEPT_ENCODING"),
    ("Accept-Language", "HTTP_ACCEPT_LANGUAGE"),
    ("Accept-Charset", "HTTP_ACCEPT_CHARSET"),
    ("Host", "HTTP_HOST"),
    ("Cookie", "HTTP_COOKIE"),
    ("User-Agent", "HTTP_USER_AGENT"),
    ("Connection", "HTTP_CONNECTION"),
];

/// Connection facts the environment is built from, besides the request.
#[derive(Debug, Clone, Copy)]
pub struct CgiContext<'a> {
    /// URI prefix that routed the request to CGI
    pub prefix: &'a str,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    /// Request arrived over TLS
    pub secure: bool,
}

/// Builds the CGI/1.1 environment for `request`.
pub fn build_env(request: &Request, ctx: &CgiContext<'_>) -> Vec<(String, String)> {
    let mut env = Vec::with_capacity(24);
    let mut set = |name: &str, value: String| env.push((name.to_string(), value));

    let path = request.path();
    let script_name = ctx.prefix.trim_end_matches('/');
    let path_info = match path.strip_prefix(script_name) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) => format!("/{rest}"),
        None => path.to_string(),
    };
    let server_name = request
        .header("Host")
        .and_then(|host| host.rsplit_once(':').map(|(name, _)| name).or(Some(host)))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ctx.local_addr.ip().to_string());

    set("GATEWAY_INTERFACE", "CGI/1.1".into());
    set("SERVER_SOFTWARE", SERVER_NAME.into());
    set("SERVER_PROTOCOL", request.version.clone());
    set("SERVER_NAME", server_name);
    set("SERVER_PORT", ctx.local_addr.port().to_string());
    set("REQUEST_METHOD", request.method.to_string());
    set("REQUEST_URI", request.uri.clone());
    set("SCRIPT_NAME", script_name.to_string());
    set("PATH_INFO", path_info);
    set("QUERY_STRING", request.query().to_string());
    set("REMOTE_ADDR", ctx.remote_addr.ip().to_string());
    set("HTTPS", if ctx.secure { "on" } else { "off" }.into());

    if let Some(length) = request.content_length() {
        set("CONTENT_LENGTH", length.to_string());
    }
    if let Some(content_type) = request.header("Content-Type") {
        set("CONTENT_TYPE", content_type.to_string());
    }

    for &(header, variable) in FORWARDED_HEADERS {
        if let Some(value) = request.header(header) {
            set(variable, value.to_string());
        }
    }

    // the environment is cleared before exec; keep program lookup working
    if let Some(path) = std::env::var_os("PATH") {
        set("PATH", path.to_string_lossy().into_owned());
    }

    env
}
