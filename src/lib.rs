//! Liso - event-driven HTTP/1.1 server
//!
//! Static files, uploads, TLS and CGI served from a single-threaded
//! readiness reactor.

pub mod cgi;
pub mod config;
pub mod http;
pub mod server;
