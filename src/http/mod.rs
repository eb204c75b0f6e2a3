//! HTTP/1.1 protocol layer.
//!
//! - **`parser`**: tokenizes requests out of a byte buffer
//! - **`request`** / **`response`**: message types and builders
//! - **`handler`**: static files, uploads and status derivation
//! - **`writer`**: serializes responses and writes them without blocking
//! - **`connection`**: per-client buffer and state machine
//! - **`mime`**: content type by file extension
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← buffer bytes, tokenize requests
//!        └──┬───────┬──┘
//!   static  │       │ CGI route
//!           │       ▼
//!           │  ┌─────────────┐
//!           │  │ AwaitingCgi │ ← program runs, output collected
//!           │  └──────┬──────┘
//!           ▼         ▼
//!        ┌──────────────────┐
//!        │     Writing      │ ← drained across writable events
//!        └──────┬───────────┘
//!               ├─ keep-alive → Reading
//!               └─ close      → Closed
//! ```

pub mod connection;
pub mod handler;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
